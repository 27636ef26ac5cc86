//! Default `Reporter` writing the HTML and JSON artifacts
//!
//! Per host: `<outdir>/<host>/{index.html,fulldiff.html,host.json}`.
//! Aggregate: `<outdir>/index.html` and `<outdir>/build.json`, rewritten on
//! every partial publication so watchers can follow the run.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use catdiff_core::{CatalogDiff, HostOutcome, RunContext, StatesCollection};
use catdiff_report::{html, json};

use crate::error::Result;
use crate::ports::Reporter;

pub struct HtmlReporter {
    output_dir: PathBuf,
    ctx: RunContext,
}

impl HtmlReporter {
    pub fn new(output_dir: PathBuf, ctx: RunContext) -> Self {
        Self { output_dir, ctx }
    }
}

#[async_trait]
impl Reporter for HtmlReporter {
    async fn render_host(
        &self,
        hostname: &str,
        outcome: HostOutcome,
        diff: Option<&CatalogDiff>,
        core_diff: Option<&CatalogDiff>,
        full_diff: Option<&CatalogDiff>,
    ) -> Result<()> {
        debug!(host = hostname, "rendering host report");
        let host_dir = self.output_dir.join(hostname);
        tokio::fs::create_dir_all(&host_dir).await?;

        let page = html::render_host_page(&self.ctx, hostname, outcome, diff, core_diff)?;
        tokio::fs::write(host_dir.join("index.html"), page).await?;

        let full_page = html::render_full_diff_page(&self.ctx, hostname, full_diff)?;
        tokio::fs::write(host_dir.join("fulldiff.html"), full_page).await?;

        let payload = json::host_json(&self.ctx, hostname, outcome, diff, core_diff)?;
        tokio::fs::write(host_dir.join("host.json"), payload).await?;
        Ok(())
    }

    async fn render_index(&self, states: &StatesCollection, partial: bool) -> Result<()> {
        debug!(partial, "rendering run index");
        tokio::fs::create_dir_all(&self.output_dir).await?;

        let page = html::render_index(&self.ctx, states, partial)?;
        tokio::fs::write(self.output_dir.join("index.html"), page).await?;

        let payload = json::build_json(&self.ctx, states)?;
        tokio::fs::write(self.output_dir.join("build.json"), payload).await?;
        Ok(())
    }
}
