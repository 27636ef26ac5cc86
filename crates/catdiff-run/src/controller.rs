//! Run orchestration
//!
//! The controller wires everything together: it probes the compiler,
//! resolves the host selection, prepares the workspace, runs one scheduler
//! batch per realm (the workspace is reconfigured in between), publishes
//! the final report and tears the workspace down.

use std::sync::Arc;

use tracing::{debug, info, warn};

use catdiff_core::RunContext;

use crate::aggregator::StateAggregator;
use crate::config::ControllerConfig;
use crate::directories::Directories;
use crate::error::Result;
use crate::ports::{Compiler, HostDirectory, Reporter, Workspace};
use crate::reporter::HtmlReporter;
use crate::scheduler::Scheduler;
use crate::selector::{HostSelector, Realm};
use crate::worker::HostWorker;

pub struct Controller {
    config: ControllerConfig,
    change_id: u64,
    job_id: u64,
    host_expression: String,
    /// Keep the working trees around for developer reuse.
    keep_workspace: bool,
    dirs: Directories,
    workspace: Arc<dyn Workspace>,
    compiler: Arc<dyn Compiler>,
    directory: Arc<dyn HostDirectory>,
    reporter_override: Option<Arc<dyn Reporter>>,
}

impl Controller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ControllerConfig,
        change_id: u64,
        job_id: u64,
        host_expression: impl Into<String>,
        workspace: Arc<dyn Workspace>,
        compiler: Arc<dyn Compiler>,
        directory: Arc<dyn HostDirectory>,
    ) -> Result<Self> {
        config.validate()?;
        let dirs = Directories::new(&config.base, job_id);
        Ok(Self {
            config,
            change_id,
            job_id,
            host_expression: host_expression.into(),
            keep_workspace: false,
            dirs,
            workspace,
            compiler,
            directory,
            reporter_override: None,
        })
    }

    pub fn keep_workspace(mut self, keep: bool) -> Self {
        self.keep_workspace = keep;
        self
    }

    /// Replace the default HTML reporter, mainly for tests.
    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter_override = Some(reporter);
        self
    }

    pub fn directories(&self) -> &Directories {
        &self.dirs
    }

    /// Execute the run. Returns `true` when the run failed: some host ended
    /// in `error` or `fail`.
    pub async fn run(&self) -> Result<bool> {
        let puppet_version = match self.compiler.version().await {
            Ok(version) => version,
            Err(probe_error) => {
                warn!(error = %probe_error, "could not probe the compiler version");
                "unknown".to_string()
            }
        };
        let ctx = RunContext {
            change_id: self.change_id,
            job_id: self.job_id,
            puppet_version,
        };
        info!(change = self.change_id, job = self.job_id, "starting catalog differ run");

        let selector = HostSelector::new(
            self.directory.clone(),
            self.workspace.clone(),
            self.config.puppet_var.clone(),
        );
        let selection = selector.resolve(&self.host_expression).await?;

        // Local source repositories are pulled up to date before cloning.
        for source in [&self.config.puppet_src, &self.config.puppet_private] {
            if source.is_dir() {
                debug!(source = %source.display(), "refreshing local repository");
                self.workspace.refresh(source).await?;
            }
        }
        info!(base = %self.dirs.base_dir.display(), "preparing workspace");
        self.workspace.prepare().await?;

        let aggregator = Arc::new(StateAggregator::new(selection.all()));
        let reporter: Arc<dyn Reporter> = match &self.reporter_override {
            Some(reporter) => reporter.clone(),
            None => Arc::new(HtmlReporter::new(self.dirs.output_dir.clone(), ctx.clone())),
        };
        let scheduler = Scheduler::new(self.config.pool_size, self.config.fail_fast);

        for realm in [Realm::Production, Realm::Cloud] {
            let hosts = selection.for_realm(realm);
            if hosts.is_empty() {
                continue;
            }
            info!(%realm, hosts = hosts.len(), "compiling realm partition");
            self.workspace.update_config(realm).await?;

            let workers: Vec<HostWorker> = hosts
                .iter()
                .map(|hostname| {
                    HostWorker::new(
                        hostname,
                        &self.dirs,
                        self.config.puppet_var.clone(),
                        self.compiler.clone(),
                        reporter.clone(),
                    )
                })
                .collect();
            scheduler
                .run(workers, aggregator.clone(), reporter.clone())
                .await?;
            info!("{}", aggregator.summary(true));

            if self.config.fail_fast && aggregator.run_failed() {
                warn!("failing fast: skipping any remaining realm");
                break;
            }
        }

        let final_states = aggregator.snapshot();
        reporter.render_index(&final_states, false).await?;
        info!("{}", final_states.summary(false));
        info!(
            "run finished; results at {}/{}/",
            self.config.http_url.trim_end_matches('/'),
            self.job_id
        );

        if self.keep_workspace {
            info!("keeping the working trees for reuse");
        } else {
            self.workspace.cleanup().await?;
        }

        Ok(final_states.run_failed())
    }
}
