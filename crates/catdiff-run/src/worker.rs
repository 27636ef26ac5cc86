//! Per-host worker
//!
//! One worker owns one host for one run and drives it through
//! compile-base, compile-change, diff, classify and publish. Compile
//! artifacts already on disk are reused, which makes re-running a worker
//! for the same host idempotent and cheap.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::Compression;
use flate2::write::GzEncoder;
use tracing::{error, info};

use tokio_util::sync::CancellationToken;

use catdiff_core::{Catalog, CatalogDiff, HostResult};

use crate::directories::{Directories, HostFiles};
use crate::error::{Result, RunError};
use crate::facts;
use crate::ports::{CompileLabel, CompileStatus, Compiler, Reporter};

#[derive(Debug, Default)]
struct DiffBundle {
    diff: Option<CatalogDiff>,
    core_diff: Option<CatalogDiff>,
    full_diff: Option<CatalogDiff>,
}

pub struct HostWorker {
    files: HostFiles,
    puppet_var: PathBuf,
    compiler: Arc<dyn Compiler>,
    reporter: Arc<dyn Reporter>,
    change_src: PathBuf,
}

impl HostWorker {
    pub fn new(
        hostname: &str,
        dirs: &Directories,
        puppet_var: PathBuf,
        compiler: Arc<dyn Compiler>,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            files: dirs.host_files(hostname),
            puppet_var,
            compiler,
            reporter,
            change_src: dirs.change_dir.join("src"),
        }
    }

    pub fn hostname(&self) -> &str {
        self.files.hostname()
    }

    /// Run the state machine to completion. `Err` is reserved for
    /// unexpected failures; every per-host verdict comes back as `Ok`.
    pub async fn run(self, cancel: CancellationToken) -> Result<HostResult> {
        let hostname = self.hostname().to_string();
        if cancel.is_cancelled() {
            return Ok(HostResult::cancelled(hostname));
        }

        let Some(facts_path) = facts::facts_file(&self.puppet_var, &hostname) else {
            error!(host = %hostname, "unable to find facts, skipping");
            return Ok(HostResult::missing_facts(hostname));
        };
        facts::refresh_facts_timestamps(&facts_path)?;

        let base_ok = match self.compile(CompileLabel::Base, &cancel).await {
            Err(RunError::Cancelled) => return Ok(HostResult::cancelled(hostname)),
            outcome => outcome?,
        };
        // A base failure does not short-circuit: the change side decides
        // between noop and error.
        let change_ok = match self.compile(CompileLabel::Change, &cancel).await {
            Err(RunError::Cancelled) => return Ok(HostResult::cancelled(hostname)),
            outcome => outcome?,
        };

        let (has_diff, has_core_diff, bundle) = if base_ok && change_ok {
            if cancel.is_cancelled() {
                return Ok(HostResult::cancelled(hostname));
            }
            info!(host = %hostname, "calculating diffs");
            match self.make_diff() {
                Ok(bundle) => {
                    let has_diff = bundle.diff.as_ref().map(|_| true);
                    (has_diff, bundle.core_diff.is_some(), bundle)
                }
                Err(diff_error) => {
                    error!(host = %hostname, error = %diff_error, "diffing the catalogs failed");
                    (Some(false), false, DiffBundle::default())
                }
            }
        } else {
            (None, false, DiffBundle::default())
        };

        let result = HostResult::new(
            hostname.clone(),
            !base_ok,
            !change_ok,
            has_diff,
            has_core_diff,
        );
        // Publish failures are logged but never change the verdict.
        if let Err(publish_error) = self.publish(&result, &bundle).await {
            error!(host = %hostname, error = %publish_error, "error preparing output");
        }
        Ok(result)
    }

    /// Compile one side, reusing an artifact another worker already wrote.
    async fn compile(&self, label: CompileLabel, cancel: &CancellationToken) -> Result<bool> {
        if let Some(compiled_ok) = self.check_if_compiled(label) {
            info!(host = %self.hostname(), %label, "reusing existing compile artifact");
            return Ok(compiled_ok);
        }
        if cancel.is_cancelled() {
            return Err(RunError::Cancelled);
        }
        let extra_flags = match label {
            CompileLabel::Base => Vec::new(),
            CompileLabel::Change => self.change_flags()?,
        };
        info!(host = %self.hostname(), %label, "compiling");
        let status = self
            .compiler
            .compile(self.hostname(), label, &self.puppet_var, &extra_flags, cancel)
            .await?;
        match status {
            CompileStatus::Ok => Ok(true),
            CompileStatus::FailedWithCode { code, .. } => {
                error!(host = %self.hostname(), %label, code, "compilation failed");
                Ok(false)
            }
        }
    }

    /// A non-empty catalog means a successful earlier compile, an error
    /// file a failed one. Nothing on disk means not compiled yet.
    fn check_if_compiled(&self, label: CompileLabel) -> Option<bool> {
        if let Ok(meta) = std::fs::metadata(self.files.catalog(label))
            && meta.len() > 0
        {
            return Some(true);
        }
        if self.files.errors(label).is_file() {
            return Some(false);
        }
        None
    }

    /// Extra compiler flags for the change side, one per line of the
    /// change tree's `.configs` file, normalized to exactly two dashes.
    fn change_flags(&self) -> Result<Vec<String>> {
        let path = self.change_src.join(".configs");
        if !path.is_file() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| format!("--{}", line.trim_start_matches('-')))
            .collect())
    }

    /// Compute the three diffs and write the diff artifact.
    fn make_diff(&self) -> Result<DiffBundle> {
        let base = Catalog::from_path(&self.files.catalog(CompileLabel::Base))?;
        let change = Catalog::from_path(&self.files.catalog(CompileLabel::Change))?;

        let diff = base.diff_intersection(&change, false);
        let core_diff = base.diff_intersection(&change, true);
        let full_diff = base.diff_union(&change, false);

        if let Some(diff) = &diff {
            let diff_path = self.files.diff();
            if let Some(parent) = diff_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&diff_path, diff.format_text())?;
        }

        Ok(DiffBundle {
            diff,
            core_diff,
            full_diff,
        })
    }

    /// Copy the artifacts into the output tree and render the host report.
    async fn publish(&self, result: &HostResult, bundle: &DiffBundle) -> Result<()> {
        std::fs::create_dir_all(self.files.outdir())?;
        for label in [CompileLabel::Base, CompileLabel::Change] {
            let catalog = self.files.catalog(label);
            if catalog.is_file() {
                gzip_file(&catalog, &self.files.out_catalog_gz(label))?;
            }
            let errors = self.files.errors(label);
            if errors.is_file() {
                std::fs::copy(&errors, self.files.out_errors(label))?;
            }
        }
        let diff_file = self.files.diff();
        if diff_file.is_file() {
            std::fs::copy(&diff_file, self.files.out_diff())?;
        }

        self.reporter
            .render_host(
                self.hostname(),
                result.outcome(),
                bundle.diff.as_ref(),
                bundle.core_diff.as_ref(),
                bundle.full_diff.as_ref(),
            )
            .await
    }
}

fn gzip_file(source: &Path, target: &Path) -> Result<()> {
    let content = std::fs::read(source)?;
    let file = std::fs::File::create(target)?;
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder.write_all(&content)?;
    encoder.finish()?;
    Ok(())
}
