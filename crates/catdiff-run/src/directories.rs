//! On-disk layout of one run
//!
//! ```text
//! <base>/<job_id>/production/   base tree (src, private, catalogs)
//! <base>/<job_id>/change/       change tree
//! <base>/<job_id>/diffs/        computed diffs
//! <base>/output/<job_id>/       published artifacts, survives cleanup
//! ```

use std::path::{Path, PathBuf};

use crate::ports::CompileLabel;

#[derive(Debug, Clone)]
pub struct Directories {
    pub base_dir: PathBuf,
    pub prod_dir: PathBuf,
    pub change_dir: PathBuf,
    pub diff_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl Directories {
    pub fn new(base: &Path, job_id: u64) -> Self {
        let base_dir = base.join(job_id.to_string());
        Self {
            prod_dir: base_dir.join("production"),
            change_dir: base_dir.join("change"),
            diff_dir: base_dir.join("diffs"),
            output_dir: base.join("output").join(job_id.to_string()),
            base_dir,
        }
    }

    /// Root of the source tree compiled for the given label.
    pub fn tree(&self, label: CompileLabel) -> &Path {
        match label {
            CompileLabel::Base => &self.prod_dir,
            CompileLabel::Change => &self.change_dir,
        }
    }

    pub fn host_files(&self, hostname: &str) -> HostFiles {
        HostFiles {
            hostname: hostname.to_string(),
            dirs: self.clone(),
        }
    }
}

/// Well-known paths for one host's artifacts.
#[derive(Debug, Clone)]
pub struct HostFiles {
    hostname: String,
    dirs: Directories,
}

impl HostFiles {
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Compiled catalog inside the working tree.
    pub fn catalog(&self, label: CompileLabel) -> PathBuf {
        self.dirs
            .tree(label)
            .join("catalogs")
            .join(format!("{}.pson", self.hostname))
    }

    /// Compilation error log inside the working tree.
    pub fn errors(&self, label: CompileLabel) -> PathBuf {
        self.dirs
            .tree(label)
            .join("catalogs")
            .join(format!("{}.err", self.hostname))
    }

    /// Diff file inside the working tree.
    pub fn diff(&self) -> PathBuf {
        self.dirs.diff_dir.join(format!("{}.diff", self.hostname))
    }

    /// Per-host directory in the published output tree.
    pub fn outdir(&self) -> PathBuf {
        self.dirs.output_dir.join(&self.hostname)
    }

    /// Published, gzipped catalog.
    pub fn out_catalog_gz(&self, label: CompileLabel) -> PathBuf {
        self.outdir()
            .join(format!("{}.{}.catalog.gz", label.artifact_prefix(), self.hostname))
    }

    /// Published error log.
    pub fn out_errors(&self, label: CompileLabel) -> PathBuf {
        self.outdir()
            .join(format!("{}.{}.err", label.artifact_prefix(), self.hostname))
    }

    /// Published diff, next to the host directory.
    pub fn out_diff(&self) -> PathBuf {
        self.dirs.output_dir.join(format!("{}.diff", self.hostname))
    }
}
