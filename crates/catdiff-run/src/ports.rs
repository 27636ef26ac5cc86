//! Ports to the external collaborators
//!
//! The core never implements the compiler, the host-catalog service, the
//! source-control plumbing or the report templates; it drives them through
//! these traits. Implementations must be Send + Sync for use across tasks.

use std::path::Path;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use catdiff_core::{CatalogDiff, HostOutcome, StatesCollection};

use crate::error::Result;
use crate::selector::Realm;

/// Which of the two source trees a compilation runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompileLabel {
    Base,
    Change,
}

impl CompileLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompileLabel::Base => "base",
            CompileLabel::Change => "change",
        }
    }

    /// Prefix of the published artifacts for this side.
    pub fn artifact_prefix(&self) -> &'static str {
        match self {
            CompileLabel::Base => "prod",
            CompileLabel::Change => "change",
        }
    }
}

impl std::fmt::Display for CompileLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one compiler invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileStatus {
    Ok,
    /// Non-zero exit; carries the exit code and the tail of the error log.
    FailedWithCode { code: i32, output: Vec<String> },
}

impl CompileStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, CompileStatus::Ok)
    }
}

/// The external catalog compiler.
///
/// On success the implementation writes the catalog artifact to the
/// well-known per-host path of the tree it compiled against; on failure it
/// writes the error log instead. A cancelled compilation must kill its
/// child process and return `RunError::Cancelled`.
#[async_trait]
pub trait Compiler: Send + Sync {
    async fn compile(
        &self,
        hostname: &str,
        label: CompileLabel,
        vardir: &Path,
        extra_flags: &[String],
        cancel: &CancellationToken,
    ) -> Result<CompileStatus>;

    /// Probe the compiler version once per run.
    async fn version(&self) -> Result<String>;
}

/// One host as known to the host-catalog service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub certname: String,
    pub tags: Vec<String>,
}

/// The host-catalog service used to resolve selector expressions.
#[async_trait]
pub trait HostDirectory: Send + Sync {
    async fn hosts_with_role(&self, role: &str) -> Result<Vec<NodeInfo>>;

    async fn hosts_with_profile(&self, profile: &str) -> Result<Vec<NodeInfo>>;

    async fn hosts_with_class(&self, class: &str) -> Result<Vec<NodeInfo>>;

    /// Hosts declaring at least one resource of the given type.
    async fn hosts_with_resource(&self, resource_type: &str) -> Result<Vec<NodeInfo>>;

    /// Free-form query passed through to the service.
    async fn query(&self, query: &str) -> Result<Vec<NodeInfo>>;
}

/// The paired base/change source trees materialised on disk for one run.
#[async_trait]
pub trait Workspace: Send + Sync {
    /// Clone both trees, apply the change to the change tree.
    async fn prepare(&self) -> Result<()>;

    /// Bring a local source repository up to date before the run.
    async fn refresh(&self, source: &Path) -> Result<()>;

    /// Rewrite realm-specific data files in both trees. Must be called
    /// before each realm's compilations.
    async fn update_config(&self, realm: Realm) -> Result<()>;

    /// Remove the working trees, preserving the output tree.
    async fn cleanup(&self) -> Result<()>;

    /// Paths changed by the proposed change, relative to the source root.
    async fn changed_files(&self) -> Result<Vec<String>>;
}

/// One-way sink for rendered results.
#[async_trait]
pub trait Reporter: Send + Sync {
    async fn render_host(
        &self,
        hostname: &str,
        outcome: HostOutcome,
        diff: Option<&CatalogDiff>,
        core_diff: Option<&CatalogDiff>,
        full_diff: Option<&CatalogDiff>,
    ) -> Result<()>;

    async fn render_index(&self, states: &StatesCollection, partial: bool) -> Result<()>;
}
