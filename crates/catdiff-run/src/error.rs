//! Error types for the orchestration layer

use thiserror::Error;

/// Result type for catdiff-run operations
pub type Result<T> = std::result::Result<T, RunError>;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RunError {
    /// Invalid or unloadable configuration
    #[error("configuration error: {message}")]
    Config { message: String },

    /// The host selector resolved to an empty set
    #[error("the host selector resolved to no hosts")]
    NoHosts,

    /// A selector token could not be interpreted
    #[error("invalid selector token '{token}': {message}")]
    InvalidSelector { token: String, message: String },

    /// Host directory query failure
    #[error("host directory query failed: {message}")]
    Directory { message: String },

    /// Workspace preparation or teardown failure
    #[error("workspace error: {message}")]
    Workspace { message: String },

    /// The external compiler could not be invoked
    #[error("compiler invocation failed: {message}")]
    Compiler { message: String },

    /// The run was cancelled while waiting on an operation
    #[error("operation cancelled")]
    Cancelled,

    /// Scheduler-internal failure (a worker task died)
    #[error("scheduler error: {message}")]
    Scheduler { message: String },

    #[error(transparent)]
    Catalog(#[from] catdiff_core::CoreError),

    #[error(transparent)]
    Report(#[from] catdiff_report::ReportError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl RunError {
    /// Errors that should surface as a usage / configuration failure of the
    /// surrounding CLI rather than a run failure.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            RunError::Config { .. } | RunError::NoHosts | RunError::InvalidSelector { .. }
        )
    }
}
