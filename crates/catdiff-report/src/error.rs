//! Report error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("template rendering failed: {0}")]
    Template(#[from] minijinja::Error),

    #[error("failed to serialize report payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ReportError>;
