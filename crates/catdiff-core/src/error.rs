//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("failed to parse catalog JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("invalid catalog: {message}")]
    InvalidCatalog { message: String },

    #[error("invalid resource: {message}")]
    InvalidResource { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
