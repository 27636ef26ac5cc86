//! CLI error type with exit code mapping

use miette::Diagnostic;
use thiserror::Error;

use catdiff_run::RunError;

use crate::exit_codes;

#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    /// Bad configuration or selector input; nothing was compiled.
    #[error("{message}")]
    #[diagnostic(code(catdiff::usage))]
    Usage {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// The run itself broke down.
    #[error("{message}")]
    #[diagnostic(code(catdiff::run))]
    Run { message: String },
}

impl CliError {
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::Usage { .. } => exit_codes::USAGE_ERROR,
            CliError::Run { .. } => exit_codes::RUN_FAILURE,
        }
    }
}

impl From<RunError> for CliError {
    fn from(error: RunError) -> Self {
        if error.is_usage() {
            let help = match &error {
                RunError::NoHosts => {
                    Some("check the NODES expression or the fact store contents".to_string())
                }
                _ => None,
            };
            CliError::Usage {
                message: error.to_string(),
                help,
            }
        } else {
            CliError::Run {
                message: error.to_string(),
            }
        }
    }
}
