//! Run configuration
//!
//! Loaded from an optional YAML file. Unknown keys and values of the wrong
//! type are fatal; a missing file falls back to the defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

use crate::error::{Result, RunError};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ControllerConfig {
    /// Url under which results will be found
    pub http_url: String,

    /// Base working directory of the compiler
    pub base: PathBuf,

    /// Location of the configuration source repository
    pub puppet_src: PathBuf,

    /// Location of the private overlay repository
    pub puppet_private: PathBuf,

    /// Location of the generated hiera data repository
    pub puppet_netbox: PathBuf,

    /// Directory hosting the compiler's runtime files, facts included
    pub puppet_var: PathBuf,

    /// Scheduler admission gate
    pub pool_size: usize,

    /// Cancel the run on the first failing host
    pub fail_fast: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            http_url: "https://puppet-compiler.wmflabs.org/html".to_string(),
            base: PathBuf::from("/mnt/jenkins-workspace"),
            puppet_src: PathBuf::from("/var/lib/catalog-differ/production"),
            puppet_private: PathBuf::from("/var/lib/catalog-differ/private"),
            puppet_netbox: PathBuf::from("/var/lib/catalog-differ/netbox-hiera"),
            puppet_var: PathBuf::from("/var/lib/catalog-differ/puppet"),
            pool_size: 2,
            fail_fast: false,
        }
    }
}

impl ControllerConfig {
    /// Load the configuration, merging the file (when present) over the
    /// defaults. A missing file is tolerated, malformed content is not.
    pub fn from_file(configfile: Option<&Path>) -> Result<Self> {
        let Some(path) = configfile else {
            return Ok(Self::default());
        };
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                warn!(config = %path.display(), "configuration file not found, using defaults");
                return Ok(Self::default());
            }
            Err(error) => {
                return Err(RunError::Config {
                    message: format!("cannot read {}: {error}", path.display()),
                });
            }
        };
        serde_yaml::from_str(&text).map_err(|error| RunError::Config {
            message: format!("cannot parse {}: {error}", path.display()),
        })
    }

    /// Sanity limits that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(RunError::Config {
                message: "pool_size must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
