//! catdiff - compile fleet configuration catalogs twice and diff them
//!
//! Designed to run under CI: the change, the build number and the host
//! selection usually arrive via environment variables.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use catdiff_run::directory::{DEFAULT_PUPPETDB_URL, PuppetDbDirectory};
use catdiff_run::puppet::PuppetCompiler;
use catdiff_run::workspace::GitWorkspace;
use catdiff_run::{Controller, ControllerConfig, Directories};

mod error;
mod exit_codes;

use error::CliError;

#[derive(Parser)]
#[command(name = "catdiff")]
#[command(version)]
#[command(about = "See how a proposed change affects compiled catalogs", long_about = None)]
struct Cli {
    /// Change number to compile against the mainline
    #[arg(long, env = "CHANGE")]
    change_id: u64,

    /// Build number namespacing the working trees and the output
    #[arg(long, env = "BUILD_NUMBER")]
    job_id: u64,

    /// Host selector expression; empty selects every known host
    #[arg(long, env = "NODES", default_value = "", hide_env_values = true)]
    nodes: String,

    /// Configuration file
    #[arg(short, long, env = "PC_CONFIG")]
    config: Option<PathBuf>,

    /// Host directory service URL
    #[arg(long, env = "PUPPETDB_URL", default_value = DEFAULT_PUPPETDB_URL)]
    puppetdb_url: String,

    /// Keep the working trees after the run for local inspection
    #[arg(long)]
    force: bool,

    /// Print debug output
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.debug);

    match run(cli).await {
        Ok(false) => ExitCode::from(exit_codes::SUCCESS),
        Ok(true) => {
            error!("run failed: at least one host did not survive the change");
            ExitCode::from(exit_codes::RUN_FAILURE)
        }
        Err(cli_error) => {
            let code = cli_error.exit_code();
            eprintln!("{:?}", miette::Report::new(cli_error));
            ExitCode::from(code)
        }
    }
}

async fn run(cli: Cli) -> Result<bool, CliError> {
    let config = ControllerConfig::from_file(cli.config.as_deref())?;
    let dirs = Directories::new(&config.base, cli.job_id);

    let workspace = Arc::new(GitWorkspace::new(&config, dirs.clone(), cli.change_id));
    let compiler = Arc::new(PuppetCompiler::new(dirs));
    let directory = Arc::new(PuppetDbDirectory::new(cli.puppetdb_url)?);

    let controller = Controller::new(
        config,
        cli.change_id,
        cli.job_id,
        cli.nodes,
        workspace,
        compiler,
        directory,
    )?
    .keep_workspace(cli.force);

    Ok(controller.run().await?)
}

fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
