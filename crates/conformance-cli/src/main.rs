//! Connector conformance CLI
//!
//! Drives a payment connector through a named transaction flow and writes
//! the run artifacts under `output/`.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

/// connector-test - Payment connector conformance harness
#[derive(Parser, Debug)]
#[command(name = "connector-test")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Connector name, e.g. `bambora`
    pub connector: String,

    /// Flow to run: auth-psync, auth-capture, auth-refund-rsync, auth-void,
    /// or the name of a file in `flows/`
    pub flow: String,

    /// Ask for confirmation before each step
    #[arg(short, long)]
    pub interactive: bool,

    /// Log request bodies and (masked) headers
    #[arg(short, long)]
    pub debug: bool,

    /// Repository root holding configs, templates and validation rules
    #[arg(long, default_value = ".", env = "CONNECTOR_TEST_ROOT")]
    pub root: PathBuf,

    /// Connector config file (defaults to `{root}/configs/{connector}.json`)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Env file with credential overrides (defaults to `{root}/.env`)
    #[arg(long)]
    pub env_file: Option<PathBuf>,

    /// Output root (defaults to `{root}/output`)
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// grpcurl binary
    #[arg(long, default_value = "grpcurl", env = "GRPCURL")]
    pub grpcurl: PathBuf,

    /// Per-call timeout in seconds (overrides `timeoutSecs` in the config)
    #[arg(long)]
    pub timeout: Option<u64>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match commands::run::run(cli).await {
        Ok(status) => status.into(),
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
