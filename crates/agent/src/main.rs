//! vSwitch agent entry point.
//!
//! Loads the agent configuration and a desired state document, converges a
//! simulated dataplane on it and keeps the identity registry persisted
//! until interrupted.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use vswitch_agent::audit::{init_logging, init_logging_pretty};
use vswitch_agent::config::DEFAULT_CONFIG_PATH;
use vswitch_agent::{Agent, AgentConfig, DesiredState};
use vswitch_dpapi::SimDataplane;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
}

/// vSwitch dataplane reconciliation agent
#[derive(Parser, Debug)]
#[command(name = "vswitch-agent")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Agent configuration file (TOML)
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Desired state document (JSON); empty desired state if omitted
    #[arg(short = 'd', long)]
    desired: Option<PathBuf>,

    /// Overrides persistence.state_dir from the configuration file
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Physical interfaces present in the simulated dataplane
    #[arg(long, value_delimiter = ',')]
    physical: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    #[arg(long, value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,
}

async fn run(args: Args) -> anyhow::Result<bool> {
    let mut config = AgentConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(dir) = args.state_dir {
        config.persistence.state_dir = dir;
    }
    let desired = match &args.desired {
        Some(path) => DesiredState::load(path)?,
        None => DesiredState::default(),
    };

    let dataplane = Arc::new(SimDataplane::with_physical(args.physical));
    let mut agent = Agent::new(dataplane, config);
    agent.init().context("agent initialization")?;

    let report = agent.resync(&desired);
    tracing::info!(
        errors = report.error_count,
        duration_ms = report.duration_ms,
        "initial resync complete"
    );

    tokio::signal::ctrl_c()
        .await
        .context("waiting for ctrl-c")?;
    tracing::warn!("received SIGINT, shutting down");
    agent.shutdown().await;
    Ok(report.is_clean())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match args.log_format {
        LogFormat::Json => init_logging(&args.log_level),
        LogFormat::Pretty => init_logging_pretty(&args.log_level),
    }
    tracing::info!(config = %args.config.display(), "starting vswitch-agent");

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => {
            tracing::warn!("exiting after an unclean resync");
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "vswitch-agent failed");
            ExitCode::FAILURE
        }
    }
}
