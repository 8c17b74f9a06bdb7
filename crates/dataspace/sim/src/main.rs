//! Dataspace simulator
//!
//! Builds a dataspace from configuration, runs a scenario and prints its
//! report as JSON.

use anyhow::Context;
use clap::Parser;
use dataspace_sim::{logging, scenario, Dataspace, DataspaceConfig};
use tracing::info;

#[derive(Parser)]
#[command(name = "dataspace-sim")]
#[command(about = "Run contract negotiation scenarios on a simulated dataspace", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "DATASPACE_CONFIG")]
    config: Option<String>,

    /// Log level, overrides the configured one
    #[arg(long, env = "DATASPACE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "DATASPACE_LOG_JSON")]
    json: bool,

    /// Scenario to run
    #[arg(short, long, default_value = scenario::BATTERY_PASSPORT)]
    scenario: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config =
        DataspaceConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.logging.json |= cli.json;
    logging::init(&config.logging)?;

    if config.stakeholders.is_empty() {
        config.stakeholders = scenario::battery_passport_config()?.stakeholders;
    }

    let mut dataspace = Dataspace::from_config(&config)?;
    info!(
        connectors = dataspace.parties().count(),
        scenario = %cli.scenario,
        "Dataspace ready"
    );

    let report = scenario::run(&cli.scenario, &mut dataspace)
        .await
        .with_context(|| format!("scenario {} failed", cli.scenario))?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
