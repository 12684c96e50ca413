use clap::Parser;
use mcp_conform::cli::Cli;
use mcp_conform::telemetry::logging as logctl;
use mcp_conform::{HarnessError, Narrator, run_target};
use tracing::debug;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("❌ {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), HarnessError> {
    let cli = Cli::parse();
    let log_config = cli.logging.to_config();
    logctl::init(&log_config).map_err(|err| HarnessError::Logging(err.to_string()))?;
    debug!(log_level = ?log_config.level, log_file = ?log_config.file, "logging configured");

    let config = cli.to_config();
    let mut narrator = Narrator::stderr();
    let report = run_target(&cli.target, &config, &mut narrator).await?;
    narrator.summary(&report);
    Ok(())
}
