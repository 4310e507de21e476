mod server;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use ballot_core::{logging, Config};

use server::BallotServer;

#[derive(Parser, Debug)]
#[command(name = "ballot")]
#[command(about = "Planning poker server", long_about = None)]
struct Args {
    /// Path to a YAML/TOML config file
    #[arg(long, short, env = "BALLOT_CONFIG_PATH")]
    config: Option<String>,
}

/// Generate a unique node ID for this server instance
fn generate_node_id() -> String {
    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    format!("{hostname}-{}", nanoid::nanoid!(6))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load configuration
    let config = Config::load(args.config.as_deref())?;

    // 2. Validate configuration (fail fast on misconfigurations)
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    // 3. Initialize logging
    logging::init_logging(&config.logging)?;
    info!(node_id = %generate_node_id(), "Ballot server starting...");
    info!("HTTP address: {}", config.http_address());

    // 4. Build and run
    let server = BallotServer::build(&config).await?;
    server.run(&config).await
}
