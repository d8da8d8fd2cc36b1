use std::path::PathBuf;

use clap::Parser;
use quantloop::config::Config;
use quantloop::engine::Engine;
use tokio::signal;
use tracing::{error, info};

/// Run the quantloop heartbeat until Ctrl-C.
#[derive(Debug, Parser)]
#[command(name = "quantloop", version, about)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            std::process::exit(1);
        }
    };

    config.init_logging();
    info!(config = %cli.config.display(), "quantloop starting");

    let mut engine = Engine::new(&config);
    if let Err(e) = engine
        .run_until(async {
            if let Err(e) = signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await
    {
        error!(error = %e, "Fatal error");
        std::process::exit(1);
    }

    info!("quantloop stopped");
}
