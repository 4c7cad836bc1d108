//! yield-sentinel - Risk-aware DeFi yield decision engine
//!
//! Scores opportunities, sizes allocations and runs strategies through the
//! decision pipeline behind a persistent circuit breaker.

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use yield_sentinel::adapters::cli::{self, CliApp};
use yield_sentinel::config::{load_config, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists (secrets go here, not in config.toml)
    dotenvy::dotenv().ok();

    let app = CliApp::parse();

    let config = match app.config {
        Some(ref path) => load_config(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => Config::default(),
    };

    init_logging(app.verbose, app.debug, &config.logging.level);

    cli::execute(app.command, config).await
}

/// Flags win over RUST_LOG, which wins over `[logging].level`
fn init_logging(verbose: bool, debug: bool, configured_level: &str) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else if verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(configured_level))
    };

    fmt().with_env_filter(filter).with_target(false).init();
}
