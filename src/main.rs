//! consultd - Consultation lifecycle engine CLI
//!
//! Main entry point for the consultd operator binary.

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use consultd::cli::{Cli, Commands};
use consultd::commands;
use consultd::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    init_tracing();

    // Parse command line arguments
    let cli = Cli::parse_args();

    // If the user supplied a database path on the CLI, mirror it into
    // CONSULTD_DB so the store initializer can pick it up. This keeps
    // callers unchanged while allowing `SessionStore::new()` to honor an
    // override.
    if let Some(db_path) = &cli.db_path {
        std::env::set_var("CONSULTD_DB", db_path);
        tracing::info!("Using database override from CLI: {}", db_path);
    }

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/consultd.yaml");
    let config = Config::load(config_path)?;

    // Validate configuration
    config.validate()?;

    // Execute command
    match cli.command {
        Commands::Serve => {
            tracing::info!("Starting consultd serve loop");
            commands::serve::run_serve(config).await?;
            Ok(())
        }
        Commands::Sweep => {
            tracing::info!("Running one-shot expiry sweep");
            commands::sweep::run_sweep(config).await?;
            Ok(())
        }
        Commands::Sessions { command } => {
            commands::sessions::handle_sessions(&config, command)?;
            Ok(())
        }
    }
}

/// Initialize tracing subscriber with environment filter
fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("consultd=info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
