//! # Tools - Player Identity Server
//!
//! Runs the player identity core as a standalone process: loads the
//! configuration, opens storage, warms the player cache and serves an operator
//! console standing in for the host server's player events.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run with default configuration (sled storage under data/users)
//! tools
//!
//! # Specify custom configuration
//! tools --config production.toml
//!
//! # Throwaway in-memory storage with verbose logs
//! tools --backend memory --log-level debug
//!
//! # JSON logging for production
//! tools --json-logs
//! ```
//!
//! ## Configuration
//!
//! The configuration is read from a TOML file (default: `config.toml`). If the
//! file doesn't exist, a default configuration will be created.
//!
//! ## Signal Handling
//!
//! SIGINT and SIGTERM (Ctrl+C on Windows) or a `stop` console line trigger the
//! shutdown flush. A second signal exits immediately.

use tracing::error;

mod app;
mod cli;
mod config;
mod console;
mod logging;
mod signals;

use app::Application;
use cli::CliArgs;

/// Entry point called from `main`.
///
/// Exits the process with status 1 on configuration, startup or flush
/// failure.
pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let mut config = match AppConfig::load_from_file(&args.config_path).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Failed to load {}: {e}", args.config_path.display());
            std::process::exit(1);
        }
    };
    config.apply_overrides(&args);

    // Setup logging before anything else
    if let Err(e) = logging::setup_logging(&config.logging) {
        eprintln!("❌ Failed to setup logging: {e}");
        std::process::exit(1);
    }

    if let Err(e) = config.validate() {
        error!("❌ Configuration validation failed: {e}");
        std::process::exit(1);
    }

    match Application::new(config).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {e}");
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("❌ Failed to start application: {e}");
            std::process::exit(1);
        }
    }

    Ok(())
}

// Re-export main types for potential library usage
pub use config::{AppConfig, LoggingSettings};
pub use console::{ConsoleCommand, ConsoleExit};
