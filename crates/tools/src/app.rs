//! Main application logic and lifecycle management.
//!
//! The `Application` opens storage, starts the user manager, serves the
//! operator console and performs the shutdown flush.

use crate::{
    config::AppConfig,
    console::{self, ConsoleExit},
    logging::display_banner,
    signals::{wait_for_shutdown_signal, wait_for_shutdown_signal_silent},
};
use std::sync::Arc;
use tokio::io::BufReader;
use tools_core::{open_store, UserManager};
use tracing::{error, info, warn};

/// Running application: configuration plus the started user manager.
pub struct Application {
    config: AppConfig,
    manager: Arc<UserManager>,
}

impl Application {
    /// Opens the configured store and starts the user manager.
    ///
    /// The configuration must already be merged with CLI overrides and
    /// validated. Storage that cannot be opened, provisioned or loaded is
    /// fatal here.
    pub async fn new(config: AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        display_banner();

        let store = open_store(&config.storage)?;
        let manager = UserManager::start(store, &config.writer).await?;

        info!("🚀 Tools v{} ready", env!("CARGO_PKG_VERSION"));
        Ok(Self { config, manager })
    }

    /// Shared handle to the user manager.
    pub fn manager(&self) -> Arc<UserManager> {
        Arc::clone(&self.manager)
    }

    /// Serves the console until `stop` or a shutdown signal, then flushes.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        self.log_configuration_summary();
        info!("✅ Tools is now running!");
        info!("⌨️ Type 'help' for console commands, 'stop' or Ctrl+C to shut down");

        let console_manager = self.manager();
        let console = async move {
            let stdin = BufReader::new(tokio::io::stdin());
            if console::serve(&console_manager, stdin).await == ConsoleExit::EndOfInput {
                info!("⌨️ Console input closed, waiting for a shutdown signal");
                std::future::pending::<()>().await;
            }
        };

        tokio::select! {
            _ = console => {}
            result = wait_for_shutdown_signal() => result?,
        }

        // merciless shutdown
        tokio::spawn(async move {
            if let Err(e) = wait_for_shutdown_signal_silent().await {
                error!("Failed to set up merciless shutdown signal handler: {e}");
                return;
            }

            warn!("Shutdown handler received again! I'll make this quick.");
            std::process::exit(1);
        });

        info!("💾 Flushing player data...");
        let report = self.manager.shutdown(self.config.writer.shutdown_timeout()).await;
        if !report.drained {
            warn!("⏰ Persist queue did not drain in time, pending writes went to the final flush");
        }

        self.log_final_statistics();
        if report.failed > 0 {
            return Err(format!("{} players could not be saved", report.failed).into());
        }

        info!("✅ Tools shutdown complete");
        Ok(())
    }

    fn log_configuration_summary(&self) {
        info!("📋 Configuration Summary:");
        info!("  💾 Storage: {} ({})", self.config.storage.backend, self.config.storage.path.display());
        info!(
            "  🧵 Persist workers: {} | attempts: {} | backoff: {}-{}ms",
            self.config.writer.worker_count(),
            self.config.writer.max_attempts,
            self.config.writer.initial_backoff_ms,
            self.config.writer.max_backoff_ms
        );
        info!("  ⏱️ Shutdown timeout: {}s", self.config.writer.shutdown_timeout_secs);
        info!("  👥 Known players: {}", self.manager.len());
    }

    fn log_final_statistics(&self) {
        let stats = self.manager.stats();
        info!("📊 Final Statistics:");
        info!("  - Players known: {}", self.manager.len());
        info!("  - Writes queued: {}", stats.enqueued);
        info!("  - Writes completed: {}", stats.completed);
        info!("  - Retries: {}", stats.retried);
        info!("  - Durability failures: {}", stats.failed);
    }
}
