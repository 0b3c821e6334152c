//! Serve command: run the periodic sweep until interrupted
//!
//! The deferred per-request timers live in whichever process handles
//! inbound events; this loop is the restart-safe half of expiry. It runs
//! against the persisted deadlines on a fixed cadence and shuts down
//! cleanly on ctrl-c.

use crate::commands::{open_buffer, open_store};
use crate::config::Config;
use crate::expiry::PeriodicSweep;
use crate::notify::{Notifier, NullNotifier};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Run the sweep loop until ctrl-c
pub async fn run_serve(config: Config) -> anyhow::Result<()> {
    #[cfg(feature = "prometheus")]
    {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .install()
            .map_err(|e| anyhow::anyhow!("failed to install Prometheus exporter: {}", e))?;
        tracing::info!("Prometheus exporter installed");
    }

    let store = Arc::new(open_store(&config)?);
    let buffer = Arc::new(open_buffer(&config));
    let notifier: Arc<dyn Notifier> = Arc::new(NullNotifier);

    let shutdown = CancellationToken::new();
    let sweep = PeriodicSweep::new(
        store,
        buffer,
        notifier,
        config.sweep_interval(),
        shutdown.clone(),
    );

    tracing::info!(
        "sweep running every {}s (pending window {}s)",
        config.session.sweep_interval_seconds,
        config.session.pending_window_seconds
    );
    let handle = tokio::spawn(sweep.run());

    tokio::signal::ctrl_c().await?;
    tracing::info!("interrupt received, shutting down");
    shutdown.cancel();
    handle.await?;

    Ok(())
}
