//! Sweep command: one expiry pass and exit
//!
//! Useful from cron or when diagnosing a backlog of stale pending
//! sessions after an outage.

use crate::commands::{open_buffer, open_store};
use crate::config::Config;
use crate::expiry::PeriodicSweep;
use crate::notify::{Notifier, NullNotifier};
use colored::Colorize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Run a single sweep pass
pub async fn run_sweep(config: Config) -> anyhow::Result<()> {
    let store = Arc::new(open_store(&config)?);
    let buffer = Arc::new(open_buffer(&config));
    let notifier: Arc<dyn Notifier> = Arc::new(NullNotifier);

    let sweep = PeriodicSweep::new(
        store,
        buffer,
        notifier,
        config.sweep_interval(),
        CancellationToken::new(),
    );

    let expired = sweep.sweep_once().await?;
    if expired == 0 {
        println!("{}", "No pending sessions past their deadline.".green());
    } else {
        println!("{}", format!("Expired {} session(s).", expired).yellow());
    }

    Ok(())
}
