//! Deadline expiry: deferred timers and the periodic sweep
//!
//! Two redundant paths expire a pending session whose acceptance window
//! ran out. The deferred timer spawned per request is a latency
//! optimization; the periodic sweep against the persisted deadline is the
//! source of truth and covers process restarts that lost in-flight
//! timers. Both ride the same conditional transition, so whichever fires
//! second observes `StaleState` and backs off without a second
//! notification.

use crate::buffer::MessageBuffer;
use crate::error::{ConsultError, Result};
use crate::notify::{deliver_best_effort, Notification, NotificationKind, Notifier};
use crate::session::SessionStore;
use chrono::{DateTime, Utc};
use metrics::{counter, increment_counter};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Expire one pending session, if it is still pending
///
/// The shared primitive behind the timer, the sweep's per-row path, and
/// the reconciliation gate's inline check. Returns `true` when this call
/// performed the transition; `false` when another actor beat us to it
/// (the benign `StaleState` race).
///
/// On the winning path the session's buffer slot is discarded and the
/// client is notified; both are best-effort.
pub async fn expire_session(
    store: &SessionStore,
    buffer: &MessageBuffer,
    notifier: &dyn Notifier,
    session_id: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    use crate::session::SessionStatus;

    let session = match store.transition(session_id, SessionStatus::Pending, SessionStatus::Expired, now)
    {
        Ok(session) => session,
        Err(e) if e.is_stale() => {
            tracing::debug!("session {} already left pending; expiry is a no-op", session_id);
            return Ok(false);
        }
        Err(e) => return Err(e),
    };

    increment_counter!("consultd_sessions_expired_total");

    if let Err(e) = buffer.discard(session_id) {
        tracing::warn!("failed to discard buffer for expired session {}: {}", session_id, e);
    }

    deliver_best_effort(
        notifier,
        Notification::to_participant(&session, session.client_id, NotificationKind::SessionExpired),
    )
    .await;

    Ok(true)
}

/// Spawn the deferred expiry timer for a freshly created request
///
/// Sleeps out the pending window, then expires the session if nothing
/// else did. Cancelled cleanly at shutdown; thanks to the conditional
/// transition a cancelled timer can never leave a half-applied state;
/// the sweep picks the session up instead.
pub fn spawn_expiry_timer(
    store: Arc<SessionStore>,
    buffer: Arc<MessageBuffer>,
    notifier: Arc<dyn Notifier>,
    session_id: String,
    wait: std::time::Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::debug!("expiry timer for session {} cancelled at shutdown", session_id);
            }
            _ = tokio::time::sleep(wait) => {
                match expire_session(&store, &buffer, notifier.as_ref(), &session_id, Utc::now()).await {
                    Ok(true) => tracing::info!("session {} expired by deferred timer", session_id),
                    Ok(false) => {}
                    Err(ConsultError::NotFound { .. }) => {
                        tracing::warn!("expiry timer found no session {}", session_id);
                    }
                    Err(e) => tracing::warn!("expiry timer for session {} failed: {}", session_id, e),
                }
            }
        }
    })
}

/// Fixed-cadence safety net over the persisted deadlines
///
/// Independent of the per-request timers; safe to run concurrently with
/// them and with other sweep instances because `sweep_expired` only
/// returns the rows it transitioned itself.
pub struct PeriodicSweep {
    store: Arc<SessionStore>,
    buffer: Arc<MessageBuffer>,
    notifier: Arc<dyn Notifier>,
    interval: std::time::Duration,
    shutdown: CancellationToken,
}

impl PeriodicSweep {
    /// Build a sweep over the given collaborators
    pub fn new(
        store: Arc<SessionStore>,
        buffer: Arc<MessageBuffer>,
        notifier: Arc<dyn Notifier>,
        interval: std::time::Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            buffer,
            notifier,
            interval,
            shutdown,
        }
    }

    /// Run until the shutdown token fires
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        // The immediate first tick doubles as a catch-up pass after restart
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("periodic sweep stopping");
                    break;
                }
                _ = ticker.tick() => {
                    match self.sweep_once().await {
                        Ok(0) => {}
                        Ok(n) => tracing::info!("sweep expired {} session(s)", n),
                        Err(e) => tracing::warn!("sweep pass failed: {}", e),
                    }
                }
            }
        }
    }

    /// One sweep pass: expire overdue sessions, fan out notifications,
    /// evict dead buffer slots
    pub async fn sweep_once(&self) -> Result<usize> {
        let now = Utc::now();
        let swept = self.store.sweep_expired(now)?;

        for session in &swept {
            increment_counter!("consultd_sessions_expired_total");
            if let Err(e) = self.buffer.discard(&session.id) {
                tracing::warn!("failed to discard buffer for session {}: {}", session.id, e);
            }
            deliver_best_effort(
                self.notifier.as_ref(),
                Notification::to_participant(
                    session,
                    session.client_id,
                    NotificationKind::SessionExpired,
                ),
            )
            .await;
        }

        match self.buffer.evict_due(now) {
            Ok(evicted) if evicted > 0 => {
                counter!("consultd_buffer_slots_evicted_total", evicted as u64);
                tracing::debug!("evicted {} stale buffer slot(s)", evicted);
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("buffer eviction failed: {}", e),
        }

        counter!("consultd_sweep_expired_total", swept.len() as u64);
        Ok(swept.len())
    }
}
