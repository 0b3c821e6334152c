//! State reconciliation gate
//!
//! The conversational cursor tracks which lifecycle phase a user's chat
//! client believes it is in. It is a derived, reconstructible cache of
//! the session record, and the record is always ground truth. The gate runs
//! before every inbound event, repairs any divergence (crashed process,
//! dropped notification, stale client), and enforces the pending deadline
//! inline as a third expiry path beside the timer and the sweep.
//!
//! The gate never raises to the caller: divergence is fixed and reported,
//! never crashed on. A swallowed event must be reissued by the user.

use crate::buffer::MessageBuffer;
use crate::expiry;
use crate::notify::Notifier;
use crate::session::{SessionId, SessionStatus, SessionStore, UserId};
use chrono::Utc;
use metrics::increment_counter;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// The lifecycle phase a user's client believes it is in
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    /// Request sent, waiting for the advisor to accept
    WaitingForAdvisor(SessionId),
    /// Session active, exchanging messages
    Chatting(SessionId),
    /// Session completed, a rating may be submitted
    Rating(SessionId),
}

impl Phase {
    /// The session this phase refers to
    pub fn session_id(&self) -> &str {
        match self {
            Self::WaitingForAdvisor(id) | Self::Chatting(id) | Self::Rating(id) => id,
        }
    }

    /// The fixed phase ↔ status mapping
    pub fn matches(&self, status: SessionStatus) -> bool {
        matches!(
            (self, status),
            (Self::WaitingForAdvisor(_), SessionStatus::Pending)
                | (Self::Chatting(_), SessionStatus::Active)
                | (Self::Rating(_), SessionStatus::Completed)
        )
    }
}

/// Ephemeral per-user cursor storage
///
/// In-process by design: losing it on restart is harmless because the
/// gate rebuilds cursors from the session record. Only the gate and the
/// router's phase-advance calls write here.
#[derive(Default)]
pub struct CursorRegistry {
    cursors: Mutex<HashMap<UserId, Phase>>,
}

impl CursorRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// The user's current phase, if any
    pub fn get(&self, user: UserId) -> Option<Phase> {
        self.cursors.lock().unwrap().get(&user).cloned()
    }

    /// Advance the user's phase
    pub fn set(&self, user: UserId, phase: Phase) {
        self.cursors.lock().unwrap().insert(user, phase);
    }

    /// Drop the user's phase
    pub fn clear(&self, user: UserId) {
        self.cursors.lock().unwrap().remove(&user);
    }
}

/// Corrective notice surfaced instead of the swallowed event
///
/// Rendering belongs to the transport adapter; the variants carry what
/// the templates need.
#[derive(Debug, Clone, PartialEq)]
pub enum GateNotice {
    /// The cursor referenced a session that does not exist
    SessionMissing,
    /// The cursor disagreed with the record and was forced to match it
    PhaseCorrected {
        /// The session in question
        session_id: SessionId,
        /// Its actual status
        status: SessionStatus,
    },
    /// The pending deadline had passed; the session was expired inline
    RequestExpired {
        /// The session that expired
        session_id: SessionId,
    },
}

/// What the gate decided about an inbound event
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    /// Cursor and record agree (or no cursor): handle the event
    Forward,
    /// Divergence repaired: the event is swallowed, surface the notice
    Swallow(GateNotice),
}

/// Runs before every inbound-event handler
pub struct ReconciliationGate {
    store: Arc<SessionStore>,
    buffer: Arc<MessageBuffer>,
    notifier: Arc<dyn Notifier>,
    cursors: Arc<CursorRegistry>,
}

impl ReconciliationGate {
    /// Assemble the gate over its collaborators
    pub fn new(
        store: Arc<SessionStore>,
        buffer: Arc<MessageBuffer>,
        notifier: Arc<dyn Notifier>,
        cursors: Arc<CursorRegistry>,
    ) -> Self {
        Self {
            store,
            buffer,
            notifier,
            cursors,
        }
    }

    /// Reconcile the user's cursor against the session record
    ///
    /// Never returns an error: a store failure during the check is logged
    /// and the event forwarded; the service call behind it fails closed
    /// on its own.
    pub async fn check(&self, user: UserId) -> GateDecision {
        let Some(phase) = self.cursors.get(user) else {
            return GateDecision::Forward;
        };
        let session_id = phase.session_id().to_string();

        let session = match self.store.get(&session_id) {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(
                    "gate could not verify session {} for user {}: {}",
                    session_id,
                    user,
                    e
                );
                return GateDecision::Forward;
            }
        };

        let Some(session) = session else {
            tracing::warn!(
                "user {} cursor referenced missing session {}; clearing",
                user,
                session_id
            );
            self.cursors.clear(user);
            increment_counter!("consultd_cursor_repairs_total");
            return GateDecision::Swallow(GateNotice::SessionMissing);
        };

        if !phase.matches(session.status) {
            // Force the cursor to the truth, or drop it for terminal
            // statuses that have no phase of their own.
            match session.status {
                SessionStatus::Pending => {
                    self.cursors.set(user, Phase::WaitingForAdvisor(session_id.clone()));
                }
                SessionStatus::Active => {
                    self.cursors.set(user, Phase::Chatting(session_id.clone()));
                }
                SessionStatus::Completed if user == session.client_id => {
                    self.cursors.set(user, Phase::Rating(session_id.clone()));
                }
                _ => self.cursors.clear(user),
            }

            tracing::info!(
                "repaired user {} cursor: session {} is {}",
                user,
                session_id,
                session.status
            );
            increment_counter!("consultd_cursor_repairs_total");
            return GateDecision::Swallow(GateNotice::PhaseCorrected {
                session_id,
                status: session.status,
            });
        }

        // Cursor agrees with the record. For pending sessions the deadline
        // is still enforced inline, alongside the timer and the sweep.
        if session.deadline_passed(Utc::now()) {
            match expiry::expire_session(
                &self.store,
                &self.buffer,
                self.notifier.as_ref(),
                &session_id,
                Utc::now(),
            )
            .await
            {
                Ok(_) => {}
                Err(e) => tracing::warn!("inline expiry of session {} failed: {}", session_id, e),
            }
            self.cursors.clear(user);
            return GateDecision::Swallow(GateNotice::RequestExpired { session_id });
        }

        GateDecision::Forward
    }
}
