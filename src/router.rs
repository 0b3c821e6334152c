//! Inbound event routing
//!
//! The transport adapter hands the engine opaque `(user, kind)` events;
//! this module runs them through the reconciliation gate, dispatches the
//! survivors to the consultation service, and advances conversational
//! cursors on success. These phase-advance calls and the gate are the
//! only writers of cursor state.

use crate::error::ConsultError;
use crate::gate::{CursorRegistry, GateDecision, GateNotice, Phase, ReconciliationGate};
use crate::session::{ConsultationService, SendOutcome, SessionId, SessionStatus, UserId};
use std::sync::Arc;

/// One inbound user event from the transport adapter
#[derive(Debug, Clone)]
pub struct InboundEvent {
    /// The acting user
    pub user_id: UserId,
    /// What they did
    pub kind: EventKind,
}

/// The event vocabulary the engine understands
///
/// Chat messages, completion, and rating act on the user's current
/// session (resolved via the cursor or the open-session lookup) while
/// the explicit lifecycle taps carry the session id from the tapped
/// notification.
#[derive(Debug, Clone)]
pub enum EventKind {
    /// Client asks to consult an advisor
    RequestConsultation {
        /// The advisor being requested
        advisor_id: UserId,
        /// Optional topic
        theme: Option<String>,
    },
    /// Advisor accepts a pending request
    AcceptRequest {
        /// The pending session
        session_id: SessionId,
    },
    /// Advisor declines a pending request
    DeclineRequest {
        /// The pending session
        session_id: SessionId,
    },
    /// Client withdraws a pending request
    CancelRequest {
        /// The pending session
        session_id: SessionId,
    },
    /// Either participant writes into their current session
    ChatMessage {
        /// Message text
        text: String,
    },
    /// Either participant ends their current session
    CompleteSession,
    /// Client rates the session their cursor points at
    RateSession {
        /// Rating in [1,5]
        rating: u8,
    },
}

/// What the router did with an event
///
/// The transport adapter renders each case differently: a delivered
/// confirmation, a "parked until the advisor accepts" note, a corrective
/// notice, or the typed rejection.
#[derive(Debug)]
pub enum EventOutcome {
    /// The operation succeeded
    Handled,
    /// The message was parked in the pre-accept buffer
    Buffered,
    /// The gate swallowed the event and repaired the cursor
    Corrected(GateNotice),
    /// The service rejected the event with a typed error
    Rejected(ConsultError),
}

/// Gate-then-service dispatcher
pub struct EventRouter {
    service: Arc<ConsultationService>,
    gate: ReconciliationGate,
    cursors: Arc<CursorRegistry>,
}

impl EventRouter {
    /// Assemble the router
    pub fn new(
        service: Arc<ConsultationService>,
        gate: ReconciliationGate,
        cursors: Arc<CursorRegistry>,
    ) -> Self {
        Self {
            service,
            gate,
            cursors,
        }
    }

    /// Route one inbound event
    ///
    /// Never returns an error: every failure mode is a renderable
    /// [`EventOutcome`].
    pub async fn handle(&self, event: InboundEvent) -> EventOutcome {
        let user = event.user_id;

        if let GateDecision::Swallow(notice) = self.gate.check(user).await {
            return EventOutcome::Corrected(notice);
        }

        match event.kind {
            EventKind::RequestConsultation { advisor_id, theme } => {
                match self.service.request(user, advisor_id, theme).await {
                    Ok(session) => {
                        self.cursors.set(user, Phase::WaitingForAdvisor(session.id));
                        EventOutcome::Handled
                    }
                    Err(e) => EventOutcome::Rejected(e),
                }
            }
            EventKind::AcceptRequest { session_id } => {
                match self.service.accept(&session_id, user).await {
                    Ok(session) => {
                        self.cursors.set(session.advisor_id, Phase::Chatting(session.id.clone()));
                        self.cursors.set(session.client_id, Phase::Chatting(session.id));
                        EventOutcome::Handled
                    }
                    Err(e) => EventOutcome::Rejected(e),
                }
            }
            EventKind::DeclineRequest { session_id } => {
                match self.service.decline(&session_id, user).await {
                    Ok(session) => {
                        self.cursors.clear(session.client_id);
                        EventOutcome::Handled
                    }
                    Err(e) => EventOutcome::Rejected(e),
                }
            }
            EventKind::CancelRequest { session_id } => {
                match self.service.cancel(&session_id, user).await {
                    Ok(session) => {
                        self.cursors.clear(session.client_id);
                        EventOutcome::Handled
                    }
                    Err(e) => EventOutcome::Rejected(e),
                }
            }
            EventKind::ChatMessage { text } => {
                let session_id = match self.current_session(user) {
                    Some(session_id) => session_id,
                    None => {
                        return EventOutcome::Rejected(ConsultError::not_found(
                            "session",
                            format!("no open session for user {}", user),
                        ))
                    }
                };
                match self.service.send(&session_id, user, text).await {
                    Ok(SendOutcome::Delivered(_)) => EventOutcome::Handled,
                    Ok(SendOutcome::Buffered) => EventOutcome::Buffered,
                    Err(e) => EventOutcome::Rejected(e),
                }
            }
            EventKind::CompleteSession => {
                let session_id = match self.current_session(user) {
                    Some(session_id) => session_id,
                    None => {
                        return EventOutcome::Rejected(ConsultError::not_found(
                            "session",
                            format!("no open session for user {}", user),
                        ))
                    }
                };
                match self.service.complete(&session_id, user).await {
                    Ok(session) => {
                        self.cursors
                            .set(session.client_id, Phase::Rating(session.id.clone()));
                        self.cursors.clear(session.advisor_id);
                        EventOutcome::Handled
                    }
                    Err(e) => EventOutcome::Rejected(e),
                }
            }
            EventKind::RateSession { rating } => {
                let session_id = match self.cursors.get(user) {
                    Some(Phase::Rating(session_id)) => session_id,
                    _ => {
                        return EventOutcome::Rejected(ConsultError::not_found(
                            "session",
                            format!("no session awaiting a rating from user {}", user),
                        ))
                    }
                };
                match self.service.rate(&session_id, user, rating).await {
                    Ok(_) => {
                        self.cursors.clear(user);
                        EventOutcome::Handled
                    }
                    Err(e) => EventOutcome::Rejected(e),
                }
            }
        }
    }

    /// The session an implicit event acts on: the cursor's, with the
    /// open-session lookup as fallback when no cursor survived.
    fn current_session(&self, user: UserId) -> Option<SessionId> {
        if let Some(phase) = self.cursors.get(user) {
            return Some(phase.session_id().to_string());
        }
        match self.service.store().find_active_or_pending(user) {
            Ok(session) => session.map(|s| s.id),
            Err(e) => {
                tracing::warn!("open-session lookup for user {} failed: {}", user, e);
                None
            }
        }
    }
}

/// Convenience check used by adapters rendering session state
pub fn phase_for_status(status: SessionStatus) -> Option<&'static str> {
    match status {
        SessionStatus::Pending => Some("waiting-for-advisor"),
        SessionStatus::Active => Some("chatting"),
        SessionStatus::Completed => Some("rating"),
        _ => None,
    }
}
