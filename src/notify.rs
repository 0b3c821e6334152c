//! Outbound notification boundary
//!
//! The engine decides *that* a notification fires and *to whom*; rendering
//! the message and resolving display names belong to the transport adapter
//! behind the [`Notifier`] trait. Delivery is fire-and-forget relative to
//! the state mutation that triggered it: a committed transition is never
//! rolled back because the transport hiccuped, and failures are logged,
//! not retried indefinitely.

use crate::error::Result;
use crate::session::{Session, SessionId, SessionMessage, UserId};
use async_trait::async_trait;
use std::sync::Mutex;

/// What happened, from the recipient's point of view
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationKind {
    /// A client requested a consultation (sent to the advisor)
    NewRequest {
        /// Topic supplied by the client, if any
        theme: Option<String>,
    },
    /// The advisor accepted (sent to the client)
    RequestAccepted,
    /// The advisor declined (sent to the client)
    RequestDeclined,
    /// The client withdrew the request (sent to the advisor)
    RequestCancelled,
    /// A chat message to forward to the other participant
    MessageForwarded {
        /// The stored message being forwarded
        message: SessionMessage,
    },
    /// The pending request timed out (sent to the client)
    SessionExpired,
    /// The counterpart ended the session
    SessionCompleted,
    /// The client rated the session (sent to the advisor)
    ReviewReceived {
        /// The rating given
        rating: u8,
    },
}

impl NotificationKind {
    /// Short label for logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            Self::NewRequest { .. } => "new_request",
            Self::RequestAccepted => "request_accepted",
            Self::RequestDeclined => "request_declined",
            Self::RequestCancelled => "request_cancelled",
            Self::MessageForwarded { .. } => "message_forwarded",
            Self::SessionExpired => "session_expired",
            Self::SessionCompleted => "session_completed",
            Self::ReviewReceived { .. } => "review_received",
        }
    }
}

/// One outbound notification
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Who receives it
    pub recipient: UserId,
    /// The session it concerns
    pub session_id: SessionId,
    /// The other participant (for display-name resolution by the adapter)
    pub counterpart: UserId,
    /// What happened
    pub kind: NotificationKind,
}

impl Notification {
    /// Build a notification addressed to one participant of a session
    ///
    /// `recipient` must be a participant; the counterpart is derived.
    pub fn to_participant(session: &Session, recipient: UserId, kind: NotificationKind) -> Self {
        Self {
            recipient,
            session_id: session.id.clone(),
            counterpart: session.counterpart(recipient).unwrap_or(session.advisor_id),
            kind,
        }
    }
}

/// Transport-adapter boundary for outbound delivery
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one notification
    ///
    /// # Errors
    ///
    /// Any error is treated as a delivery failure and swallowed by the
    /// engine (logged at WARN).
    async fn deliver(&self, notification: Notification) -> Result<()>;
}

/// Notifier that only logs; the default when no transport is wired up
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn deliver(&self, notification: Notification) -> Result<()> {
        tracing::debug!(
            "notification {} for session {} -> user {}",
            notification.kind.label(),
            notification.session_id,
            notification.recipient
        );
        Ok(())
    }
}

/// Notifier that records everything it is asked to deliver
///
/// Test double in the spirit of a fake transport: integration tests
/// assert on the exact fan-out.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything delivered so far, in order
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    /// Count of deliveries matching a kind label
    pub fn count_of(&self, label: &str) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.kind.label() == label)
            .count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn deliver(&self, notification: Notification) -> Result<()> {
        self.sent.lock().unwrap().push(notification);
        Ok(())
    }
}

/// Deliver a notification, swallowing and logging any failure
pub async fn deliver_best_effort(notifier: &dyn Notifier, notification: Notification) {
    let label = notification.kind.label();
    let session_id = notification.session_id.clone();
    if let Err(e) = notifier.deliver(notification).await {
        tracing::warn!(
            "notification {} for session {} failed: {}",
            label,
            session_id,
            e
        );
    }
}
