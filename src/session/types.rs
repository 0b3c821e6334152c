//! Session domain types
//!
//! The consultation session and its satellite records: messages, buffered
//! pre-accept messages, reviews, and advisor profiles. Sessions are created
//! by the consultation service, mutated only through defined transitions,
//! and never physically deleted: terminal rows are retained for history
//! and rating.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Platform chat identity of a user (client or advisor)
pub type UserId = i64;

/// Session identifier (ULID string)
pub type SessionId = String;

/// Lifecycle status of a consultation session
///
/// Initial status is `Pending`; `Active` is the only other non-terminal
/// status. No transition ever leaves a terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Requested but not yet accepted by the advisor
    Pending,
    /// Accepted; both parties may exchange messages
    Active,
    /// Ended by either participant
    Completed,
    /// Rejected by the advisor while pending
    Declined,
    /// Deadline passed with no acceptance
    Expired,
    /// Withdrawn by the client while pending
    Cancelled,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SessionStatus {
    /// Stable storage representation of this status
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Declined => "declined",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse a status from its storage representation
    ///
    /// # Examples
    ///
    /// ```
    /// use consultd::session::SessionStatus;
    ///
    /// let status = SessionStatus::parse_str("pending").unwrap();
    /// assert_eq!(status, SessionStatus::Pending);
    /// ```
    pub fn parse_str(s: &str) -> Result<Self, String> {
        match s {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "declined" => Ok(Self::Declined),
            "expired" => Ok(Self::Expired),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("Unknown session status: {}", other)),
        }
    }

    /// True for `Pending` and `Active`, the statuses counted against the
    /// one-open-session-per-participant invariant
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Active)
    }

    /// True once the session can never change again
    pub fn is_terminal(&self) -> bool {
        !self.is_open()
    }
}

/// One client-advisor consultation instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier (ULID)
    pub id: SessionId,

    /// The requesting client
    pub client_id: UserId,

    /// The advisor being consulted
    pub advisor_id: UserId,

    /// Current lifecycle status
    pub status: SessionStatus,

    /// Dedup token for the originating request; unique where present and
    /// released on the first transition out of pending
    pub request_key: Option<String>,

    /// Free-text topic supplied by the client at request time
    pub theme: Option<String>,

    /// When the request was created
    pub created_at: DateTime<Utc>,

    /// Acceptance deadline; set only while pending
    pub expires_at: Option<DateTime<Utc>>,

    /// When the session was completed, if it was
    pub completed_at: Option<DateTime<Utc>>,

    /// Reference to an external durable copy of the transcript, if archived
    pub archive_id: Option<String>,
}

impl Session {
    /// Build a fresh pending session for a request
    ///
    /// # Arguments
    ///
    /// * `client_id` - The requesting client
    /// * `advisor_id` - The requested advisor
    /// * `theme` - Optional consultation topic
    /// * `request_key` - Dedup token from [`crate::idempotency::request_key`]
    /// * `now` - Request time
    /// * `pending_window` - How long the advisor has to accept
    pub fn new_pending(
        client_id: UserId,
        advisor_id: UserId,
        theme: Option<String>,
        request_key: String,
        now: DateTime<Utc>,
        pending_window: chrono::Duration,
    ) -> Self {
        Self {
            id: new_session_id(),
            client_id,
            advisor_id,
            status: SessionStatus::Pending,
            request_key: Some(request_key),
            theme,
            created_at: now,
            expires_at: Some(now + pending_window),
            completed_at: None,
            archive_id: None,
        }
    }

    /// True when the user is the client or the advisor of this session
    pub fn has_participant(&self, user: UserId) -> bool {
        self.client_id == user || self.advisor_id == user
    }

    /// The other participant, when `user` is one of the two
    pub fn counterpart(&self, user: UserId) -> Option<UserId> {
        if user == self.client_id {
            Some(self.advisor_id)
        } else if user == self.advisor_id {
            Some(self.client_id)
        } else {
            None
        }
    }

    /// True when the session is pending and its deadline has passed
    pub fn deadline_passed(&self, now: DateTime<Utc>) -> bool {
        self.status == SessionStatus::Pending
            && self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// A message exchanged inside an active session. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMessage {
    /// Unique message identifier (ULID)
    pub id: String,

    /// The session this message belongs to
    pub session_id: SessionId,

    /// Who authored it (client or advisor)
    pub sender_id: UserId,

    /// Text content, if any
    pub body: Option<String>,

    /// Attached media reference, if any
    pub media_ref: Option<String>,

    /// When it was authored
    pub created_at: DateTime<Utc>,
}

impl SessionMessage {
    /// Build a text message
    pub fn text(
        session_id: impl Into<SessionId>,
        sender_id: UserId,
        body: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: new_message_id(),
            session_id: session_id.into(),
            sender_id,
            body: Some(body.into()),
            media_ref: None,
            created_at: now,
        }
    }
}

/// A message authored before the advisor accepted, parked in the buffer
///
/// Same shape as [`SessionMessage`] minus the ids: the session is the
/// buffer key, and a Message id is minted at flush time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferedMessage {
    /// Who authored it
    pub sender_id: UserId,

    /// Text content, if any
    pub body: Option<String>,

    /// Attached media reference, if any
    pub media_ref: Option<String>,

    /// Original authoring time, preserved through the flush
    pub authored_at: DateTime<Utc>,
}

impl BufferedMessage {
    /// Build a buffered text message
    pub fn text(sender_id: UserId, body: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            sender_id,
            body: Some(body.into()),
            media_ref: None,
            authored_at: now,
        }
    }
}

/// A client's one-time rating of a completed session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    /// The rated session (one review per session)
    pub session_id: SessionId,

    /// The rated advisor
    pub advisor_id: UserId,

    /// The reviewing client
    pub client_id: UserId,

    /// Rating in [1,5]
    pub rating: u8,

    /// When the review was written
    pub created_at: DateTime<Utc>,
}

/// Per-advisor mutable aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvisorProfile {
    /// The advisor's platform identity
    pub advisor_id: UserId,

    /// Name shown to clients
    pub display_name: String,

    /// Short self-description
    pub bio: Option<String>,

    /// Area of expertise
    pub specialization: Option<String>,

    /// Rolling mean of review ratings, rounded to two decimals
    pub rating: f64,

    /// Number of reviews behind the rating
    pub review_count: u32,

    /// Last advisor-side activity (accept, send)
    pub last_active_at: Option<DateTime<Utc>>,
}

impl AdvisorProfile {
    /// Minimal profile for a newly seen advisor
    pub fn new(advisor_id: UserId, display_name: impl Into<String>) -> Self {
        Self {
            advisor_id,
            display_name: display_name.into(),
            bio: None,
            specialization: None,
            rating: 0.0,
            review_count: 0,
            last_active_at: None,
        }
    }

    /// Derived online status: active within the given window
    pub fn is_online(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        self.last_active_at
            .is_some_and(|last| now - last <= window)
    }
}

/// What happened to a sent message; the caller renders different
/// confirmations for the two cases
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// Session was active: the message is stored and ready to forward
    Delivered(SessionMessage),
    /// Session was still pending: the message is parked in the buffer
    Buffered,
}

/// Generate a new session id
///
/// ULIDs are preferred over UUIDs as they are sortable by timestamp and
/// more human-readable.
pub fn new_session_id() -> SessionId {
    Ulid::new().to_string()
}

/// Generate a new message id
pub fn new_message_id() -> String {
    Ulid::new().to_string()
}
