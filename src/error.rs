//! Error types for consultd
//!
//! This module defines all error types used throughout the engine,
//! using `thiserror` for ergonomic error handling.
//!
//! The lifecycle error kinds are deliberately few and discriminated:
//! every one of them is recoverable by the caller (retry, re-read, or
//! surface a user-facing message). None are fatal to the process.

use thiserror::Error;

/// Main error type for consultd operations
///
/// Covers the consultation lifecycle protocol (conflicts, stale
/// transitions, authorization), storage availability, and the ambient
/// configuration/IO plumbing.
#[derive(Error, Debug)]
pub enum ConsultError {
    /// The client already has a pending or active session
    #[error("Client {0} already has an open session")]
    AlreadyInSession(i64),

    /// The advisor already has a pending or active session
    #[error("Advisor {0} is busy with another client")]
    AdvisorBusy(i64),

    /// Referenced entity does not exist
    #[error("Not found: {entity} '{id}'")]
    NotFound {
        /// Entity kind ("session", "advisor", ...)
        entity: &'static str,
        /// Identifier that failed to resolve
        id: String,
    },

    /// Caller is not a participant allowed to perform the operation
    #[error("Forbidden: user {user} may not act on session {session}")]
    Forbidden {
        /// The acting user
        user: i64,
        /// The session acted upon
        session: String,
    },

    /// Session is not in a status that permits the operation
    #[error("Invalid state: session {session} is {status}")]
    InvalidState {
        /// The session acted upon
        session: String,
        /// Its actual status at the time of the call
        status: String,
    },

    /// Conditional update lost the race: the status moved underneath us
    #[error("Stale state: session {session} is no longer {expected}")]
    StaleState {
        /// The session acted upon
        session: String,
        /// The status the caller expected to transition from
        expected: String,
    },

    /// The completed session has already been rated
    #[error("Session {0} has already been reviewed")]
    AlreadyReviewed(String),

    /// Uniqueness violation on insert (idempotent replay or lost race)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Rating outside the accepted [1,5] range
    #[error("Rating {0} is out of range (must be 1-5)")]
    RatingOutOfRange(u8),

    /// The session store cannot be reached or the statement failed
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ConsultError {
    /// Creates a NotFound error
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// True for the benign race outcome: another actor already performed
    /// the transition. Timer and sweep treat this as a no-op.
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::StaleState { .. })
    }
}

/// Result type alias for consultd operations
///
/// Unlike a boxed/anyhow error, the concrete error type lets callers
/// match on the lifecycle kinds (`Conflict`, `StaleState`, ...), which
/// the request/accept protocol depends on. The binary edge wraps this
/// in `anyhow` for context.
pub type Result<T> = std::result::Result<T, ConsultError>;
