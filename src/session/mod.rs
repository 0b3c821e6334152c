//! Consultation sessions
//!
//! Domain types, the durable store, and the lifecycle service that ties
//! them to the buffer, notifier, and archiver collaborators.

pub mod service;
pub mod store;
pub mod types;

pub use service::ConsultationService;
pub use store::SessionStore;
pub use types::{
    new_message_id, new_session_id, AdvisorProfile, BufferedMessage, Review, SendOutcome, Session,
    SessionId, SessionMessage, SessionStatus, UserId,
};
