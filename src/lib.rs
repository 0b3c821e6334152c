//! consultd - Consultation matching and session lifecycle engine
//!
//! This library implements the core of a chat-mediated advisor
//! marketplace: an idempotent request/accept protocol, pre-acceptance
//! message buffering, deadline expiry, and reconciliation between each
//! user's conversational cursor and the durable session record.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `session`: domain types, the durable store, and the lifecycle service
//! - `buffer`: volatile pre-accept message buffer with in-process fallback
//! - `expiry`: deferred per-request timers and the periodic safety sweep
//! - `gate`: conversational cursors and the state reconciliation gate
//! - `router`: transport-facing event dispatch
//! - `notify` / `archive`: external collaborator boundaries
//! - `config`: configuration management and validation
//! - `error`: error types and result alias
//! - `cli`: command-line interface definition
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use consultd::archive::NoopArchiver;
//! use consultd::buffer::MessageBuffer;
//! use consultd::notify::NullNotifier;
//! use consultd::session::{ConsultationService, SessionStore};
//! use consultd::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config/consultd.yaml")?;
//!     config.validate()?;
//!
//!     let store = Arc::new(SessionStore::new()?);
//!     let buffer = Arc::new(MessageBuffer::in_memory(config.pending_window()));
//!     let service = ConsultationService::new(
//!         store,
//!         buffer,
//!         Arc::new(NullNotifier),
//!         Arc::new(NoopArchiver),
//!         &config,
//!     );
//!
//!     let session = service.request(100, 200, Some("tax advice".into())).await?;
//!     println!("session {} is {}", session.id, session.status);
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod buffer;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod expiry;
pub mod gate;
pub mod idempotency;
pub mod notify;
pub mod router;
pub mod session;

// Re-export commonly used types
pub use config::Config;
pub use error::{ConsultError, Result};
pub use gate::{CursorRegistry, GateDecision, GateNotice, Phase, ReconciliationGate};
pub use router::{EventKind, EventOutcome, EventRouter, InboundEvent};
pub use session::{ConsultationService, Session, SessionStatus, SessionStore};
