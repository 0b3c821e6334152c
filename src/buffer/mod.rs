//! Pre-accept message buffer
//!
//! Messages a client writes before the advisor accepts have nowhere
//! durable to go: the session has no `active` status yet, and the Session
//! Store only holds messages of active sessions. They are parked here
//! instead, keyed by session, until `accept` flushes them or a terminal
//! transition discards them.
//!
//! The buffer is volatile by contract. Losing its contents is acceptable
//! (worst case: a client's pre-accept remarks are not delivered), but it
//! must never block or corrupt the Session Store. The preferred backing
//! is a sled tree; when that cannot be opened the buffer degrades to an
//! in-process map with the same interface and TTL behavior, logging the
//! degradation once.

mod memory;
mod sled_store;

pub use memory::MemoryBuffer;
pub use sled_store::SledBuffer;

use crate::error::Result;
use crate::session::BufferedMessage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One session's parked messages plus their eviction deadline
///
/// The deadline is fixed by the first append (request time + pending
/// window); later appends never extend it, so a slot dies with the
/// request window even if no lifecycle transition ever lands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferSlot {
    /// When this slot becomes eligible for eviction
    pub deadline: DateTime<Utc>,
    /// Parked messages in append order
    pub messages: Vec<BufferedMessage>,
}

/// Capability interface over a buffer backing store
///
/// `append` and `drain` are atomic per session; there is no cross-session
/// ordering. Eviction is an explicit scheduled operation (`evict_due`),
/// driven on the sweep cadence, never incidental cleanup.
pub trait BufferStore: Send + Sync {
    /// Park a message for a pending session
    ///
    /// `deadline` applies only when the slot does not exist yet.
    fn append(&self, session_id: &str, message: BufferedMessage, deadline: DateTime<Utc>)
        -> Result<()>;

    /// Atomically return and clear all parked messages for a session
    fn drain(&self, session_id: &str) -> Result<Vec<BufferedMessage>>;

    /// Drop a session's slot without returning it
    fn discard(&self, session_id: &str) -> Result<()>;

    /// Remove every slot whose deadline has passed; returns how many
    fn evict_due(&self, now: DateTime<Utc>) -> Result<usize>;
}

/// The buffer handle the consultation service holds
///
/// Wraps whichever backing store was selected at startup together with
/// the TTL applied to new slots.
pub struct MessageBuffer {
    store: Box<dyn BufferStore>,
    ttl: chrono::Duration,
}

impl MessageBuffer {
    /// Open the preferred sled backing, degrading to memory on failure
    ///
    /// # Arguments
    ///
    /// * `path` - sled directory; `None` selects the in-process fallback
    ///   outright (single-shot CLI runs, tests)
    /// * `ttl` - slot lifetime, normally the pending window
    pub fn open(path: Option<&Path>, ttl: chrono::Duration) -> Self {
        let store: Box<dyn BufferStore> = match path {
            None => Box::new(MemoryBuffer::new()),
            Some(path) => match SledBuffer::open(path) {
                Ok(buffer) => Box::new(buffer),
                Err(e) => {
                    tracing::warn!(
                        "Buffer store at {} unavailable ({}); degrading to in-process memory",
                        path.display(),
                        e
                    );
                    Box::new(MemoryBuffer::new())
                }
            },
        };
        Self { store, ttl }
    }

    /// Build a buffer on the in-process backing
    pub fn in_memory(ttl: chrono::Duration) -> Self {
        Self {
            store: Box::new(MemoryBuffer::new()),
            ttl,
        }
    }

    /// Park a message; a new slot gets `now + ttl` as its deadline
    pub fn append(&self, session_id: &str, message: BufferedMessage, now: DateTime<Utc>) -> Result<()> {
        self.store.append(session_id, message, now + self.ttl)
    }

    /// Atomically take and clear a session's parked messages
    pub fn drain(&self, session_id: &str) -> Result<Vec<BufferedMessage>> {
        self.store.drain(session_id)
    }

    /// Drop a session's slot
    pub fn discard(&self, session_id: &str) -> Result<()> {
        self.store.discard(session_id)
    }

    /// Evict all slots past their deadline
    pub fn evict_due(&self, now: DateTime<Utc>) -> Result<usize> {
        self.store.evict_due(now)
    }
}
