//! sled-backed buffer
//!
//! The preferred buffer backing: an embedded sled tree keyed by session
//! id, one [`BufferSlot`] JSON value per key. sled's per-key atomic
//! operations give the append/drain atomicity the buffer contract needs
//! without any cross-session coordination.
//!
//! No durability is promised: the tree lives beside the database but is
//! free to vanish. Deserialization failures start the slot over instead
//! of erroring, which is the right trade for a cache.

use super::{BufferSlot, BufferStore};
use crate::error::{ConsultError, Result};
use crate::session::BufferedMessage;
use chrono::{DateTime, Utc};
use sled::Db;
use std::path::Path;

/// Buffer backing on an embedded sled tree
pub struct SledBuffer {
    db: Db,
}

impl SledBuffer {
    /// Open or create the sled tree at `path`
    ///
    /// # Errors
    ///
    /// Returns an IO-kind error when sled cannot open the directory; the
    /// caller ([`super::MessageBuffer::open`]) degrades to memory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path).map_err(sled_err)?;
        Ok(Self { db })
    }
}

impl BufferStore for SledBuffer {
    fn append(
        &self,
        session_id: &str,
        message: BufferedMessage,
        deadline: DateTime<Utc>,
    ) -> Result<()> {
        self.db
            .update_and_fetch(session_id.as_bytes(), |old| {
                let mut slot = old
                    .and_then(|bytes| serde_json::from_slice::<BufferSlot>(bytes).ok())
                    .unwrap_or(BufferSlot {
                        deadline,
                        messages: Vec::new(),
                    });
                slot.messages.push(message.clone());
                match serde_json::to_vec(&slot) {
                    Ok(bytes) => Some(bytes),
                    // Keep whatever was there rather than dropping the slot
                    Err(_) => old.map(|v| v.to_vec()),
                }
            })
            .map_err(sled_err)?;
        Ok(())
    }

    fn drain(&self, session_id: &str) -> Result<Vec<BufferedMessage>> {
        let old = self.db.remove(session_id.as_bytes()).map_err(sled_err)?;
        Ok(old
            .and_then(|bytes| serde_json::from_slice::<BufferSlot>(&bytes).ok())
            .map(|slot| slot.messages)
            .unwrap_or_default())
    }

    fn discard(&self, session_id: &str) -> Result<()> {
        self.db.remove(session_id.as_bytes()).map_err(sled_err)?;
        Ok(())
    }

    fn evict_due(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut evicted = 0;
        for entry in self.db.iter() {
            let (key, value) = entry.map_err(sled_err)?;

            let expired = serde_json::from_slice::<BufferSlot>(&value)
                .map(|slot| slot.deadline <= now)
                // Undecodable slots are garbage; reclaim them too
                .unwrap_or(true);

            if expired {
                // Conditional remove: an append that raced us keeps the slot
                let cas = self
                    .db
                    .compare_and_swap(&key, Some(&value), None::<&[u8]>)
                    .map_err(sled_err)?;
                if cas.is_ok() {
                    evicted += 1;
                }
            }
        }
        Ok(evicted)
    }
}

fn sled_err(e: sled::Error) -> ConsultError {
    ConsultError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        e.to_string(),
    ))
}
