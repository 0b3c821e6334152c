//! In-process buffer fallback
//!
//! Serves the same interface as the sled backing when sled cannot be
//! opened. Global mutable state for the process lifetime, injected once
//! behind [`super::BufferStore`] so nothing else knows which backing won.

use super::{BufferSlot, BufferStore};
use crate::error::Result;
use crate::session::BufferedMessage;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

/// Buffer backing on a process-local map
#[derive(Default)]
pub struct MemoryBuffer {
    slots: Mutex<HashMap<String, BufferSlot>>,
}

impl MemoryBuffer {
    /// Create an empty in-process buffer
    pub fn new() -> Self {
        Self::default()
    }
}

impl BufferStore for MemoryBuffer {
    fn append(
        &self,
        session_id: &str,
        message: BufferedMessage,
        deadline: DateTime<Utc>,
    ) -> Result<()> {
        let mut slots = self.slots.lock().unwrap();
        slots
            .entry(session_id.to_string())
            .or_insert_with(|| BufferSlot {
                deadline,
                messages: Vec::new(),
            })
            .messages
            .push(message);
        Ok(())
    }

    fn drain(&self, session_id: &str) -> Result<Vec<BufferedMessage>> {
        let mut slots = self.slots.lock().unwrap();
        Ok(slots
            .remove(session_id)
            .map(|slot| slot.messages)
            .unwrap_or_default())
    }

    fn discard(&self, session_id: &str) -> Result<()> {
        self.slots.lock().unwrap().remove(session_id);
        Ok(())
    }

    fn evict_due(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut slots = self.slots.lock().unwrap();
        let before = slots.len();
        slots.retain(|_, slot| slot.deadline > now);
        Ok(before - slots.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn deadline() -> DateTime<Utc> {
        t0() + chrono::Duration::minutes(15)
    }

    #[test]
    fn test_append_and_drain_preserve_order() {
        let buffer = MemoryBuffer::new();
        for body in ["m1", "m2", "m3"] {
            buffer
                .append("s1", BufferedMessage::text(1, body, t0()), deadline())
                .expect("append failed");
        }

        let drained = buffer.drain("s1").expect("drain failed");
        let bodies: Vec<_> = drained.iter().filter_map(|m| m.body.as_deref()).collect();
        assert_eq!(bodies, vec!["m1", "m2", "m3"]);

        // Drain clears the slot
        assert!(buffer.drain("s1").expect("second drain failed").is_empty());
    }

    #[test]
    fn test_drain_unknown_session_is_empty() {
        let buffer = MemoryBuffer::new();
        assert!(buffer.drain("nope").expect("drain failed").is_empty());
    }

    #[test]
    fn test_discard_drops_slot() {
        let buffer = MemoryBuffer::new();
        buffer
            .append("s1", BufferedMessage::text(1, "m", t0()), deadline())
            .expect("append failed");
        buffer.discard("s1").expect("discard failed");
        assert!(buffer.drain("s1").expect("drain failed").is_empty());
    }

    #[test]
    fn test_evict_due_removes_only_expired_slots() {
        let buffer = MemoryBuffer::new();
        buffer
            .append("old", BufferedMessage::text(1, "m", t0()), deadline())
            .expect("append failed");
        buffer
            .append(
                "new",
                BufferedMessage::text(2, "m", t0()),
                deadline() + chrono::Duration::minutes(10),
            )
            .expect("append failed");

        let evicted = buffer.evict_due(deadline()).expect("evict failed");
        assert_eq!(evicted, 1);
        assert!(buffer.drain("old").expect("drain failed").is_empty());
        assert_eq!(buffer.drain("new").expect("drain failed").len(), 1);
    }
}
