//! Transcript archival hook
//!
//! On completion the engine may hand the full message history to an
//! external archiving collaborator and record the returned reference on
//! the session. Archival is strictly best-effort: a failing archiver
//! never fails the `complete` operation.

use crate::error::Result;
use crate::session::{Session, SessionMessage};
use async_trait::async_trait;

/// External archival collaborator
#[async_trait]
pub trait Archiver: Send + Sync {
    /// Archive a completed session's transcript
    ///
    /// Returns `Some(archive_id)` when a durable copy was made, `None`
    /// when the archiver chose not to archive.
    ///
    /// # Errors
    ///
    /// Errors are logged and swallowed by the caller; the completed
    /// session simply ends up without an `archive_id`.
    async fn archive(
        &self,
        session: &Session,
        transcript: &[SessionMessage],
    ) -> Result<Option<String>>;
}

/// Archiver that archives nothing; the default
pub struct NoopArchiver;

#[async_trait]
impl Archiver for NoopArchiver {
    async fn archive(
        &self,
        _session: &Session,
        _transcript: &[SessionMessage],
    ) -> Result<Option<String>> {
        Ok(None)
    }
}
