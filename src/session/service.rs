//! Consultation lifecycle service
//!
//! Implements the request/accept protocol and every transition out of it.
//! All mutations go through the store's conditional updates, so
//! concurrent actions on the same session from both participants resolve
//! deterministically: exactly one caller wins a given transition and the
//! other observes `StaleState`.

use crate::archive::Archiver;
use crate::buffer::MessageBuffer;
use crate::config::Config;
use crate::error::{ConsultError, Result};
use crate::expiry;
use crate::idempotency::request_key;
use crate::notify::{deliver_best_effort, Notification, NotificationKind, Notifier};
use crate::session::store::SessionStore;
use crate::session::types::{
    new_message_id, AdvisorProfile, BufferedMessage, Review, SendOutcome, Session, SessionMessage,
    SessionStatus, UserId,
};
use chrono::Utc;
use metrics::{counter, increment_counter};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// The lifecycle engine
///
/// Owns the collaborators every operation needs: the durable store, the
/// volatile pre-accept buffer, the notifier boundary, and the archival
/// hook. Cheap to share behind an `Arc`; every method takes `&self`.
pub struct ConsultationService {
    store: Arc<SessionStore>,
    buffer: Arc<MessageBuffer>,
    notifier: Arc<dyn Notifier>,
    archiver: Arc<dyn Archiver>,
    pending_window: chrono::Duration,
    advisor_online_window: chrono::Duration,
    shutdown: CancellationToken,
}

impl ConsultationService {
    /// Assemble the service from its collaborators
    pub fn new(
        store: Arc<SessionStore>,
        buffer: Arc<MessageBuffer>,
        notifier: Arc<dyn Notifier>,
        archiver: Arc<dyn Archiver>,
        config: &Config,
    ) -> Self {
        Self {
            store,
            buffer,
            notifier,
            archiver,
            pending_window: config.pending_window(),
            advisor_online_window: config.advisor_online_window(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Token cancelling every deferred timer this service spawned
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// The store this service runs against
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Request a consultation
    ///
    /// Duplicate submissions within the idempotency bucket return the
    /// already-created session instead of erroring; the store's unique
    /// indexes close every race the pre-checks leave open.
    ///
    /// # Errors
    ///
    /// `AlreadyInSession` when the client has an open session with a
    /// different advisor, `AdvisorBusy` when the advisor is taken.
    pub async fn request(
        &self,
        client_id: UserId,
        advisor_id: UserId,
        theme: Option<String>,
    ) -> Result<Session> {
        if let Some(existing) = self.store.find_active_or_pending(client_id)? {
            // A double-tap on the same advisor is a duplicate submission,
            // not a protocol violation
            if existing.client_id == client_id && existing.advisor_id == advisor_id {
                tracing::debug!(
                    "duplicate request from client {} returns existing session {}",
                    client_id,
                    existing.id
                );
                return Ok(existing);
            }
            return Err(ConsultError::AlreadyInSession(client_id));
        }
        if self.store.find_active_or_pending(advisor_id)?.is_some() {
            return Err(ConsultError::AdvisorBusy(advisor_id));
        }

        let now = Utc::now();
        let key = request_key(client_id, advisor_id, now);
        let session = Session::new_pending(
            client_id,
            advisor_id,
            theme,
            key.clone(),
            now,
            self.pending_window,
        );

        match self.store.create(&session) {
            Ok(()) => {
                increment_counter!("consultd_sessions_created_total");
                tracing::info!(
                    "session {} requested: client {} -> advisor {}",
                    session.id,
                    client_id,
                    advisor_id
                );

                self.spawn_timer(session.id.clone());
                deliver_best_effort(
                    self.notifier.as_ref(),
                    Notification::to_participant(
                        &session,
                        advisor_id,
                        NotificationKind::NewRequest {
                            theme: session.theme.clone(),
                        },
                    ),
                )
                .await;
                Ok(session)
            }
            Err(ConsultError::Conflict(_)) => self.resolve_request_conflict(client_id, advisor_id, &key),
            Err(e) => Err(e),
        }
    }

    /// Work out which uniqueness constraint rejected the insert
    ///
    /// Same request key: a duplicate submission, so idempotent success.
    /// Client already open: same pair means a racing duplicate (also
    /// success); a different advisor means the client really is taken.
    /// Neither: the advisor-side index fired.
    fn resolve_request_conflict(
        &self,
        client_id: UserId,
        advisor_id: UserId,
        key: &str,
    ) -> Result<Session> {
        if let Some(existing) = self.store.find_by_request_key(key)? {
            tracing::debug!(
                "duplicate request collapsed onto session {} (key {})",
                existing.id,
                key
            );
            return Ok(existing);
        }
        if let Some(existing) = self.store.find_active_or_pending(client_id)? {
            if existing.client_id == client_id && existing.advisor_id == advisor_id {
                return Ok(existing);
            }
            return Err(ConsultError::AlreadyInSession(client_id));
        }
        Err(ConsultError::AdvisorBusy(advisor_id))
    }

    /// Accept a pending request
    ///
    /// Flushes the pre-accept buffer into stored messages, preserving
    /// each entry's original sender, timestamp, and relative order.
    pub async fn accept(&self, session_id: &str, advisor_id: UserId) -> Result<Session> {
        let session = self.load(session_id)?;
        if session.advisor_id != advisor_id {
            return Err(ConsultError::Forbidden {
                user: advisor_id,
                session: session_id.to_string(),
            });
        }
        if session.status != SessionStatus::Pending {
            return Err(invalid_state(&session));
        }

        let now = Utc::now();
        let session = self
            .store
            .transition(session_id, SessionStatus::Pending, SessionStatus::Active, now)?;
        increment_counter!("consultd_sessions_accepted_total");

        let parked = self.buffer.drain(session_id).unwrap_or_else(|e| {
            tracing::warn!("buffer drain for session {} failed: {}", session_id, e);
            Vec::new()
        });
        if !parked.is_empty() {
            counter!("consultd_buffered_messages_flushed_total", parked.len() as u64);
        }
        for buffered in parked {
            self.store.insert_message(&flushed_message(session_id, buffered))?;
        }

        if let Err(e) = self.store.touch_advisor_activity(advisor_id, now) {
            tracing::warn!("failed to touch advisor {} activity: {}", advisor_id, e);
        }

        tracing::info!("session {} accepted by advisor {}", session.id, advisor_id);
        deliver_best_effort(
            self.notifier.as_ref(),
            Notification::to_participant(&session, session.client_id, NotificationKind::RequestAccepted),
        )
        .await;

        Ok(session)
    }

    /// Decline a pending request. The buffer is discarded, not migrated.
    pub async fn decline(&self, session_id: &str, advisor_id: UserId) -> Result<Session> {
        let session = self.load(session_id)?;
        if session.advisor_id != advisor_id {
            return Err(ConsultError::Forbidden {
                user: advisor_id,
                session: session_id.to_string(),
            });
        }
        if session.status != SessionStatus::Pending {
            return Err(invalid_state(&session));
        }

        let session =
            self.store
                .transition(session_id, SessionStatus::Pending, SessionStatus::Declined, Utc::now())?;
        increment_counter!("consultd_sessions_declined_total");
        self.drop_buffer(session_id);

        deliver_best_effort(
            self.notifier.as_ref(),
            Notification::to_participant(&session, session.client_id, NotificationKind::RequestDeclined),
        )
        .await;

        Ok(session)
    }

    /// Withdraw a pending request. Only the requesting client may cancel.
    pub async fn cancel(&self, session_id: &str, client_id: UserId) -> Result<Session> {
        let session = self.load(session_id)?;
        if session.client_id != client_id {
            return Err(ConsultError::Forbidden {
                user: client_id,
                session: session_id.to_string(),
            });
        }
        if session.status != SessionStatus::Pending {
            return Err(invalid_state(&session));
        }

        let session =
            self.store
                .transition(session_id, SessionStatus::Pending, SessionStatus::Cancelled, Utc::now())?;
        increment_counter!("consultd_sessions_cancelled_total");
        self.drop_buffer(session_id);

        deliver_best_effort(
            self.notifier.as_ref(),
            Notification::to_participant(&session, session.advisor_id, NotificationKind::RequestCancelled),
        )
        .await;

        Ok(session)
    }

    /// Send a message into a session
    ///
    /// Active sessions store the message and forward it; pending sessions
    /// park it in the buffer. The two outcomes are distinct so the caller
    /// can render different confirmations.
    pub async fn send(&self, session_id: &str, sender_id: UserId, body: String) -> Result<SendOutcome> {
        let session = self.load(session_id)?;
        if !session.has_participant(sender_id) {
            return Err(ConsultError::Forbidden {
                user: sender_id,
                session: session_id.to_string(),
            });
        }

        let now = Utc::now();
        match session.status {
            SessionStatus::Active => {
                let message = SessionMessage::text(session_id, sender_id, body, now);
                self.store.insert_message(&message)?;

                if sender_id == session.advisor_id {
                    if let Err(e) = self.store.touch_advisor_activity(sender_id, now) {
                        tracing::warn!("failed to touch advisor {} activity: {}", sender_id, e);
                    }
                }

                let recipient = session.counterpart(sender_id).unwrap_or(session.advisor_id);
                deliver_best_effort(
                    self.notifier.as_ref(),
                    Notification::to_participant(
                        &session,
                        recipient,
                        NotificationKind::MessageForwarded {
                            message: message.clone(),
                        },
                    ),
                )
                .await;

                Ok(SendOutcome::Delivered(message))
            }
            SessionStatus::Pending => {
                // The buffer is volatile by contract: a failing append is
                // logged, never surfaced as a failed send.
                if let Err(e) =
                    self.buffer
                        .append(session_id, BufferedMessage::text(sender_id, body, now), now)
                {
                    tracing::warn!("buffer append for session {} failed: {}", session_id, e);
                }
                Ok(SendOutcome::Buffered)
            }
            _ => Err(invalid_state(&session)),
        }
    }

    /// Complete an active session
    ///
    /// Either participant may end it. Duplicate completion events from
    /// both sides are expected; a call on an already-terminal session is
    /// a no-op success.
    pub async fn complete(&self, session_id: &str, user_id: UserId) -> Result<Session> {
        let session = self.load(session_id)?;
        if !session.has_participant(user_id) {
            return Err(ConsultError::Forbidden {
                user: user_id,
                session: session_id.to_string(),
            });
        }
        if session.status.is_terminal() {
            return Ok(session);
        }
        if session.status != SessionStatus::Active {
            return Err(invalid_state(&session));
        }

        let mut session = match self.store.transition(
            session_id,
            SessionStatus::Active,
            SessionStatus::Completed,
            Utc::now(),
        ) {
            Ok(session) => session,
            Err(e) if e.is_stale() => {
                // The other participant completed first
                let session = self.load(session_id)?;
                if session.status.is_terminal() {
                    return Ok(session);
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        increment_counter!("consultd_sessions_completed_total");
        tracing::info!("session {} completed by user {}", session.id, user_id);

        self.archive_transcript(&mut session).await;

        if let Some(counterpart) = session.counterpart(user_id) {
            deliver_best_effort(
                self.notifier.as_ref(),
                Notification::to_participant(&session, counterpart, NotificationKind::SessionCompleted),
            )
            .await;
        }

        Ok(session)
    }

    /// Rate a completed session
    ///
    /// Client only, once only, rating in [1,5]. Recomputes the advisor's
    /// aggregate from all stored reviews.
    pub async fn rate(&self, session_id: &str, client_id: UserId, rating: u8) -> Result<AdvisorProfile> {
        if !(1..=5).contains(&rating) {
            return Err(ConsultError::RatingOutOfRange(rating));
        }

        let session = self.load(session_id)?;
        if session.client_id != client_id {
            return Err(ConsultError::Forbidden {
                user: client_id,
                session: session_id.to_string(),
            });
        }
        if session.status != SessionStatus::Completed {
            return Err(invalid_state(&session));
        }

        self.store.insert_review(&Review {
            session_id: session.id.clone(),
            advisor_id: session.advisor_id,
            client_id,
            rating,
            created_at: Utc::now(),
        })?;

        let profile = self.store.recompute_advisor_rating(session.advisor_id)?;
        increment_counter!("consultd_reviews_total");
        tracing::info!(
            "advisor {} rated {} on session {}; aggregate now {:.2}",
            session.advisor_id,
            rating,
            session.id,
            profile.rating
        );

        deliver_best_effort(
            self.notifier.as_ref(),
            Notification::to_participant(
                &session,
                session.advisor_id,
                NotificationKind::ReviewReceived { rating },
            ),
        )
        .await;

        Ok(profile)
    }

    /// Expire a pending session whose window ran out
    ///
    /// Returns `true` when this call performed the transition.
    pub async fn expire(&self, session_id: &str) -> Result<bool> {
        expiry::expire_session(
            &self.store,
            &self.buffer,
            self.notifier.as_ref(),
            session_id,
            Utc::now(),
        )
        .await
    }

    /// Derived advisor availability from the last-activity timestamp
    pub fn advisor_online(&self, advisor_id: UserId) -> Result<bool> {
        Ok(self
            .store
            .get_advisor(advisor_id)?
            .map(|profile| profile.is_online(Utc::now(), self.advisor_online_window))
            .unwrap_or(false))
    }

    fn load(&self, session_id: &str) -> Result<Session> {
        self.store
            .get(session_id)?
            .ok_or_else(|| ConsultError::not_found("session", session_id))
    }

    fn drop_buffer(&self, session_id: &str) {
        if let Err(e) = self.buffer.discard(session_id) {
            tracing::warn!("failed to discard buffer for session {}: {}", session_id, e);
        }
    }

    fn spawn_timer(&self, session_id: String) {
        let wait = self
            .pending_window
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(900));
        expiry::spawn_expiry_timer(
            self.store.clone(),
            self.buffer.clone(),
            self.notifier.clone(),
            session_id,
            wait,
            self.shutdown.child_token(),
        );
    }

    /// Best-effort transcript hand-off to the archival collaborator
    async fn archive_transcript(&self, session: &mut Session) {
        let transcript = match self.store.messages_for_session(&session.id) {
            Ok(transcript) => transcript,
            Err(e) => {
                tracing::warn!("could not read transcript of session {}: {}", session.id, e);
                return;
            }
        };

        match self.archiver.archive(session, &transcript).await {
            Ok(Some(archive_id)) => {
                if let Err(e) = self.store.set_archive_id(&session.id, &archive_id) {
                    tracing::warn!("failed to record archive id for session {}: {}", session.id, e);
                } else {
                    session.archive_id = Some(archive_id);
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("archival of session {} failed: {}", session.id, e),
        }
    }
}

fn invalid_state(session: &Session) -> ConsultError {
    ConsultError::InvalidState {
        session: session.id.clone(),
        status: session.status.to_string(),
    }
}

fn flushed_message(session_id: &str, buffered: BufferedMessage) -> SessionMessage {
    SessionMessage {
        id: new_message_id(),
        session_id: session_id.to_string(),
        sender_id: buffered.sender_id,
        body: buffered.body,
        media_ref: buffered.media_ref,
        created_at: buffered.authored_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::NoopArchiver;
    use crate::notify::RecordingNotifier;
    use tempfile::tempdir;

    struct Fixture {
        service: ConsultationService,
        notifier: Arc<RecordingNotifier>,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        fixture_with_archiver(Arc::new(NoopArchiver))
    }

    fn fixture_with_archiver(archiver: Arc<dyn Archiver>) -> Fixture {
        let dir = tempdir().expect("failed to create tempdir");
        let store = Arc::new(
            SessionStore::new_with_path(dir.path().join("consultd.db")).expect("store failed"),
        );
        let buffer = Arc::new(MessageBuffer::in_memory(chrono::Duration::minutes(15)));
        let notifier = Arc::new(RecordingNotifier::new());
        let service = ConsultationService::new(
            store,
            buffer,
            notifier.clone(),
            archiver,
            &Config::default(),
        );
        Fixture {
            service,
            notifier,
            _dir: dir,
        }
    }

    const CLIENT: UserId = 100;
    const ADVISOR: UserId = 200;

    #[tokio::test]
    async fn test_request_creates_pending_session_and_notifies_advisor() {
        let f = fixture();
        let session = f
            .service
            .request(CLIENT, ADVISOR, Some("taxes".into()))
            .await
            .expect("request failed");

        assert_eq!(session.status, SessionStatus::Pending);
        assert!(session.expires_at.is_some());
        assert_eq!(f.notifier.count_of("new_request"), 1);
        assert_eq!(f.notifier.sent()[0].recipient, ADVISOR);
    }

    #[tokio::test]
    async fn test_duplicate_request_returns_same_session() {
        let f = fixture();
        let first = f.service.request(CLIENT, ADVISOR, None).await.expect("request failed");
        let second = f.service.request(CLIENT, ADVISOR, None).await.expect("replay failed");

        assert_eq!(first.id, second.id);
        assert!(f
            .service
            .store()
            .find_active_or_pending(CLIENT)
            .expect("find failed")
            .is_some());
    }

    #[tokio::test]
    async fn test_request_with_open_session_elsewhere_fails() {
        let f = fixture();
        f.service.request(CLIENT, ADVISOR, None).await.expect("request failed");

        let err = f.service.request(CLIENT, 201, None).await.unwrap_err();
        assert!(matches!(err, ConsultError::AlreadyInSession(c) if c == CLIENT));
    }

    #[tokio::test]
    async fn test_request_for_busy_advisor_fails() {
        let f = fixture();
        f.service.request(CLIENT, ADVISOR, None).await.expect("request failed");

        let err = f.service.request(101, ADVISOR, None).await.unwrap_err();
        assert!(matches!(err, ConsultError::AdvisorBusy(a) if a == ADVISOR));
    }

    #[tokio::test]
    async fn test_accept_flushes_buffer_in_order() {
        let f = fixture();
        let session = f.service.request(CLIENT, ADVISOR, None).await.expect("request failed");

        for body in ["m1", "m2", "m3"] {
            let outcome = f
                .service
                .send(&session.id, CLIENT, body.into())
                .await
                .expect("send failed");
            assert_eq!(outcome, SendOutcome::Buffered);
        }

        let accepted = f.service.accept(&session.id, ADVISOR).await.expect("accept failed");
        assert_eq!(accepted.status, SessionStatus::Active);
        assert!(accepted.expires_at.is_none());

        let messages = f
            .service
            .store()
            .messages_for_session(&session.id)
            .expect("messages failed");
        let bodies: Vec<_> = messages.iter().filter_map(|m| m.body.as_deref()).collect();
        assert_eq!(bodies, vec!["m1", "m2", "m3"]);
        assert!(messages.iter().all(|m| m.sender_id == CLIENT));

        assert_eq!(f.notifier.count_of("request_accepted"), 1);
    }

    #[tokio::test]
    async fn test_accept_guards() {
        let f = fixture();
        let session = f.service.request(CLIENT, ADVISOR, None).await.expect("request failed");

        let err = f.service.accept(&session.id, 999).await.unwrap_err();
        assert!(matches!(err, ConsultError::Forbidden { .. }));

        let err = f.service.accept("no-such-session", ADVISOR).await.unwrap_err();
        assert!(matches!(err, ConsultError::NotFound { .. }));

        f.service.accept(&session.id, ADVISOR).await.expect("accept failed");
        let err = f.service.accept(&session.id, ADVISOR).await.unwrap_err();
        assert!(matches!(err, ConsultError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_decline_discards_buffer() {
        let f = fixture();
        let session = f.service.request(CLIENT, ADVISOR, None).await.expect("request failed");
        f.service
            .send(&session.id, CLIENT, "hello?".into())
            .await
            .expect("send failed");

        let declined = f.service.decline(&session.id, ADVISOR).await.expect("decline failed");
        assert_eq!(declined.status, SessionStatus::Declined);
        assert_eq!(f.notifier.count_of("request_declined"), 1);

        // Nothing was migrated into stored messages
        assert!(f
            .service
            .store()
            .messages_for_session(&session.id)
            .expect("messages failed")
            .is_empty());
    }

    #[tokio::test]
    async fn test_cancel_only_by_requesting_client() {
        let f = fixture();
        let session = f.service.request(CLIENT, ADVISOR, None).await.expect("request failed");

        let err = f.service.cancel(&session.id, ADVISOR).await.unwrap_err();
        assert!(matches!(err, ConsultError::Forbidden { .. }));

        let cancelled = f.service.cancel(&session.id, CLIENT).await.expect("cancel failed");
        assert_eq!(cancelled.status, SessionStatus::Cancelled);
        assert_eq!(f.notifier.count_of("request_cancelled"), 1);
        assert_eq!(f.notifier.sent().last().unwrap().recipient, ADVISOR);
    }

    #[tokio::test]
    async fn test_send_in_active_session_stores_and_forwards() {
        let f = fixture();
        let session = f.service.request(CLIENT, ADVISOR, None).await.expect("request failed");
        f.service.accept(&session.id, ADVISOR).await.expect("accept failed");

        let outcome = f
            .service
            .send(&session.id, ADVISOR, "how can I help?".into())
            .await
            .expect("send failed");

        let message = match outcome {
            SendOutcome::Delivered(message) => message,
            other => panic!("expected delivered outcome, got {:?}", other),
        };
        assert_eq!(message.sender_id, ADVISOR);

        // Forwarded to the client, not echoed to the sender
        let forwarded = f.notifier.sent();
        let forward = forwarded
            .iter()
            .find(|n| n.kind.label() == "message_forwarded")
            .expect("no forward notification");
        assert_eq!(forward.recipient, CLIENT);
    }

    #[tokio::test]
    async fn test_send_guards() {
        let f = fixture();
        let session = f.service.request(CLIENT, ADVISOR, None).await.expect("request failed");

        let err = f.service.send(&session.id, 999, "hi".into()).await.unwrap_err();
        assert!(matches!(err, ConsultError::Forbidden { .. }));

        f.service.decline(&session.id, ADVISOR).await.expect("decline failed");
        let err = f.service.send(&session.id, CLIENT, "hi".into()).await.unwrap_err();
        assert!(matches!(err, ConsultError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_complete_by_either_participant_and_idempotent() {
        let f = fixture();
        let session = f.service.request(CLIENT, ADVISOR, None).await.expect("request failed");
        f.service.accept(&session.id, ADVISOR).await.expect("accept failed");

        let completed = f.service.complete(&session.id, CLIENT).await.expect("complete failed");
        assert_eq!(completed.status, SessionStatus::Completed);
        assert!(completed.completed_at.is_some());
        assert_eq!(f.notifier.count_of("session_completed"), 1);

        // The advisor's duplicate completion event is a quiet success
        let again = f.service.complete(&session.id, ADVISOR).await.expect("recomplete failed");
        assert_eq!(again.status, SessionStatus::Completed);
        assert_eq!(f.notifier.count_of("session_completed"), 1);
    }

    #[tokio::test]
    async fn test_complete_pending_session_is_invalid() {
        let f = fixture();
        let session = f.service.request(CLIENT, ADVISOR, None).await.expect("request failed");
        let err = f.service.complete(&session.id, CLIENT).await.unwrap_err();
        assert!(matches!(err, ConsultError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_complete_records_archive_id() {
        struct StaticArchiver;

        #[async_trait::async_trait]
        impl Archiver for StaticArchiver {
            async fn archive(
                &self,
                _session: &Session,
                _transcript: &[SessionMessage],
            ) -> Result<Option<String>> {
                Ok(Some("arch-42".to_string()))
            }
        }

        let f = fixture_with_archiver(Arc::new(StaticArchiver));
        let session = f.service.request(CLIENT, ADVISOR, None).await.expect("request failed");
        f.service.accept(&session.id, ADVISOR).await.expect("accept failed");

        let completed = f.service.complete(&session.id, ADVISOR).await.expect("complete failed");
        assert_eq!(completed.archive_id.as_deref(), Some("arch-42"));
        assert_eq!(
            f.service
                .store()
                .get(&session.id)
                .expect("get failed")
                .unwrap()
                .archive_id
                .as_deref(),
            Some("arch-42")
        );
    }

    #[tokio::test]
    async fn test_failing_archiver_does_not_fail_complete() {
        struct FailingArchiver;

        #[async_trait::async_trait]
        impl Archiver for FailingArchiver {
            async fn archive(
                &self,
                _session: &Session,
                _transcript: &[SessionMessage],
            ) -> Result<Option<String>> {
                Err(ConsultError::Config("archive backend offline".into()))
            }
        }

        let f = fixture_with_archiver(Arc::new(FailingArchiver));
        let session = f.service.request(CLIENT, ADVISOR, None).await.expect("request failed");
        f.service.accept(&session.id, ADVISOR).await.expect("accept failed");

        let completed = f.service.complete(&session.id, CLIENT).await.expect("complete failed");
        assert_eq!(completed.status, SessionStatus::Completed);
        assert!(completed.archive_id.is_none());
    }

    #[tokio::test]
    async fn test_rate_happy_path_updates_aggregate() {
        let f = fixture();
        let session = f.service.request(CLIENT, ADVISOR, None).await.expect("request failed");
        f.service.accept(&session.id, ADVISOR).await.expect("accept failed");
        f.service.complete(&session.id, CLIENT).await.expect("complete failed");

        let profile = f.service.rate(&session.id, CLIENT, 5).await.expect("rate failed");
        assert_eq!(profile.rating, 5.0);
        assert_eq!(profile.review_count, 1);
        assert_eq!(f.notifier.count_of("review_received"), 1);
    }

    #[tokio::test]
    async fn test_rate_guards() {
        let f = fixture();
        let session = f.service.request(CLIENT, ADVISOR, None).await.expect("request failed");

        let err = f.service.rate(&session.id, CLIENT, 0).await.unwrap_err();
        assert!(matches!(err, ConsultError::RatingOutOfRange(0)));
        let err = f.service.rate(&session.id, CLIENT, 6).await.unwrap_err();
        assert!(matches!(err, ConsultError::RatingOutOfRange(6)));

        // Not completed yet
        let err = f.service.rate(&session.id, CLIENT, 4).await.unwrap_err();
        assert!(matches!(err, ConsultError::InvalidState { .. }));

        f.service.accept(&session.id, ADVISOR).await.expect("accept failed");
        f.service.complete(&session.id, ADVISOR).await.expect("complete failed");

        let err = f.service.rate(&session.id, ADVISOR, 4).await.unwrap_err();
        assert!(matches!(err, ConsultError::Forbidden { .. }));

        f.service.rate(&session.id, CLIENT, 4).await.expect("rate failed");
        let err = f.service.rate(&session.id, CLIENT, 4).await.unwrap_err();
        assert!(matches!(err, ConsultError::AlreadyReviewed(_)));
    }

    #[tokio::test]
    async fn test_advisor_online_after_accept() {
        let f = fixture();
        assert!(!f.service.advisor_online(ADVISOR).expect("online check failed"));

        let session = f.service.request(CLIENT, ADVISOR, None).await.expect("request failed");
        f.service.accept(&session.id, ADVISOR).await.expect("accept failed");

        assert!(f.service.advisor_online(ADVISOR).expect("online check failed"));
    }
}
