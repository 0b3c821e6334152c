//! Integration tests for the full consultation lifecycle
//!
//! Drives the engine the way a transport adapter would: inbound events
//! through the router, with the store, buffer, and notifier wired up as
//! in production.

use std::sync::Arc;

use consultd::archive::NoopArchiver;
use consultd::buffer::MessageBuffer;
use consultd::gate::{CursorRegistry, ReconciliationGate};
use consultd::notify::RecordingNotifier;
use consultd::router::{EventKind, EventOutcome, EventRouter, InboundEvent};
use consultd::session::{ConsultationService, SessionStatus, SessionStore, UserId};
use consultd::{Config, ConsultError};
use tempfile::TempDir;

const CLIENT: UserId = 100;
const ADVISOR: UserId = 200;

struct Harness {
    router: EventRouter,
    service: Arc<ConsultationService>,
    store: Arc<SessionStore>,
    notifier: Arc<RecordingNotifier>,
    _dir: TempDir,
}

fn harness() -> Harness {
    harness_with_config(Config::default())
}

fn harness_with_config(config: Config) -> Harness {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let store = Arc::new(
        SessionStore::new_with_path(dir.path().join("consultd.db")).expect("Failed to open store"),
    );
    let buffer = Arc::new(MessageBuffer::in_memory(config.pending_window()));
    let notifier = Arc::new(RecordingNotifier::new());
    let cursors = Arc::new(CursorRegistry::new());

    let service = Arc::new(ConsultationService::new(
        store.clone(),
        buffer.clone(),
        notifier.clone(),
        Arc::new(NoopArchiver),
        &config,
    ));
    let gate = ReconciliationGate::new(store.clone(), buffer, notifier.clone(), cursors.clone());
    let router = EventRouter::new(service.clone(), gate, cursors);

    Harness {
        router,
        service,
        store,
        notifier,
        _dir: dir,
    }
}

fn event(user_id: UserId, kind: EventKind) -> InboundEvent {
    InboundEvent { user_id, kind }
}

#[tokio::test]
async fn test_end_to_end_consultation() {
    let h = harness();

    // Client A requests advisor B: session is pending with a deadline
    let outcome = h
        .router
        .handle(event(
            CLIENT,
            EventKind::RequestConsultation {
                advisor_id: ADVISOR,
                theme: Some("inheritance tax".into()),
            },
        ))
        .await;
    assert!(matches!(outcome, EventOutcome::Handled));

    let session = h
        .store
        .find_active_or_pending(CLIENT)
        .expect("lookup failed")
        .expect("no session created");
    assert_eq!(session.status, SessionStatus::Pending);
    let deadline = session.expires_at.expect("pending session has no deadline");
    let window = deadline - session.created_at;
    assert_eq!(window, chrono::Duration::minutes(15));
    assert_eq!(h.notifier.count_of("new_request"), 1);

    // A message before acceptance lands in the buffer
    let outcome = h
        .router
        .handle(event(
            CLIENT,
            EventKind::ChatMessage {
                text: "are you available?".into(),
            },
        ))
        .await;
    assert!(matches!(outcome, EventOutcome::Buffered));

    // B accepts within the window: session active, buffered message is
    // now a stored message
    let outcome = h
        .router
        .handle(event(
            ADVISOR,
            EventKind::AcceptRequest {
                session_id: session.id.clone(),
            },
        ))
        .await;
    assert!(matches!(outcome, EventOutcome::Handled));

    let session_now = h.store.get(&session.id).expect("get failed").unwrap();
    assert_eq!(session_now.status, SessionStatus::Active);
    assert!(session_now.expires_at.is_none());

    let messages = h.store.messages_for_session(&session.id).expect("messages failed");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].body.as_deref(), Some("are you available?"));
    assert_eq!(messages[0].sender_id, CLIENT);

    // A sends "hello": stored and forwarded
    let outcome = h
        .router
        .handle(event(CLIENT, EventKind::ChatMessage { text: "hello".into() }))
        .await;
    assert!(matches!(outcome, EventOutcome::Handled));
    let messages = h.store.messages_for_session(&session.id).expect("messages failed");
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].body.as_deref(), Some("hello"));

    // B completes: session completed with a completion timestamp
    let outcome = h.router.handle(event(ADVISOR, EventKind::CompleteSession)).await;
    assert!(matches!(outcome, EventOutcome::Handled));
    let session_now = h.store.get(&session.id).expect("get failed").unwrap();
    assert_eq!(session_now.status, SessionStatus::Completed);
    assert!(session_now.completed_at.is_some());

    // A rates 5: advisor aggregate includes the new rating
    let outcome = h
        .router
        .handle(event(CLIENT, EventKind::RateSession { rating: 5 }))
        .await;
    assert!(matches!(outcome, EventOutcome::Handled));

    let profile = h
        .store
        .get_advisor(ADVISOR)
        .expect("advisor lookup failed")
        .expect("advisor profile missing");
    assert_eq!(profile.rating, 5.0);
    assert_eq!(profile.review_count, 1);
    assert_eq!(h.notifier.count_of("review_received"), 1);
}

#[tokio::test]
async fn test_duplicate_requests_collapse_to_one_session() {
    let h = harness();

    let first = h
        .service
        .request(CLIENT, ADVISOR, None)
        .await
        .expect("first request failed");
    let second = h
        .service
        .request(CLIENT, ADVISOR, None)
        .await
        .expect("duplicate request failed");

    // Same session id, and no duplicate visible through the open-session
    // lookup
    assert_eq!(first.id, second.id);
    let open = h
        .store
        .find_active_or_pending(CLIENT)
        .expect("lookup failed")
        .expect("session missing");
    assert_eq!(open.id, first.id);
}

#[tokio::test]
async fn test_single_open_session_per_client() {
    let h = harness();

    h.service
        .request(CLIENT, ADVISOR, None)
        .await
        .expect("request failed");

    // A different advisor, so the idempotency key cannot collapse them
    let err = h.service.request(CLIENT, 201, None).await.unwrap_err();
    assert!(matches!(err, ConsultError::AlreadyInSession(_)));

    // And the advisor is equally protected
    let err = h.service.request(101, ADVISOR, None).await.unwrap_err();
    assert!(matches!(err, ConsultError::AdvisorBusy(_)));
}

#[tokio::test]
async fn test_buffer_flush_preserves_order_and_empties() {
    let h = harness();
    let session = h
        .service
        .request(CLIENT, ADVISOR, None)
        .await
        .expect("request failed");

    for text in ["M1", "M2", "M3"] {
        let outcome = h
            .router
            .handle(event(CLIENT, EventKind::ChatMessage { text: text.into() }))
            .await;
        assert!(matches!(outcome, EventOutcome::Buffered));
    }

    h.service
        .accept(&session.id, ADVISOR)
        .await
        .expect("accept failed");

    let messages = h.store.messages_for_session(&session.id).expect("messages failed");
    let bodies: Vec<_> = messages.iter().filter_map(|m| m.body.as_deref()).collect();
    assert_eq!(bodies, vec!["M1", "M2", "M3"]);

    // A second accept cannot replay the flush
    let err = h.service.accept(&session.id, ADVISOR).await.unwrap_err();
    assert!(matches!(err, ConsultError::InvalidState { .. }));
    let messages = h.store.messages_for_session(&session.id).expect("messages failed");
    assert_eq!(messages.len(), 3);
}

#[tokio::test]
async fn test_terminal_session_frees_both_participants() {
    let h = harness();
    let session = h
        .service
        .request(CLIENT, ADVISOR, None)
        .await
        .expect("request failed");
    h.service
        .decline(&session.id, ADVISOR)
        .await
        .expect("decline failed");

    // Both sides can enter new sessions immediately
    h.service
        .request(CLIENT, 201, None)
        .await
        .expect("client re-request failed");
    h.service
        .request(101, ADVISOR, None)
        .await
        .expect("advisor re-request failed");
}
