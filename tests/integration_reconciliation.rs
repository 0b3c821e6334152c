//! Integration tests for cursor/record reconciliation
//!
//! The conversational cursor is a cache of the session record; these
//! tests break the cache the way production does (dropped notifications,
//! restarts, background expiry) and verify the gate repairs it without
//! dispatching the stale event.

use std::sync::Arc;

use consultd::archive::NoopArchiver;
use consultd::buffer::MessageBuffer;
use consultd::gate::{CursorRegistry, GateNotice, Phase, ReconciliationGate};
use consultd::notify::RecordingNotifier;
use consultd::router::{EventKind, EventOutcome, EventRouter, InboundEvent};
use consultd::session::{ConsultationService, SessionStatus, SessionStore, UserId};
use consultd::Config;
use tempfile::TempDir;

const CLIENT: UserId = 100;
const ADVISOR: UserId = 200;

struct Harness {
    router: EventRouter,
    service: Arc<ConsultationService>,
    store: Arc<SessionStore>,
    cursors: Arc<CursorRegistry>,
    notifier: Arc<RecordingNotifier>,
    _dir: TempDir,
}

fn harness() -> Harness {
    let config = Config::default();
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
    let router = EventRouter::new(service.clone(), gate, cursors.clone());

    Harness {
        router,
        service,
        store,
        cursors,
        notifier,
        _dir: dir,
    }
}

fn event(user_id: UserId, kind: EventKind) -> InboundEvent {
    InboundEvent { user_id, kind }
}

#[tokio::test]
async fn test_chatting_cursor_over_expired_session() {
    let h = harness();

    // Plant an already-overdue request and expire it in the background,
    // as the sweep would after a restart
    let created = chrono::Utc::now() - chrono::Duration::minutes(20);
    let session = consultd::Session::new_pending(
        CLIENT,
        ADVISOR,
        None,
        "rq-recon".into(),
        created,
        chrono::Duration::minutes(15),
    );
    h.store.create(&session).expect("create failed");
    h.store.sweep_expired(chrono::Utc::now()).expect("sweep failed");

    // The client's device missed all of it and still shows the chat UI
    h.cursors.set(CLIENT, Phase::Chatting(session.id.clone()));
    let sent_before = h.notifier.sent().len();

    let outcome = h
        .router
        .handle(event(CLIENT, EventKind::ChatMessage { text: "hello?".into() }))
        .await;

    // Swallowed with a corrective notice; cursor cleared; nothing else
    // visible outside
    match outcome {
        EventOutcome::Corrected(GateNotice::PhaseCorrected { session_id, status }) => {
            assert_eq!(session_id, session.id);
            assert_eq!(status, SessionStatus::Expired);
        }
        other => panic!("expected corrective notice, got {:?}", other),
    }
    assert!(h.cursors.get(CLIENT).is_none());
    assert_eq!(h.notifier.sent().len(), sent_before);
    assert!(h
        .store
        .messages_for_session(&session.id)
        .expect("messages failed")
        .is_empty());

    // The reissued event now gets an honest rejection
    let outcome = h
        .router
        .handle(event(CLIENT, EventKind::ChatMessage { text: "hello?".into() }))
        .await;
    assert!(matches!(outcome, EventOutcome::Rejected(_)));
}

#[tokio::test]
async fn test_waiting_cursor_catches_up_after_missed_accept() {
    let h = harness();
    let outcome = h
        .router
        .handle(event(
            CLIENT,
            EventKind::RequestConsultation {
                advisor_id: ADVISOR,
                theme: None,
            },
        ))
        .await;
    assert!(matches!(outcome, EventOutcome::Handled));
    let session_id = h.cursors.get(CLIENT).unwrap().session_id().to_string();

    // The advisor accepts through another worker; this process's cursor
    // for the client was never advanced
    h.service
        .accept(&session_id, ADVISOR)
        .await
        .expect("accept failed");
    h.cursors.set(CLIENT, Phase::WaitingForAdvisor(session_id.clone()));

    let outcome = h
        .router
        .handle(event(CLIENT, EventKind::ChatMessage { text: "hi".into() }))
        .await;
    match outcome {
        EventOutcome::Corrected(GateNotice::PhaseCorrected { status, .. }) => {
            assert_eq!(status, SessionStatus::Active);
        }
        other => panic!("expected corrective notice, got {:?}", other),
    }
    assert_eq!(h.cursors.get(CLIENT), Some(Phase::Chatting(session_id.clone())));

    // The swallowed message was not delivered; the reissued one is
    assert!(h
        .store
        .messages_for_session(&session_id)
        .expect("messages failed")
        .is_empty());
    let outcome = h
        .router
        .handle(event(CLIENT, EventKind::ChatMessage { text: "hi".into() }))
        .await;
    assert!(matches!(outcome, EventOutcome::Handled));
    assert_eq!(
        h.store
            .messages_for_session(&session_id)
            .expect("messages failed")
            .len(),
        1
    );
}

#[tokio::test]
async fn test_cursor_over_vanished_session_is_cleared() {
    let h = harness();
    h.cursors.set(CLIENT, Phase::Rating("01ARZ3NDEKTSV4RRFFQ69G5FAV".into()));

    let outcome = h
        .router
        .handle(event(CLIENT, EventKind::RateSession { rating: 5 }))
        .await;
    assert!(matches!(
        outcome,
        EventOutcome::Corrected(GateNotice::SessionMissing)
    ));
    assert!(h.cursors.get(CLIENT).is_none());
}

#[tokio::test]
async fn test_gate_expires_overdue_pending_inline() {
    let h = harness();
    let created = chrono::Utc::now() - chrono::Duration::minutes(20);
    let session = consultd::Session::new_pending(
        CLIENT,
        ADVISOR,
        None,
        "rq-inline".into(),
        created,
        chrono::Duration::minutes(15),
    );
    h.store.create(&session).expect("create failed");
    h.cursors.set(CLIENT, Phase::WaitingForAdvisor(session.id.clone()));

    // No timer and no sweep have run; the gate's inline check is the
    // third safety net
    let outcome = h
        .router
        .handle(event(CLIENT, EventKind::ChatMessage { text: "still there?".into() }))
        .await;
    match outcome {
        EventOutcome::Corrected(GateNotice::RequestExpired { session_id }) => {
            assert_eq!(session_id, session.id);
        }
        other => panic!("expected expiry notice, got {:?}", other),
    }

    assert_eq!(
        h.store.get(&session.id).expect("get failed").unwrap().status,
        SessionStatus::Expired
    );
    // The inline path delivered the genuine expiry notification, exactly once
    assert_eq!(h.notifier.count_of("session_expired"), 1);
}

#[tokio::test]
async fn test_completed_session_steers_client_into_rating() {
    let h = harness();
    let outcome = h
        .router
        .handle(event(
            CLIENT,
            EventKind::RequestConsultation {
                advisor_id: ADVISOR,
                theme: None,
            },
        ))
        .await;
    assert!(matches!(outcome, EventOutcome::Handled));
    let session_id = h.cursors.get(CLIENT).unwrap().session_id().to_string();

    h.service.accept(&session_id, ADVISOR).await.expect("accept failed");
    // The advisor completes elsewhere; the client's cursor is stale at
    // chatting
    h.service
        .complete(&session_id, ADVISOR)
        .await
        .expect("complete failed");
    h.cursors.set(CLIENT, Phase::Chatting(session_id.clone()));

    let outcome = h
        .router
        .handle(event(CLIENT, EventKind::ChatMessage { text: "thanks!".into() }))
        .await;
    match outcome {
        EventOutcome::Corrected(GateNotice::PhaseCorrected { status, .. }) => {
            assert_eq!(status, SessionStatus::Completed);
        }
        other => panic!("expected corrective notice, got {:?}", other),
    }
    assert_eq!(h.cursors.get(CLIENT), Some(Phase::Rating(session_id.clone())));

    // With the repaired cursor the rating goes straight through
    let outcome = h
        .router
        .handle(event(CLIENT, EventKind::RateSession { rating: 4 }))
        .await;
    assert!(matches!(outcome, EventOutcome::Handled));
    let profile = h
        .store
        .get_advisor(ADVISOR)
        .expect("advisor lookup failed")
        .expect("profile missing");
    assert_eq!(profile.rating, 4.0);
}
