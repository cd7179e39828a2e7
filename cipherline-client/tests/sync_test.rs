//! Conversation polling: cadence, cancellation and failure classification.

mod common;

use std::time::Duration;

use cipherline::{ApiError, ClientEvent, EncryptionState, Error, SendError};
use common::{assert_keys_match_states, drain, error_notices, logged_in, FakeServer};
use tokio::time::sleep;

#[tokio::test(start_paused = true)]
async fn test_polls_every_two_seconds() {
    let server = FakeServer::with_users(&["alice", "bob"]);
    server.establish_pair("alice", "bob");
    let alice = logged_in(&server, "alice").await;

    alice.select("bob").unwrap();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(server.fetch_count("alice", "bob"), 1);

    sleep(Duration::from_secs(4)).await;
    assert_eq!(server.fetch_count("alice", "bob"), 3);
}

#[tokio::test(start_paused = true)]
async fn test_switching_peer_cancels_previous_poller() {
    let server = FakeServer::with_users(&["alice", "bob", "carol"]);
    server.establish_pair("alice", "bob");
    server.establish_pair("alice", "carol");
    let alice = logged_in(&server, "alice").await;

    alice.select("bob").unwrap();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(server.fetch_count("alice", "bob"), 1);

    alice.select("carol").unwrap();
    sleep(Duration::from_secs(5)).await;

    assert_eq!(server.fetch_count("alice", "bob"), 1);
    assert_eq!(server.fetch_count("alice", "carol"), 3);
}

#[tokio::test(start_paused = true)]
async fn test_logout_and_deselect_stop_polling() {
    let server = FakeServer::with_users(&["alice", "bob"]);
    server.establish_pair("alice", "bob");
    let alice = logged_in(&server, "alice").await;

    alice.select("bob").unwrap();
    sleep(Duration::from_millis(100)).await;
    alice.deselect();
    assert!(alice.active_peer().is_none());
    sleep(Duration::from_secs(5)).await;
    assert_eq!(server.fetch_count("alice", "bob"), 1);

    alice.select("bob").unwrap();
    sleep(Duration::from_millis(100)).await;
    alice.logout();
    sleep(Duration::from_secs(5)).await;
    assert_eq!(server.fetch_count("alice", "bob"), 2);
    assert!(alice.active_peer().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_reselecting_active_peer_keeps_poller() {
    let server = FakeServer::with_users(&["alice", "bob"]);
    server.establish_pair("alice", "bob");
    let alice = logged_in(&server, "alice").await;

    alice.select("bob").unwrap();
    sleep(Duration::from_secs(1)).await;
    alice.select("bob").unwrap();
    sleep(Duration::from_millis(1500)).await;

    // Ticks at 0s and 2s only; no restart at 1s
    assert_eq!(server.fetch_count("alice", "bob"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_no_fetch_until_established() {
    let server = FakeServer::with_users(&["alice", "bob"]);
    let alice = logged_in(&server, "alice").await;

    alice.select("bob").unwrap();
    sleep(Duration::from_secs(3)).await;
    assert_eq!(server.fetch_count("alice", "bob"), 0);

    alice.initiate("bob").await.unwrap();
    alice.complete("bob", "2002").await.unwrap();
    server.push_message("bob", "alice", "hey");
    sleep(Duration::from_secs(2)).await;

    assert_eq!(server.fetch_count("alice", "bob"), 1);
    assert_eq!(alice.conversation().unwrap().messages.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_no_shared_key_resets_state_silently() {
    let server = FakeServer::with_users(&["alice", "bob"]);
    server.establish_pair("alice", "bob");
    server.push_message("bob", "alice", "hello");
    let alice = logged_in(&server, "alice").await;

    alice.select("bob").unwrap();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(alice.conversation().unwrap().messages.len(), 1);

    let mut events = alice.subscribe();
    server.drop_pair("alice", "bob");
    sleep(Duration::from_secs(2)).await;

    let view = alice.conversation().unwrap();
    assert!(view.messages.is_empty());
    assert_eq!(view.encryption_state, EncryptionState::None);
    assert!(alice.shared_keys().is_empty());
    assert_keys_match_states(&alice);

    let events = drain(&mut events);
    assert!(error_notices(&events).is_empty());
    assert!(events.iter().any(|e| matches!(
        e,
        ClientEvent::MessagesUpdated { peer, messages } if peer == "bob" && messages.is_empty()
    )));
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_keeps_state_and_polling() {
    let server = FakeServer::with_users(&["alice", "bob"]);
    server.establish_pair("alice", "bob");
    server.push_message("bob", "alice", "hello");
    let alice = logged_in(&server, "alice").await;

    alice.select("bob").unwrap();
    sleep(Duration::from_millis(100)).await;

    let mut events = alice.subscribe();
    server.set_fail_fetch(Some(ApiError::Status {
        status: 500,
        message: "Internal error".to_string(),
    }));
    sleep(Duration::from_secs(4)).await;

    assert_eq!(server.fetch_count("alice", "bob"), 3);
    let view = alice.conversation().unwrap();
    assert_eq!(view.encryption_state, EncryptionState::Established);
    assert_eq!(view.messages.len(), 1);
    assert_eq!(
        error_notices(&drain(&mut events)),
        vec![
            "Failed to load messages: Internal error".to_string(),
            "Failed to load messages: Internal error".to_string(),
        ]
    );

    server.set_fail_fetch(None);
    sleep(Duration::from_secs(2)).await;
    assert_eq!(server.fetch_count("alice", "bob"), 4);
}

#[tokio::test(start_paused = true)]
async fn test_response_for_previous_peer_is_discarded() {
    let server = FakeServer::with_users(&["alice", "bob", "carol"]);
    server.establish_pair("alice", "bob");
    server.establish_pair("alice", "carol");
    server.push_message("bob", "alice", "from bob");
    let alice = logged_in(&server, "alice").await;

    alice.select("bob").unwrap();
    server.set_fetch_delay("bob", Duration::from_secs(3));

    let (refreshed, selected) = tokio::join!(alice.refresh_messages(), async {
        sleep(Duration::from_secs(1)).await;
        alice.select("carol")
    });
    refreshed.unwrap();
    selected.unwrap();
    sleep(Duration::from_millis(100)).await;

    let view = alice.conversation().unwrap();
    assert_eq!(view.peer, "carol");
    assert!(view.messages.is_empty());
}

#[tokio::test]
async fn test_manual_refresh_reports_failures() {
    let server = FakeServer::with_users(&["alice", "bob"]);
    server.establish_pair("alice", "bob");
    let alice = logged_in(&server, "alice").await;

    assert!(alice.refresh_messages().await.is_ok());

    alice.select("bob").unwrap();
    server.set_fail_fetch(Some(ApiError::Transport("timed out".to_string())));
    assert!(matches!(
        alice.refresh_messages().await,
        Err(Error::Fetch { what: "messages", .. })
    ));
}

#[tokio::test]
async fn test_send_requires_established_encryption() {
    let server = FakeServer::with_users(&["alice", "bob"]);
    let alice = logged_in(&server, "alice").await;

    assert!(matches!(
        alice.send_message("hi").await,
        Err(Error::Send(SendError::NoActiveConversation))
    ));

    alice.select("bob").unwrap();
    assert!(matches!(
        alice.send_message("hi").await,
        Err(Error::Send(SendError::NotEstablished(_)))
    ));
}

#[tokio::test]
async fn test_send_failure_is_reported() {
    let server = FakeServer::with_users(&["alice", "bob"]);
    server.establish_pair("alice", "bob");
    let alice = logged_in(&server, "alice").await;
    alice.select("bob").unwrap();
    let mut events = alice.subscribe();

    server.set_fail_send(true);
    let err = alice.send_message("hi").await.unwrap_err();

    assert!(matches!(err, Error::Send(SendError::Rejected { .. })));
    assert_eq!(
        error_notices(&drain(&mut events)),
        vec!["Failed to send message".to_string()]
    );
    assert_eq!(alice.encryption_state(), EncryptionState::Established);
}
