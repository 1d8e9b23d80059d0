//! Session lifecycle integration tests against the hub registry

use std::sync::Arc;
use std::time::Duration;

use telecall::auth::{AccessRole, Identity};
use telecall::config::{HubConfig, IceProviderConfig};
use telecall::hub::{ClientFrame, ServerFrame, SessionRegistry};
use telecall::ice::IceProvider;
use telecall::store::{MemoryStore, MessageStore, PartyRole, SessionStatus, SessionStore};
use telecall::Error;
use tokio::sync::mpsc;

fn identity(id: &str) -> Identity {
    Identity {
        id: id.to_string(),
        role: AccessRole::User,
    }
}

fn registry_with(config: HubConfig) -> (Arc<SessionRegistry>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let ice = IceProvider::new(IceProviderConfig::default());
    let registry = Arc::new(SessionRegistry::new(
        store.clone(),
        store.clone(),
        ice,
        config,
    ));
    (registry, store)
}

fn registry() -> (Arc<SessionRegistry>, Arc<MemoryStore>) {
    registry_with(HubConfig::default())
}

async fn next_frame(rx: &mut mpsc::Receiver<String>) -> ServerFrame {
    let raw = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("frame within deadline")
        .expect("channel open");
    serde_json::from_str(&raw).expect("valid server frame")
}

#[tokio::test]
async fn test_full_call_lifecycle() {
    let (registry, store) = registry();
    let alice = identity("alice");
    let bob = identity("bob");

    let (session, existing) = registry
        .create_session(&alice, "bob", Some("case-77".to_string()))
        .await
        .unwrap();
    assert!(!existing);
    assert_eq!(session.status, SessionStatus::Created);
    assert_eq!(session.linkage_id.as_deref(), Some("case-77"));

    // Both parties join; the initiator's join activates the session
    let (alice_tx, mut alice_rx) = mpsc::channel(16);
    let (bob_tx, mut bob_rx) = mpsc::channel(16);

    let ack = registry.join(&alice, &session.id, alice_tx).await.unwrap();
    assert_eq!(ack.role, PartyRole::Initiator);
    assert_eq!(ack.session.status, SessionStatus::Active);
    assert!(!ack.ice_servers.is_empty());

    let ack = registry.join(&bob, &session.id, bob_tx).await.unwrap();
    assert_eq!(ack.role, PartyRole::Responder);
    assert_eq!(ack.session.participant_count, 2);

    // Alice learns that bob arrived
    let frame = next_frame(&mut alice_rx).await;
    assert!(matches!(frame, ServerFrame::PeerJoined { user_id, .. } if user_id == "bob"));

    // Offer/answer relay, persisted before delivery
    registry
        .relay(
            &alice,
            &session.id,
            ClientFrame::Offer {
                sdp: "v=0 offer".to_string(),
            },
        )
        .await
        .unwrap();
    let frame = next_frame(&mut bob_rx).await;
    assert!(matches!(frame, ServerFrame::Offer { sender, sdp } if sender == "alice" && sdp == "v=0 offer"));

    registry
        .relay(
            &bob,
            &session.id,
            ClientFrame::Answer {
                sdp: "v=0 answer".to_string(),
            },
        )
        .await
        .unwrap();
    let frame = next_frame(&mut alice_rx).await;
    assert!(matches!(frame, ServerFrame::Answer { sender, .. } if sender == "bob"));

    registry
        .relay(
            &alice,
            &session.id,
            ClientFrame::IceCandidate {
                candidate: "candidate:1 1 udp 2122260223 192.0.2.1 54400 typ host".to_string(),
                sdp_mid: Some("0".to_string()),
                sdp_mline_index: Some(0),
            },
        )
        .await
        .unwrap();
    let frame = next_frame(&mut bob_rx).await;
    assert!(matches!(frame, ServerFrame::IceCandidate { .. }));

    // Chat rides the same relay and lands in the archive
    registry
        .relay(
            &alice,
            &session.id,
            ClientFrame::Chat {
                message_id: "m1".to_string(),
                body: "how are you feeling today?".to_string(),
            },
        )
        .await
        .unwrap();
    let frame = next_frame(&mut bob_rx).await;
    assert!(matches!(frame, ServerFrame::Chat { message } if message.id == "m1"));

    let history = store.chat_history(&session.id, 0, 50).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].body, "how are you feeling today?");

    // Join + offer + answer + candidate audit records (chat is stored apart)
    assert_eq!(store.negotiation_count(&session.id).await.unwrap(), 5);

    // Either party may end; both get the broadcast
    let ended = registry.end_session(&bob, &session.id).await.unwrap();
    assert_eq!(ended.status, SessionStatus::Ended);
    assert!(ended.duration_secs.unwrap() >= 0);

    let frame = next_frame(&mut alice_rx).await;
    assert!(matches!(frame, ServerFrame::SessionEnded { ended_by, .. } if ended_by == "bob"));
    let frame = next_frame(&mut bob_rx).await;
    assert!(matches!(frame, ServerFrame::SessionEnded { .. }));
}

#[tokio::test]
async fn test_create_is_idempotent_per_open_pair() {
    let (registry, _) = registry();
    let alice = identity("alice");
    let bob = identity("bob");

    let (first, existing) = registry.create_session(&alice, "bob", None).await.unwrap();
    assert!(!existing);

    // Same pair, either role order, collapses to the open session
    let (second, existing) = registry.create_session(&bob, "alice", None).await.unwrap();
    assert!(existing);
    assert_eq!(second.id, first.id);

    // Once ended, a fresh session may be created
    registry.end_session(&alice, &first.id).await.unwrap();
    let (third, existing) = registry.create_session(&alice, "bob", None).await.unwrap();
    assert!(!existing);
    assert_ne!(third.id, first.id);
}

#[tokio::test]
async fn test_ended_session_rejects_join_and_relay() {
    let (registry, _) = registry();
    let alice = identity("alice");

    let (session, _) = registry.create_session(&alice, "bob", None).await.unwrap();
    registry.end_session(&alice, &session.id).await.unwrap();

    let (tx, _rx) = mpsc::channel(4);
    let result = registry.join(&alice, &session.id, tx).await;
    assert!(matches!(result, Err(Error::SessionEnded(_))));

    let result = registry
        .relay(
            &alice,
            &session.id,
            ClientFrame::Offer {
                sdp: "v=0".to_string(),
            },
        )
        .await;
    assert!(matches!(result, Err(Error::SessionEnded(_))));

    // Ending twice is a conflict
    let result = registry.end_session(&alice, &session.id).await;
    assert!(matches!(result, Err(Error::Conflict(_))));
}

#[tokio::test]
async fn test_outsider_is_forbidden() {
    let (registry, _) = registry();
    let alice = identity("alice");
    let mallory = identity("mallory");

    let (session, _) = registry.create_session(&alice, "bob", None).await.unwrap();

    let (tx, _rx) = mpsc::channel(4);
    let result = registry.join(&mallory, &session.id, tx).await;
    assert!(matches!(result, Err(Error::Forbidden(_))));

    let result = registry.end_session(&mallory, &session.id).await;
    assert!(matches!(result, Err(Error::Forbidden(_))));
}

#[tokio::test]
async fn test_relay_requires_join() {
    let (registry, _) = registry();
    let alice = identity("alice");

    let (session, _) = registry.create_session(&alice, "bob", None).await.unwrap();
    let result = registry
        .relay(
            &alice,
            &session.id,
            ClientFrame::Offer {
                sdp: "v=0".to_string(),
            },
        )
        .await;
    assert!(matches!(result, Err(Error::Forbidden(_))));
}

#[tokio::test]
async fn test_relay_to_offline_counterpart_still_persists() {
    let (registry, store) = registry();
    let alice = identity("alice");

    let (session, _) = registry.create_session(&alice, "bob", None).await.unwrap();
    let (tx, _rx) = mpsc::channel(4);
    registry.join(&alice, &session.id, tx).await.unwrap();

    // Bob never joined; the relay succeeds and the record survives
    registry
        .relay(
            &alice,
            &session.id,
            ClientFrame::Offer {
                sdp: "v=0 early".to_string(),
            },
        )
        .await
        .unwrap();

    // Join + offer
    assert_eq!(store.negotiation_count(&session.id).await.unwrap(), 2);
}

#[tokio::test]
async fn test_oversized_chat_rejected() {
    let config = HubConfig {
        max_chat_body_chars: 10,
        ..HubConfig::default()
    };
    let (registry, store) = registry_with(config);
    let alice = identity("alice");

    let (session, _) = registry.create_session(&alice, "bob", None).await.unwrap();
    let (tx, _rx) = mpsc::channel(4);
    registry.join(&alice, &session.id, tx).await.unwrap();

    let result = registry
        .relay(
            &alice,
            &session.id,
            ClientFrame::Chat {
                message_id: "m1".to_string(),
                body: "this body is longer than ten characters".to_string(),
            },
        )
        .await;
    assert!(matches!(result, Err(Error::Negotiation(_))));
    assert!(store.chat_history(&session.id, 0, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_create_rate_limit() {
    let config = HubConfig {
        create_limit_per_window: 2,
        rate_window_secs: 3600,
        ..HubConfig::default()
    };
    let (registry, _) = registry_with(config);
    let alice = identity("alice");

    // Idempotent lookups of the same open pair still consume budget
    registry.create_session(&alice, "bob", None).await.unwrap();
    registry.create_session(&alice, "carol", None).await.unwrap();

    let result = registry.create_session(&alice, "dave", None).await;
    assert!(matches!(result, Err(Error::RateLimited(_))));
}

#[tokio::test]
async fn test_leave_keeps_session_open() {
    let (registry, store) = registry();
    let alice = identity("alice");
    let bob = identity("bob");

    let (session, _) = registry.create_session(&alice, "bob", None).await.unwrap();
    let (alice_tx, mut alice_rx) = mpsc::channel(16);
    let (bob_tx, _bob_rx) = mpsc::channel(16);
    registry.join(&alice, &session.id, alice_tx).await.unwrap();
    registry.join(&bob, &session.id, bob_tx).await.unwrap();
    let _ = next_frame(&mut alice_rx).await; // peer_joined

    registry.leave(&bob, &session.id).await.unwrap();
    let frame = next_frame(&mut alice_rx).await;
    assert!(matches!(frame, ServerFrame::PeerLeft { user_id } if user_id == "bob"));

    let current = store.get(&session.id).await.unwrap().unwrap();
    assert_eq!(current.status, SessionStatus::Active);
    assert_eq!(current.participant_count, 1);

    // Leaving twice is a no-op
    registry.leave(&bob, &session.id).await.unwrap();
}

#[tokio::test]
async fn test_reaper_ends_idle_sessions() {
    let config = HubConfig {
        session_idle_secs: 0,
        ..HubConfig::default()
    };
    let (registry, store) = registry_with(config);
    let alice = identity("alice");

    let (session, _) = registry.create_session(&alice, "bob", None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let reaped = registry.reap_idle().await.unwrap();
    assert_eq!(reaped, 1);

    let current = store.get(&session.id).await.unwrap().unwrap();
    assert_eq!(current.status, SessionStatus::Ended);

    // Nothing left to reap
    assert_eq!(registry.reap_idle().await.unwrap(), 0);
}
