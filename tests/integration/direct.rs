//! Encrypted direct messaging between bootstrapped nodes.

use crate::*;

use std::sync::Mutex;

use rialto_core::DirectMessage;
use rialto_p2p::{DecryptedMessage, DirectMessageListener, SendResult};
use tokio::sync::mpsc;

struct Collector {
    received: Mutex<Vec<(String, String)>>,
}

impl Collector {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            received: Mutex::new(Vec::new()),
        })
    }
    fn messages(&self) -> Vec<(String, String)> {
        self.received.lock().unwrap().clone()
    }
}

impl DirectMessageListener for Collector {
    fn on_direct_message(&self, message: &DecryptedMessage) {
        self.received.lock().unwrap().push((
            message.message.msg_type.clone(),
            message.sender_address.to_string(),
        ));
    }
}

fn chat(msg_id: &str, body: &str) -> DirectMessage {
    DirectMessage {
        msg_id: msg_id.to_string(),
        msg_type: "chat".to_string(),
        sent_ts_ms: 1_700_000_000_000,
        body: serde_json::json!({ "text": body }),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn direct_message_arrives_decrypted_with_provenance() {
    let hub = MemoryHub::new();
    let seed = start_seed(&hub, "seed").await;
    let seeds = [seed.address.clone()];
    let alice = start_node(&hub, "alice", &seeds, Capabilities::own()).await;
    let bob = start_node(&hub, "bob", &seeds, Capabilities::own()).await;

    let collector = Collector::new();
    bob.service.add_direct_message_listener(collector.clone());

    let (tx, mut rx) = mpsc::channel(1);
    alice
        .service
        .send_encrypted_direct_message(
            bob.address.clone(),
            bob.key_ring.pub_key_ring(),
            chat("m1", "hello bob"),
            None,
            move |result| {
                let _ = tx.try_send(result);
            },
        )
        .unwrap();
    assert_eq!(rx.recv().await, Some(SendResult::Arrived));

    wait_until(Duration::from_secs(5), || !collector.messages().is_empty()).await;
    let messages = collector.messages();
    assert_eq!(messages[0].0, "chat");
    assert_eq!(messages[0].1, alice.address.to_string());

    bob.service.shut_down().await;
    alice.service.shut_down().await;
    seed.service.shut_down().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn message_for_another_key_is_dropped_silently() {
    let hub = MemoryHub::new();
    let seed = start_seed(&hub, "seed").await;
    let seeds = [seed.address.clone()];
    let alice = start_node(&hub, "alice", &seeds, Capabilities::own()).await;
    let bob = start_node(&hub, "bob", &seeds, Capabilities::own()).await;

    let collector = Collector::new();
    bob.service.add_direct_message_listener(collector.clone());

    // Encrypted to a key bob does not hold — arrives at the transport
    // level but never reaches the listener.
    let stranger = KeyRing::generate();
    let (tx, mut rx) = mpsc::channel(1);
    alice
        .service
        .send_encrypted_direct_message(
            bob.address.clone(),
            stranger.pub_key_ring(),
            chat("m1", "not for you"),
            None,
            move |result| {
                let _ = tx.try_send(result);
            },
        )
        .unwrap();
    assert_eq!(rx.recv().await, Some(SendResult::Arrived));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(collector.messages().is_empty());

    bob.service.shut_down().await;
    alice.service.shut_down().await;
    seed.service.shut_down().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn send_to_unreachable_peer_reports_fault() {
    let hub = MemoryHub::new();
    let seed = start_seed(&hub, "seed").await;
    let alice = start_node(&hub, "alice", &[seed.address.clone()], Capabilities::own()).await;

    let ghost_keys = KeyRing::generate();
    let (tx, mut rx) = mpsc::channel(1);
    alice
        .service
        .send_encrypted_direct_message(
            addr("ghost"),
            ghost_keys.pub_key_ring(),
            chat("m1", "anyone there"),
            Some(Duration::from_secs(1)),
            move |result| {
                let _ = tx.try_send(result);
            },
        )
        .unwrap();

    match rx.recv().await {
        Some(SendResult::Fault(_)) => {}
        other => panic!("expected Fault, got {other:?}"),
    }

    alice.service.shut_down().await;
    seed.service.shut_down().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn panicking_listener_does_not_stall_the_node() {
    struct PanickingListener;
    impl DirectMessageListener for PanickingListener {
        fn on_direct_message(&self, _: &DecryptedMessage) {
            panic!("listener bug");
        }
    }

    let hub = MemoryHub::new();
    let seed = start_seed(&hub, "seed").await;
    let seeds = [seed.address.clone()];
    let alice = start_node(&hub, "alice", &seeds, Capabilities::own()).await;
    let bob = start_node(&hub, "bob", &seeds, Capabilities::own()).await;

    // The broken listener registers first, the healthy one after it
    let collector = Collector::new();
    bob.service
        .add_direct_message_listener(Arc::new(PanickingListener));
    bob.service.add_direct_message_listener(collector.clone());

    for id in ["m1", "m2"] {
        let (tx, mut rx) = mpsc::channel(1);
        alice
            .service
            .send_encrypted_direct_message(
                bob.address.clone(),
                bob.key_ring.pub_key_ring(),
                chat(id, "still with us?"),
                None,
                move |result| {
                    let _ = tx.try_send(result);
                },
            )
            .unwrap();
        assert_eq!(rx.recv().await, Some(SendResult::Arrived));
    }
    wait_until(Duration::from_secs(5), || collector.messages().len() == 2).await;

    // The event loop survived the panics: gossip still reaches bob
    let payload = offer(&alice.key_ring, "offer-1", 100);
    assert!(alice
        .service
        .add_protected_storage_entry(payload.clone())
        .unwrap());
    wait_until(Duration::from_secs(5), || {
        bob.service.get_data_map().contains_key(&payload.entry_id())
    })
    .await;

    bob.service.shut_down().await;
    alice.service.shut_down().await;
    seed.service.shut_down().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn gated_message_type_faults_when_peer_lacks_capability() {
    let hub = MemoryHub::new();
    let seed = start_seed(&hub, "seed").await;
    let seeds = [seed.address.clone()];
    let alice = start_node(&hub, "alice", &seeds, Capabilities::own()).await;
    // Legacy bob advertises no capabilities
    let bob = start_node(&hub, "bob", &seeds, Capabilities::new()).await;

    // Make alice aware of bob by messaging once, so the capability
    // record exists on alice's side.
    let (tx0, mut rx0) = mpsc::channel(1);
    alice
        .service
        .send_encrypted_direct_message(
            bob.address.clone(),
            bob.key_ring.pub_key_ring(),
            chat("m0", "hi"),
            None,
            move |result| {
                let _ = tx0.try_send(result);
            },
        )
        .unwrap();
    assert_eq!(rx0.recv().await, Some(SendResult::Arrived));
    wait_until(Duration::from_secs(5), || {
        alice.service.peers.is_connected(&bob.address)
    })
    .await;

    let gated = DirectMessage {
        msg_id: "m1".to_string(),
        msg_type: "offer-taken".to_string(),
        sent_ts_ms: 1_700_000_000_000,
        body: serde_json::json!({ "offer_id": "offer-1" }),
    };
    let (tx, mut rx) = mpsc::channel(1);
    alice
        .service
        .send_encrypted_direct_message(
            bob.address.clone(),
            bob.key_ring.pub_key_ring(),
            gated,
            None,
            move |result| {
                let _ = tx.try_send(result);
            },
        )
        .unwrap();
    match rx.recv().await {
        Some(SendResult::Fault(reason)) => assert!(reason.contains("ReceiveOffersTaken")),
        other => panic!("expected Fault, got {other:?}"),
    }

    bob.service.shut_down().await;
    alice.service.shut_down().await;
    seed.service.shut_down().await;
}
