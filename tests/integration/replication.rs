//! Gossip replication: adds, replacements, tombstones, and refreshes
//! propagating across a small network.

use crate::*;

use rialto_core::PersistablePayload;

struct Net {
    seed: TestNode,
    alice: TestNode,
    bob: TestNode,
}

/// Seed plus two bootstrapped nodes, everyone fully capable.
async fn three_nodes() -> (Arc<rialto_p2p::transport::memory::MemoryHub>, Net) {
    let hub = MemoryHub::new();
    let seed = start_seed(&hub, "seed").await;
    let seeds = [seed.address.clone()];
    let alice = start_node(&hub, "alice", &seeds, Capabilities::own()).await;
    let bob = start_node(&hub, "bob", &seeds, Capabilities::own()).await;
    (hub, Net { seed, alice, bob })
}

impl Net {
    async fn shut_down(self) {
        self.alice.service.shut_down().await;
        self.bob.service.shut_down().await;
        self.seed.service.shut_down().await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn published_offer_reaches_all_nodes() {
    let (_hub, net) = three_nodes().await;

    let payload = offer(&net.alice.key_ring, "offer-1", 100);
    let id = payload.entry_id();
    assert!(net.alice.service.add_protected_storage_entry(payload).unwrap());

    for node in [&net.seed, &net.bob] {
        wait_until(Duration::from_secs(5), || {
            node.service.get_data_map().contains_key(&id)
        })
        .await;
    }

    net.shut_down().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn edited_offer_replaces_everywhere() {
    let (_hub, net) = three_nodes().await;

    let v1 = offer(&net.alice.key_ring, "offer-1", 100);
    let id = v1.entry_id();
    net.alice.service.add_protected_storage_entry(v1).unwrap();
    wait_until(Duration::from_secs(5), || {
        net.bob.service.get_data_map().contains_key(&id)
    })
    .await;

    let v2 = offer(&net.alice.key_ring, "offer-1", 250);
    net.alice.service.add_protected_storage_entry(v2).unwrap();

    wait_until(Duration::from_secs(5), || {
        net.bob
            .service
            .get_data_map()
            .get(&id)
            .map(|e| e.sequence_number == 2)
            .unwrap_or(false)
    })
    .await;

    net.shut_down().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn removed_offer_disappears_everywhere() {
    let (_hub, net) = three_nodes().await;

    let payload = offer(&net.alice.key_ring, "offer-1", 100);
    let id = payload.entry_id();
    net.alice
        .service
        .add_protected_storage_entry(payload.clone())
        .unwrap();
    wait_until(Duration::from_secs(5), || {
        net.bob.service.get_data_map().contains_key(&id)
    })
    .await;

    assert!(net.alice.service.remove_data(payload).unwrap());
    for node in [&net.seed, &net.bob] {
        wait_until(Duration::from_secs(5), || {
            !node.service.get_data_map().contains_key(&id)
        })
        .await;
    }

    net.shut_down().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn foreign_key_cannot_remove_an_offer() {
    let (_hub, net) = three_nodes().await;

    let payload = offer(&net.alice.key_ring, "offer-1", 100);
    let id = payload.entry_id();
    net.alice
        .service
        .add_protected_storage_entry(payload)
        .unwrap();
    wait_until(Duration::from_secs(5), || {
        net.bob.service.get_data_map().contains_key(&id)
    })
    .await;

    // Bob builds a same-identity payload under his own key and tries
    // to tombstone Alice's offer with it.
    let forged = offer(&net.bob.key_ring, "offer-1", 100);
    assert!(!net.bob.service.remove_data(forged).unwrap());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(net.alice.service.get_data_map().contains_key(&id));
    assert!(net.seed.service.get_data_map().contains_key(&id));

    net.shut_down().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn refresh_propagates_sequence_number() {
    let (_hub, net) = three_nodes().await;

    let payload = offer(&net.alice.key_ring, "offer-1", 100);
    let id = payload.entry_id();
    net.alice
        .service
        .add_protected_storage_entry(payload.clone())
        .unwrap();
    wait_until(Duration::from_secs(5), || {
        net.bob.service.get_data_map().contains_key(&id)
    })
    .await;

    assert!(net.alice.service.refresh_ttl(&payload).unwrap());
    wait_until(Duration::from_secs(5), || {
        net.bob
            .service
            .get_data_map()
            .get(&id)
            .map(|e| e.sequence_number == 2)
            .unwrap_or(false)
    })
    .await;

    net.shut_down().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn trade_statistic_replicates_once() {
    let (_hub, net) = three_nodes().await;

    let stat = PersistablePayload::new_trade_statistic("XMR/EUR".into(), 1_000, 150_00, 42);
    let hash = stat.declared_hash();
    assert!(net.alice.service.add_persistable_payload(stat.clone(), false));

    wait_until(Duration::from_secs(5), || {
        net.bob.service.storage.contains_persistable(&hash)
            && net.seed.service.storage.contains_persistable(&hash)
    })
    .await;

    // Re-adding without re_broadcast is a no-op
    assert!(net.alice.service.add_persistable_payload(stat, false));
    assert_eq!(net.bob.service.storage.persistable_snapshot().len(), 1);

    net.shut_down().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn late_joiner_catches_up_via_data_request() {
    let hub = MemoryHub::new();
    let seed = start_seed(&hub, "seed").await;
    let alice = start_node(&hub, "alice", &[seed.address.clone()], Capabilities::own()).await;

    let payload = offer(&alice.key_ring, "offer-1", 100);
    let id = payload.entry_id();
    alice.service.add_protected_storage_entry(payload).unwrap();
    wait_until(Duration::from_secs(5), || {
        seed.service.get_data_map().contains_key(&id)
    })
    .await;

    // Carol joins after the fact and syncs from the seed
    let carol = start_node(&hub, "carol", &[seed.address.clone()], Capabilities::own()).await;
    wait_until(Duration::from_secs(5), || {
        carol.service.get_data_map().contains_key(&id)
    })
    .await;

    carol.service.shut_down().await;
    alice.service.shut_down().await;
    seed.service.shut_down().await;
}
