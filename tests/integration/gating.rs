//! Capability gating: gated payloads skip peers that never advertised
//! the matching capability, ungated traffic is unaffected.

use crate::*;

use rialto_core::{Capability, PersistablePayload, ProtectedPayload};

#[tokio::test(flavor = "multi_thread")]
async fn gated_broadcast_skips_incapable_peer() {
    let hub = MemoryHub::new();
    let seed = start_seed(&hub, "seed").await;
    let seeds = [seed.address.clone()];
    let alice = start_node(&hub, "alice", &seeds, Capabilities::own()).await;
    // Bob advertises nothing — an old node
    let bob = start_node(&hub, "bob", &seeds, Capabilities::new()).await;

    let stat = PersistablePayload::new_trade_statistic("XMR/EUR".into(), 1_000, 150_00, 7);
    let hash = stat.declared_hash();
    assert!(alice.service.add_persistable_payload(stat, false));

    wait_until(Duration::from_secs(5), || {
        seed.service.storage.contains_persistable(&hash)
    })
    .await;
    // Bob connected to alice never gets it by broadcast
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!bob.service.storage.contains_persistable(&hash));

    bob.service.shut_down().await;
    alice.service.shut_down().await;
    seed.service.shut_down().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn data_responses_omit_unparseable_entries() {
    let hub = MemoryHub::new();
    let seed = start_seed(&hub, "seed").await;

    // Seed holds an alert (gated) and an offer (ungated)
    let alert = ProtectedPayload::MarketAlert {
        owner_pub_key_ring: seed.key_ring.pub_key_ring().clone(),
        message: "upgrade required".into(),
        requires_update: true,
    };
    let alert_id = alert.entry_id();
    let offer_payload = offer(&seed.key_ring, "offer-1", 100);
    let offer_id = offer_payload.entry_id();
    seed.service.add_protected_storage_entry(alert).unwrap();
    seed.service
        .add_protected_storage_entry(offer_payload)
        .unwrap();

    // A node without the MarketAlert capability syncs
    let legacy = start_node(
        &hub,
        "legacy",
        &[seed.address.clone()],
        Capabilities::from_iter([Capability::TradeStatistics]),
    )
    .await;
    wait_until(Duration::from_secs(5), || {
        legacy.service.get_data_map().contains_key(&offer_id)
    })
    .await;
    assert!(!legacy.service.get_data_map().contains_key(&alert_id));

    // A fully capable node gets both
    let modern = start_node(&hub, "modern", &[seed.address.clone()], Capabilities::own()).await;
    wait_until(Duration::from_secs(5), || {
        let map = modern.service.get_data_map();
        map.contains_key(&offer_id) && map.contains_key(&alert_id)
    })
    .await;

    modern.service.shut_down().await;
    legacy.service.shut_down().await;
    seed.service.shut_down().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn ungated_traffic_reaches_legacy_peers() {
    let hub = MemoryHub::new();
    let seed = start_seed(&hub, "seed").await;
    let seeds = [seed.address.clone()];
    let alice = start_node(&hub, "alice", &seeds, Capabilities::own()).await;
    let legacy = start_node(&hub, "legacy", &seeds, Capabilities::new()).await;

    let payload = offer(&alice.key_ring, "offer-1", 100);
    let id = payload.entry_id();
    alice.service.add_protected_storage_entry(payload).unwrap();

    wait_until(Duration::from_secs(5), || {
        legacy.service.get_data_map().contains_key(&id)
    })
    .await;

    legacy.service.shut_down().await;
    alice.service.shut_down().await;
    seed.service.shut_down().await;
}
