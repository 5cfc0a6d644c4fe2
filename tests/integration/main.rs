//! Rialto integration test harness.
//!
//! Tests run whole [`P2pService`] nodes against the in-process hub
//! transport — no real network needed. Each test builds its own hub,
//! so tests cannot interfere with each other.
//!
//! The shared node-builder and wait helpers live here; scenario tests
//! live in the submodules.
//!
//! [`P2pService`]: rialto_p2p::P2pService

use std::sync::Arc;
use std::time::Duration;

use rialto_core::config::P2pConfig;
use rialto_core::{Capabilities, KeyRing, NodeAddress, ProtectedPayload};
use rialto_p2p::transport::memory::{MemoryHub, MemoryTransport};
use rialto_p2p::{NoopMailbox, P2pService};

mod bootstrap;
mod direct;
mod gating;
mod replication;

pub fn addr(name: &str) -> NodeAddress {
    NodeAddress::new(format!("{name}.onion"), 9999)
}

/// A running node plus the key ring it signs with.
pub struct TestNode {
    pub service: Arc<P2pService>,
    pub key_ring: Arc<KeyRing>,
    pub address: NodeAddress,
}

/// Install the test log subscriber once. Run with RUST_LOG=debug to
/// watch a failing scenario.
fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Build (but do not start) a node on `hub` advertising `capabilities`.
/// `seeds` is the list of seed addresses in its config; a seed node
/// itself uses an empty list and bootstraps alone.
pub fn build_node(
    hub: &Arc<MemoryHub>,
    name: &str,
    seeds: &[NodeAddress],
    capabilities: Capabilities,
) -> TestNode {
    init_tracing();
    let address = addr(name);
    let key_ring = Arc::new(KeyRing::generate());

    let mut config = P2pConfig::default();
    config.network.seed_nodes = seeds.iter().map(|a| a.to_string()).collect();
    config.network.request_retry_delay_secs = 1;
    config.network.send_timeout_secs = 5;
    config.network.shutdown_drain_ms = 500;

    let (transport, events) = MemoryTransport::new(hub.clone(), address.clone(), capabilities);
    let service = P2pService::new(
        transport,
        events,
        key_ring.clone(),
        config,
        Arc::new(NoopMailbox),
    );
    TestNode {
        service,
        key_ring,
        address,
    }
}

/// Build and start a node, waiting until it is bootstrapped.
pub async fn start_node(
    hub: &Arc<MemoryHub>,
    name: &str,
    seeds: &[NodeAddress],
    capabilities: Capabilities,
) -> TestNode {
    let node = build_node(hub, name, seeds, capabilities);
    node.service.start().await.expect("node start");
    wait_until(Duration::from_secs(10), || node.service.is_bootstrapped()).await;
    node
}

/// Start a seed node: no seeds of its own, bootstraps alone.
pub async fn start_seed(hub: &Arc<MemoryHub>, name: &str) -> TestNode {
    start_node(hub, name, &[], Capabilities::own()).await
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not met within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

pub fn offer(key_ring: &KeyRing, offer_id: &str, amount_minor: u64) -> ProtectedPayload {
    ProtectedPayload::OfferAnnouncement {
        offer_id: offer_id.to_string(),
        owner_pub_key_ring: key_ring.pub_key_ring().clone(),
        market: "XMR/EUR".to_string(),
        is_buy_offer: true,
        amount_minor,
        price_minor: 150_00,
    }
}
