//! Bootstrap sequencing: gate ordering, the at-most-once transition,
//! and the degraded no-seed path.

use crate::*;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use futures::future::BoxFuture;
use rialto_core::{NetworkEnvelope, P2pError};
use rialto_p2p::transport::memory::MemoryTransport;
use rialto_p2p::transport::{Transport, TransportError};
use rialto_p2p::{MailboxHandler, P2pServiceListener};

/// Records the order of bootstrap hooks as they fire.
#[derive(Default)]
struct OrderRecorder {
    events: Mutex<Vec<&'static str>>,
}

impl OrderRecorder {
    fn push(&self, event: &'static str) {
        self.events.lock().unwrap().push(event);
    }
    fn snapshot(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().clone()
    }
}

struct RecordingMailbox(Arc<OrderRecorder>);

impl MailboxHandler for RecordingMailbox {
    fn on_bootstrapped(&self) {
        self.0.push("mailbox");
    }
    fn init_after_bootstrapped(&self) {
        self.0.push("mailbox-init");
    }
}

struct RecordingListener(Arc<OrderRecorder>);

impl P2pServiceListener for RecordingListener {
    fn on_data_received(&self) {
        self.0.push("listener-data");
    }
    fn on_no_seed_node_available(&self) {
        self.0.push("listener-no-seed");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn node_bootstraps_against_a_seed() {
    let hub = MemoryHub::new();
    let seed = start_seed(&hub, "seed").await;
    let node = start_node(&hub, "alice", &[seed.address.clone()], Capabilities::own()).await;

    assert!(node.service.is_bootstrapped());
    assert_eq!(node.service.my_address(), Some(addr("alice")));

    node.service.shut_down().await;
    seed.service.shut_down().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn bootstrap_hook_order_is_mailbox_then_listeners_then_init() {
    let hub = MemoryHub::new();
    let seed = start_seed(&hub, "seed").await;

    let recorder = Arc::new(OrderRecorder::default());
    let node = {
        let address = addr("alice");
        let key_ring = Arc::new(KeyRing::generate());
        let mut config = P2pConfig::default();
        config.network.seed_nodes = vec![seed.address.to_string()];
        config.network.request_retry_delay_secs = 1;

        let (transport, events) =
            MemoryTransport::new(hub.clone(), address.clone(), Capabilities::own());
        let service = P2pService::new(
            transport,
            events,
            key_ring.clone(),
            config,
            Arc::new(RecordingMailbox(recorder.clone())),
        );
        service.add_listener(Arc::new(RecordingListener(recorder.clone())));
        TestNode {
            service,
            key_ring,
            address,
        }
    };
    node.service.start().await.unwrap();
    wait_until(Duration::from_secs(10), || node.service.is_bootstrapped()).await;

    // Storage is told before the mailbox; the recorder sees the rest.
    assert!(node.service.storage.is_bootstrapped());
    assert_eq!(
        recorder.snapshot(),
        vec!["mailbox", "listener-data", "mailbox-init"]
    );

    node.service.shut_down().await;
    seed.service.shut_down().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn bootstrap_fires_at_most_once() {
    struct CountingListener(Arc<AtomicUsize>);
    impl P2pServiceListener for CountingListener {
        fn on_data_received(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
        fn on_no_seed_node_available(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    let hub = MemoryHub::new();
    let seed = start_seed(&hub, "seed").await;

    let count = Arc::new(AtomicUsize::new(0));
    let node = build_node(&hub, "alice", &[seed.address.clone()], Capabilities::own());
    node.service
        .add_listener(Arc::new(CountingListener(count.clone())));
    node.service.start().await.unwrap();
    wait_until(Duration::from_secs(10), || node.service.is_bootstrapped()).await;

    // Give any erroneous second transition time to happen
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);

    node.service.shut_down().await;
    seed.service.shut_down().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn node_without_seeds_bootstraps_alone() {
    struct NoSeedListener(Arc<AtomicUsize>);
    impl P2pServiceListener for NoSeedListener {
        fn on_no_seed_node_available(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    let hub = MemoryHub::new();
    let fired = Arc::new(AtomicUsize::new(0));
    let node = build_node(&hub, "lonely", &[], Capabilities::own());
    node.service
        .add_listener(Arc::new(NoSeedListener(fired.clone())));
    node.service.start().await.unwrap();

    wait_until(Duration::from_secs(10), || node.service.is_bootstrapped()).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    node.service.shut_down().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn mutations_before_bootstrap_are_rejected() {
    let hub = MemoryHub::new();
    let node = build_node(&hub, "early", &[addr("nonexistent-seed")], Capabilities::own());

    // Not even started — definitely not bootstrapped
    let result = node.service.add_protected_storage_entry(offer(&node.key_ring, "offer-1", 100));
    assert!(matches!(result, Err(P2pError::NetworkNotReady)));

    let result = node.service.remove_data(offer(&node.key_ring, "offer-1", 100));
    assert!(matches!(result, Err(P2pError::NetworkNotReady)));

    let result = node.service.refresh_ttl(&offer(&node.key_ring, "offer-1", 100));
    assert!(matches!(result, Err(P2pError::NetworkNotReady)));
}

#[tokio::test(flavor = "multi_thread")]
async fn persistable_add_works_before_bootstrap() {
    // Deliberately not bootstrap-gated: local statistics may be
    // published during startup.
    let hub = MemoryHub::new();
    let node = build_node(&hub, "early", &[], Capabilities::own());
    node.service.start().await.unwrap();

    let stat =
        rialto_core::PersistablePayload::new_trade_statistic("XMR/EUR".into(), 100, 150_00, 1);
    assert!(node.service.add_persistable_payload(stat, false));

    node.service.shut_down().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_is_idempotent() {
    let hub = MemoryHub::new();
    let node = start_seed(&hub, "seed").await;
    node.service.shut_down().await;
    node.service.shut_down().await;
}

/// Delivers the first data request and silently swallows every later
/// one; models a seed that dies right after serving the initial sync.
struct FlakySeedLink {
    inner: Arc<MemoryTransport>,
    data_requests: AtomicUsize,
}

impl Transport for FlakySeedLink {
    fn start(&self) -> BoxFuture<'_, Result<(), TransportError>> {
        self.inner.start()
    }

    fn send_message(
        &self,
        to: NodeAddress,
        envelope: NetworkEnvelope,
        timeout: Duration,
    ) -> BoxFuture<'static, Result<(), TransportError>> {
        let is_data_request = matches!(
            envelope,
            NetworkEnvelope::PreliminaryDataRequest { .. }
                | NetworkEnvelope::UpdatedDataRequest { .. }
        );
        if is_data_request && self.data_requests.fetch_add(1, Ordering::SeqCst) > 0 {
            return Box::pin(async { Ok(()) });
        }
        self.inner.send_message(to, envelope, timeout)
    }

    fn connections(&self) -> Vec<NodeAddress> {
        self.inner.connections()
    }

    fn my_address(&self) -> Option<NodeAddress> {
        self.inner.my_address()
    }

    fn shut_down(&self) -> BoxFuture<'_, ()> {
        self.inner.shut_down()
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn bootstrap_completes_on_preliminary_data_alone() {
    let hub = MemoryHub::new();
    let seed = start_seed(&hub, "seed").await;
    let payload = offer(&seed.key_ring, "offer-1", 100);
    assert!(seed.service.add_protected_storage_entry(payload.clone()).unwrap());

    let key_ring = Arc::new(KeyRing::generate());
    let mut config = P2pConfig::default();
    config.network.seed_nodes = vec![seed.address.to_string()];
    config.network.request_retry_delay_secs = 1;

    let (inner, events) = MemoryTransport::new(hub.clone(), addr("alice"), Capabilities::own());
    let transport = Arc::new(FlakySeedLink {
        inner,
        data_requests: AtomicUsize::new(0),
    });
    let service = P2pService::new(
        transport,
        events,
        key_ring.clone(),
        config,
        Arc::new(NoopMailbox),
    );
    service.start().await.unwrap();

    // The preliminary response alone must finish the bootstrap; the
    // follow-up incremental request never reaches the seed.
    wait_until(Duration::from_secs(10), || service.is_bootstrapped()).await;
    assert!(service.get_data_map().contains_key(&payload.entry_id()));
    assert!(service
        .add_protected_storage_entry(offer(&key_ring, "offer-2", 50))
        .unwrap());

    service.shut_down().await;
    seed.service.shut_down().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn starting_node_receives_seed_data() {
    let hub = MemoryHub::new();
    let seed = start_seed(&hub, "seed").await;

    // Seed publishes an offer before anyone else exists
    let payload = offer(&seed.key_ring, "offer-1", 100);
    assert!(seed.service.add_protected_storage_entry(payload.clone()).unwrap());

    let node = start_node(&hub, "alice", &[seed.address.clone()], Capabilities::own()).await;
    wait_until(Duration::from_secs(5), || {
        node.service.get_data_map().contains_key(&payload.entry_id())
    })
    .await;

    node.service.shut_down().await;
    seed.service.shut_down().await;
}
