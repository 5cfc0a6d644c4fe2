//! The bootstrap orchestrator and public P2P facade.
//!
//! [`P2pService`] owns the subsystems and sequences startup:
//!
//!   1. transport start → preliminary data request + keep-alive
//!   2. first of {preliminary data received, no seed available} →
//!      bootstrapped, exactly once, in fixed order:
//!      storage → mailbox → lifecycle listeners → mailbox init
//!   3. endpoint published AND preliminary data received → network ready
//!   4. on network ready: updated data request, then (after short
//!      settling delays) peer exchange against the answering seed and
//!      the initial connection round
//!
//! Bootstrap rides on the preliminary sync alone. The updated request
//! is best effort; a seed that dies after serving the initial sync
//! must not leave the node stuck half-started.
//!
//! Mutating API calls before bootstrap fail with
//! [`P2pError::NetworkNotReady`] — a caller-side sequencing bug that is
//! reported, never silently queued.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex as TokioMutex};
use tokio::task::JoinHandle;

use rialto_core::config::P2pConfig;
use rialto_core::crypto::{self, PubKeyRing};
use rialto_core::{
    DirectMessage, KeyRing, NetworkEnvelope, NodeAddress, P2pError, ProtectedEntry,
    ProtectedPayload, RefreshTtlMessage,
};

use crate::broadcast::Broadcaster;
use crate::exchange::PeerExchangeManager;
use crate::mailbox::MailboxHandler;
use crate::peers::PeerManager;
use crate::request::{RequestDataEvent, RequestDataManager};
use crate::storage::{now_ms, P2pDataStorage, PersistableAddResult};
use crate::transport::{Transport, TransportEvent};

/// Settling delay between the updated-data request and the reported-
/// peers request toward the seed.
const PEER_EXCHANGE_DELAY: Duration = Duration::from_millis(100);
/// Settling delay before the initial connection round.
const INITIAL_CONNECT_DELAY: Duration = Duration::from_millis(300);

// ── Listener traits ───────────────────────────────────────────────────────────

/// Lifecycle callbacks, all optional. Invoked from the orchestrator's
/// event loop; keep implementations quick.
pub trait P2pServiceListener: Send + Sync {
    fn on_transport_ready(&self) {}
    fn on_endpoint_published(&self) {}
    fn on_setup_failed(&self, _reason: &str) {}
    /// Bootstrap completed via a successful data sync.
    fn on_data_received(&self) {}
    fn on_updated_data_received(&self) {}
    /// Bootstrap completed without any seed answering.
    fn on_no_seed_node_available(&self) {}
    /// The initial peer round found nobody to contact.
    fn on_no_peers_available(&self) {}
}

/// A decrypted direct message with provenance.
pub struct DecryptedMessage {
    pub message: DirectMessage,
    pub sender_address: NodeAddress,
    pub sender_pub_key_ring: PubKeyRing,
}

pub trait DirectMessageListener: Send + Sync {
    fn on_direct_message(&self, message: &DecryptedMessage);
}

/// Outcome of a direct send, delivered to the caller's callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendResult {
    /// The transport accepted the message for delivery.
    Arrived,
    Fault(String),
}

/// What completed the bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BootstrapTrigger {
    DataReceived,
    NoSeedNodeAvailable,
}

// ── Service ───────────────────────────────────────────────────────────────────

pub struct P2pService {
    me: Weak<P2pService>,
    transport: Arc<dyn Transport>,
    key_ring: Arc<KeyRing>,
    config: P2pConfig,

    pub storage: Arc<P2pDataStorage>,
    pub peers: Arc<PeerManager>,
    broadcaster: Arc<Broadcaster>,
    request_data: Arc<RequestDataManager>,
    peer_exchange: Arc<PeerExchangeManager>,
    mailbox: Arc<dyn MailboxHandler>,

    endpoint_published: watch::Sender<bool>,
    preliminary_received: watch::Sender<bool>,
    bootstrapped: AtomicBool,
    network_ready_fired: AtomicBool,
    shutdown_started: AtomicBool,
    my_address: RwLock<Option<NodeAddress>>,
    num_connected: watch::Sender<usize>,

    listeners: RwLock<Vec<Arc<dyn P2pServiceListener>>>,
    direct_listeners: RwLock<Vec<Arc<dyn DirectMessageListener>>>,

    transport_events: TokioMutex<Option<mpsc::Receiver<TransportEvent>>>,
    request_events: TokioMutex<Option<mpsc::Receiver<RequestDataEvent>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl P2pService {
    /// Wire the subsystems together. Nothing runs until [`start`].
    ///
    /// [`start`]: P2pService::start
    pub fn new(
        transport: Arc<dyn Transport>,
        transport_events: mpsc::Receiver<TransportEvent>,
        key_ring: Arc<KeyRing>,
        config: P2pConfig,
        mailbox: Arc<dyn MailboxHandler>,
    ) -> Arc<Self> {
        let storage = P2pDataStorage::new();
        let peers = PeerManager::new(config.network.seed_addresses());
        let broadcaster = Broadcaster::new(
            Arc::clone(&transport),
            Arc::clone(&peers),
            config.network.broadcast_queue_depth,
            config.network.send_timeout(),
            config.network.shutdown_drain(),
        );
        let (request_tx, request_rx) = mpsc::channel(16);
        let request_data = RequestDataManager::new(
            Arc::clone(&transport),
            Arc::clone(&storage),
            Arc::clone(&peers),
            request_tx,
            config.network.request_retry_delay(),
            config.network.send_timeout(),
        );
        let peer_exchange = PeerExchangeManager::new(
            Arc::clone(&transport),
            Arc::clone(&peers),
            config.network.send_timeout(),
        );

        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            transport,
            key_ring,
            config,
            storage,
            peers,
            broadcaster,
            request_data,
            peer_exchange,
            mailbox,
            endpoint_published: watch::Sender::new(false),
            preliminary_received: watch::Sender::new(false),
            bootstrapped: AtomicBool::new(false),
            network_ready_fired: AtomicBool::new(false),
            shutdown_started: AtomicBool::new(false),
            my_address: RwLock::new(None),
            num_connected: watch::Sender::new(0),
            listeners: RwLock::new(Vec::new()),
            direct_listeners: RwLock::new(Vec::new()),
            transport_events: TokioMutex::new(Some(transport_events)),
            request_events: TokioMutex::new(Some(request_rx)),
            tasks: Mutex::new(Vec::new()),
        })
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Start the transport and the event loops. Returns once the
    /// transport is up; bootstrap continues in the background.
    pub async fn start(&self) -> Result<(), P2pError> {
        let transport_rx = self
            .transport_events
            .lock()
            .await
            .take()
            .ok_or_else(|| P2pError::SendFailed("service already started".into()))?;
        let request_rx = self
            .request_events
            .lock()
            .await
            .take()
            .ok_or_else(|| P2pError::SendFailed("service already started".into()))?;

        self.spawn_network_ready_combiner();
        self.spawn_transport_loop(transport_rx);
        self.spawn_request_loop(request_rx);

        self.transport
            .start()
            .await
            .map_err(|e| P2pError::SendFailed(e.to_string()))?;
        tracing::info!("p2p service started");
        Ok(())
    }

    /// Network-ready gate: endpoint published AND preliminary data
    /// received, whichever order they land in.
    fn spawn_network_ready_combiner(&self) {
        let mut endpoint = self.endpoint_published.subscribe();
        let mut preliminary = self.preliminary_received.subscribe();
        // Upgrades always succeed while the caller holds a strong ref.
        let Some(this) = self.me.upgrade() else {
            return;
        };
        self.push_task(tokio::spawn(async move {
            loop {
                if *endpoint.borrow() && *preliminary.borrow() {
                    this.on_network_ready().await;
                    return;
                }
                tokio::select! {
                    r = endpoint.changed() => if r.is_err() { return },
                    r = preliminary.changed() => if r.is_err() { return },
                }
            }
        }));
    }

    fn spawn_transport_loop(&self, mut rx: mpsc::Receiver<TransportEvent>) {
        let Some(this) = self.me.upgrade() else {
            return;
        };
        self.push_task(tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                this.handle_transport_event(event).await;
            }
        }));
    }

    fn spawn_request_loop(&self, mut rx: mpsc::Receiver<RequestDataEvent>) {
        let Some(this) = self.me.upgrade() else {
            return;
        };
        self.push_task(tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    RequestDataEvent::PreliminaryDataReceived => {
                        tracing::info!("preliminary data received");
                        let _ = this.preliminary_received.send(true);
                        this.apply_bootstrapped(BootstrapTrigger::DataReceived);
                    }
                    RequestDataEvent::UpdatedDataReceived => {
                        this.notify_listeners(|l| l.on_updated_data_received());
                        this.apply_bootstrapped(BootstrapTrigger::DataReceived);
                    }
                    RequestDataEvent::NoSeedNodeAvailable => {
                        // Degraded start: unlock the ready gate so a node
                        // alone on the network still finishes its bootstrap.
                        let _ = this.preliminary_received.send(true);
                        this.apply_bootstrapped(BootstrapTrigger::NoSeedNodeAvailable);
                    }
                }
            }
        }));
    }

    fn push_task(&self, handle: JoinHandle<()>) {
        self.tasks.lock().expect("task lock poisoned").push(handle);
    }

    async fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Ready => {
                tracing::info!("transport ready");
                self.notify_listeners(|l| l.on_transport_ready());
                self.request_data.request_preliminary_data();
                self.peer_exchange
                    .start_keep_alive(self.config.network.keep_alive_interval());
            }
            TransportEvent::EndpointPublished(addr) => {
                tracing::info!(address = %addr, "endpoint published");
                *self.my_address.write().expect("address lock poisoned") = Some(addr);
                let _ = self.endpoint_published.send(true);
                self.notify_listeners(|l| l.on_endpoint_published());
            }
            TransportEvent::SetupFailed(reason) => {
                tracing::error!(reason = %reason, "transport setup failed");
                self.notify_listeners(|l| l.on_setup_failed(&reason));
            }
            TransportEvent::Connected { addr, capabilities } => {
                self.peers.on_connected(addr, capabilities);
                let _ = self.num_connected.send(self.peers.num_connections());
            }
            TransportEvent::Disconnected { addr } => {
                self.peers.on_disconnected(&addr);
                self.broadcaster.drop_peer(&addr);
                let _ = self.num_connected.send(self.peers.num_connections());
            }
            TransportEvent::Message { from, envelope } => {
                self.handle_envelope(from, envelope).await;
            }
        }
    }

    /// Dispatch one inbound envelope. Relays happen only after the node
    /// is bootstrapped, and only for mutations we newly accepted —
    /// rejected or idempotent envelopes never propagate.
    async fn handle_envelope(&self, from: NodeAddress, envelope: NetworkEnvelope) {
        match envelope {
            NetworkEnvelope::AddData { entry } => {
                let result = self.storage.try_add(entry.clone(), now_ms());
                tracing::debug!(peer = %from, id = %entry.entry_id(), result = ?result, "add data");
                if result == crate::storage::AddResult::Accepted && self.is_bootstrapped() {
                    self.broadcaster
                        .broadcast(NetworkEnvelope::AddData { entry }, Some(&from));
                }
            }
            NetworkEnvelope::RemoveData { tombstone } => {
                let result = self.storage.try_remove(&tombstone, now_ms());
                if result == crate::storage::RemoveResult::Removed && self.is_bootstrapped() {
                    self.broadcaster
                        .broadcast(NetworkEnvelope::RemoveData { tombstone }, Some(&from));
                }
            }
            NetworkEnvelope::RefreshTtl { message } => {
                if self.storage.refresh_ttl(&message, now_ms()) && self.is_bootstrapped() {
                    self.broadcaster
                        .broadcast(NetworkEnvelope::RefreshTtl { message }, Some(&from));
                }
            }
            NetworkEnvelope::AddPersistable { payload } => {
                let result = self.storage.try_add_persistable(payload.clone());
                if result == PersistableAddResult::Accepted && self.is_bootstrapped() {
                    self.broadcaster
                        .broadcast(NetworkEnvelope::AddPersistable { payload }, Some(&from));
                }
            }

            NetworkEnvelope::PreliminaryDataRequest {
                nonce,
                excluded_ids,
                excluded_hashes,
                capabilities,
            }
            | NetworkEnvelope::UpdatedDataRequest {
                nonce,
                excluded_ids,
                excluded_hashes,
                capabilities,
            } => {
                self.request_data
                    .handle_data_request(&from, nonce, &excluded_ids, &excluded_hashes, &capabilities)
                    .await;
            }
            NetworkEnvelope::DataResponse {
                request_nonce,
                entries,
                persistable,
                capabilities,
            } => {
                self.request_data
                    .handle_data_response(&from, request_nonce, entries, persistable, &capabilities)
                    .await;
            }

            NetworkEnvelope::PeersRequest {
                nonce,
                capabilities,
            } => {
                self.peer_exchange
                    .handle_peers_request(&from, nonce, &capabilities)
                    .await;
            }
            NetworkEnvelope::PeersResponse {
                request_nonce: _,
                reported,
            } => {
                self.peer_exchange.handle_peers_response(&from, reported);
            }
            NetworkEnvelope::Ping { nonce } => {
                self.peer_exchange.handle_ping(&from, nonce).await;
            }
            NetworkEnvelope::Pong { request_nonce } => {
                self.peer_exchange.handle_pong(&from, request_nonce);
            }

            NetworkEnvelope::SealedMessage {
                sender_address,
                sealed,
            } => {
                self.handle_sealed_message(sender_address, sealed);
            }
        }
    }

    /// Decrypt an inbound sealed message. Failures are logged and the
    /// message dropped — messages for a previous identity are expected
    /// background noise, not errors.
    fn handle_sealed_message(
        &self,
        sender_address: NodeAddress,
        sealed: rialto_core::SealedAndSigned,
    ) {
        let plaintext = match crypto::decrypt_and_verify(&self.key_ring, &sealed) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(sender = %sender_address, error = %e, "dropping sealed message");
                return;
            }
        };
        let message: DirectMessage = match serde_json::from_slice(&plaintext) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(sender = %sender_address, error = %e, "malformed direct message");
                return;
            }
        };

        tracing::debug!(
            sender = %sender_address,
            msg_type = %message.msg_type,
            msg_id = %message.msg_id,
            "direct message received"
        );
        let decrypted = DecryptedMessage {
            message,
            sender_address,
            sender_pub_key_ring: sealed.sender_pub_key_ring,
        };
        let listeners = self
            .direct_listeners
            .read()
            .expect("listener lock poisoned")
            .clone();
        for listener in listeners {
            // A failing listener must not take the event loop down with it.
            if catch_unwind(AssertUnwindSafe(|| listener.on_direct_message(&decrypted))).is_err() {
                tracing::error!(
                    sender = %decrypted.sender_address,
                    "direct message listener panicked"
                );
            }
        }
    }

    /// Both ready conditions hold. Fire the post-ready sequence once.
    async fn on_network_ready(&self) {
        if self.network_ready_fired.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("network ready");

        let Some(seed) = self.request_data.preliminary_seed() else {
            // Degraded path: no seed ever answered. Bootstrap will
            // complete via NoSeedNodeAvailable instead.
            tracing::info!("network ready without a seed node");
            return;
        };

        self.request_data.request_update_data(seed.clone()).await;

        let exchange = Arc::clone(&self.peer_exchange);
        let seed_for_exchange = seed.clone();
        self.push_task(tokio::spawn(async move {
            tokio::time::sleep(PEER_EXCHANGE_DELAY).await;
            exchange.request_reported_peers(&seed_for_exchange).await;
        }));

        let Some(this) = self.me.upgrade() else {
            return;
        };
        self.push_task(tokio::spawn(async move {
            tokio::time::sleep(INITIAL_CONNECT_DELAY).await;
            if this.peer_exchange.initial_request().await == 0 {
                this.notify_listeners(|l| l.on_no_peers_available());
            }
        }));
    }

    /// Flip to bootstrapped, exactly once, in fixed order: storage,
    /// then mailbox, then lifecycle listeners, then mailbox init.
    fn apply_bootstrapped(&self, trigger: BootstrapTrigger) {
        if self.bootstrapped.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(trigger = ?trigger, "bootstrapped");

        self.storage
            .on_bootstrapped(self.config.storage.prune_interval());
        self.mailbox.on_bootstrapped();

        match trigger {
            BootstrapTrigger::DataReceived => self.notify_listeners(|l| l.on_data_received()),
            BootstrapTrigger::NoSeedNodeAvailable => {
                self.notify_listeners(|l| l.on_no_seed_node_available())
            }
        }

        self.mailbox.init_after_bootstrapped();
    }

    /// Stop everything: refuse new broadcasts, drain queues for a
    /// bounded time, then tear the transport down.
    pub async fn shut_down(&self) {
        if self.shutdown_started.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("p2p service shutting down");

        self.broadcaster.shut_down().await;
        self.peer_exchange.shut_down();
        self.request_data.shut_down();
        self.storage.shut_down();
        for handle in self.tasks.lock().expect("task lock poisoned").drain(..) {
            handle.abort();
        }
        self.transport.shut_down().await;
    }

    // ── Public API ────────────────────────────────────────────────────────────

    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrapped.load(Ordering::SeqCst)
    }

    pub fn my_address(&self) -> Option<NodeAddress> {
        self.my_address
            .read()
            .expect("address lock poisoned")
            .clone()
    }

    pub fn num_connected_peers(&self) -> usize {
        self.peers.num_connections()
    }

    /// Watch channel mirroring the connected-peer count.
    pub fn num_connected_watch(&self) -> watch::Receiver<usize> {
        self.num_connected.subscribe()
    }

    fn require_bootstrapped(&self) -> Result<(), P2pError> {
        if self.is_bootstrapped() {
            Ok(())
        } else {
            Err(P2pError::NetworkNotReady)
        }
    }

    /// Sign and publish a protected payload. Returns whether storage
    /// accepted it.
    pub fn add_protected_storage_entry(
        &self,
        payload: ProtectedPayload,
    ) -> Result<bool, P2pError> {
        self.require_bootstrapped()?;

        let seq = self.storage.next_sequence_number(&payload.entry_id());
        let entry = ProtectedEntry::new_signed(&self.key_ring, payload, seq, now_ms())?;
        let result = self.storage.try_add(entry.clone(), now_ms());
        if result == crate::storage::AddResult::Accepted {
            self.broadcaster
                .broadcast(NetworkEnvelope::AddData { entry }, None);
            Ok(true)
        } else {
            tracing::warn!(result = ?result, "local add rejected by own storage");
            Ok(false)
        }
    }

    /// Sign and publish a tombstone for a payload we own.
    pub fn remove_data(&self, payload: ProtectedPayload) -> Result<bool, P2pError> {
        self.require_bootstrapped()?;

        let seq = self.storage.next_sequence_number(&payload.entry_id());
        let tombstone = ProtectedEntry::new_signed(&self.key_ring, payload, seq, now_ms())?;
        let result = self.storage.try_remove(&tombstone, now_ms());
        if result == crate::storage::RemoveResult::Removed {
            self.broadcaster
                .broadcast(NetworkEnvelope::RemoveData { tombstone }, None);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Sign and publish a TTL refresh for an entry we own.
    pub fn refresh_ttl(&self, payload: &ProtectedPayload) -> Result<bool, P2pError> {
        self.require_bootstrapped()?;

        let id = payload.entry_id();
        let seq = self.storage.next_sequence_number(&id);
        let message = RefreshTtlMessage::new_signed(&self.key_ring, id, seq);
        if self.storage.refresh_ttl(&message, now_ms()) {
            self.broadcaster
                .broadcast(NetworkEnvelope::RefreshTtl { message }, None);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Publish an append-only payload. Deliberately not bootstrap-gated:
    /// locally generated statistics may be queued during startup and
    /// `re_broadcast` lets persisted data re-enter the gossip on demand.
    pub fn add_persistable_payload(
        &self,
        payload: rialto_core::PersistablePayload,
        re_broadcast: bool,
    ) -> bool {
        let result = self.storage.try_add_persistable(payload.clone());
        let should_broadcast = match result {
            PersistableAddResult::Accepted => true,
            PersistableAddResult::AcceptedDuplicate => re_broadcast,
            PersistableAddResult::RejectedInvalidHash => false,
        };
        if should_broadcast {
            self.broadcaster
                .broadcast(NetworkEnvelope::AddPersistable { payload }, None);
        }
        result.is_accepted()
    }

    /// Encrypt a direct message for `recipient_keys` and send it to
    /// `recipient`. The callback reports the transport-level outcome.
    ///
    /// If the recipient is connected but never advertised the message
    /// type's required capability, the send is not attempted and the
    /// callback gets a `Fault`.
    pub fn send_encrypted_direct_message(
        &self,
        recipient: NodeAddress,
        recipient_keys: &PubKeyRing,
        message: DirectMessage,
        timeout: Option<Duration>,
        on_result: impl FnOnce(SendResult) + Send + 'static,
    ) -> Result<(), P2pError> {
        self.require_bootstrapped()?;

        if let Some(capability) = message.required_capability() {
            if self.peers.is_connected(&recipient)
                && !self.peers.peer_supports(&recipient, capability)
            {
                tracing::warn!(
                    peer = %recipient,
                    msg_type = %message.msg_type,
                    capability = ?capability,
                    "recipient lacks required capability"
                );
                on_result(SendResult::Fault(format!(
                    "peer does not support {capability:?}"
                )));
                return Ok(());
            }
        }

        let plaintext = serde_json::to_vec(&message)
            .map_err(rialto_core::crypto::CryptoError::Serialize)
            .map_err(P2pError::Crypto)?;
        let sealed = crypto::encrypt_and_sign(&self.key_ring, recipient_keys, &plaintext)?;
        let sender_address = self
            .my_address()
            .ok_or_else(|| P2pError::SendFailed("own address not yet published".into()))?;

        let envelope = NetworkEnvelope::SealedMessage {
            sender_address,
            sealed,
        };
        let timeout = timeout.unwrap_or_else(|| self.config.network.send_timeout());
        let transport = Arc::clone(&self.transport);
        self.push_task(tokio::spawn(async move {
            match transport.send_message(recipient, envelope, timeout).await {
                Ok(()) => on_result(SendResult::Arrived),
                Err(e) => on_result(SendResult::Fault(e.to_string())),
            }
        }));
        Ok(())
    }

    /// Snapshot of the protected-storage map.
    pub fn get_data_map(
        &self,
    ) -> std::collections::HashMap<rialto_core::EntryId, ProtectedEntry> {
        self.storage.map_snapshot()
    }

    // ── Listener registration ─────────────────────────────────────────────────

    pub fn add_listener(&self, listener: Arc<dyn P2pServiceListener>) {
        self.listeners
            .write()
            .expect("listener lock poisoned")
            .push(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn P2pServiceListener>) {
        self.listeners
            .write()
            .expect("listener lock poisoned")
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub fn add_direct_message_listener(&self, listener: Arc<dyn DirectMessageListener>) {
        self.direct_listeners
            .write()
            .expect("listener lock poisoned")
            .push(listener);
    }

    fn snapshot_listeners(&self) -> Vec<Arc<dyn P2pServiceListener>> {
        self.listeners
            .read()
            .expect("listener lock poisoned")
            .clone()
    }

    /// Invoke a lifecycle callback on every listener, isolating panics
    /// so one broken listener cannot starve the rest or kill the
    /// calling event loop.
    fn notify_listeners(&self, f: impl Fn(&dyn P2pServiceListener)) {
        for listener in self.snapshot_listeners() {
            if catch_unwind(AssertUnwindSafe(|| f(listener.as_ref()))).is_err() {
                tracing::error!("lifecycle listener panicked");
            }
        }
    }
}
