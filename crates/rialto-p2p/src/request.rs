//! Initial and incremental data sync against seed nodes.
//!
//! On startup the node sends a preliminary data request to seed nodes
//! in shuffled order until one answers; the response seeds the storage
//! engine, completes the bootstrap, and unlocks the data half of the
//! network-ready gate. Once the network is ready, a best-effort
//! second (updated) request against the same seed closes any gap that
//! opened in the meantime.
//!
//! Requests carry the keys we already hold, so responders send only
//! the difference.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use dashmap::DashMap;
use rand::seq::SliceRandom;
use rand::Rng;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use rialto_core::{Capabilities, NetworkEnvelope, NodeAddress};

use crate::peers::PeerManager;
use crate::storage::{now_ms, P2pDataStorage};
use crate::transport::Transport;

/// Sync milestones the orchestrator reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestDataEvent {
    /// First successful data response from a seed node.
    PreliminaryDataReceived,
    /// The post-ready incremental response arrived.
    UpdatedDataReceived,
    /// A full pass over all seeds failed. Retries continue; fired once.
    NoSeedNodeAvailable,
}

struct PendingRequest {
    seed: NodeAddress,
    preliminary: bool,
}

pub struct RequestDataManager {
    me: Weak<RequestDataManager>,
    transport: Arc<dyn Transport>,
    storage: Arc<P2pDataStorage>,
    peers: Arc<PeerManager>,
    events: mpsc::Sender<RequestDataEvent>,
    retry_delay: Duration,
    send_timeout: Duration,
    /// Outstanding requests by nonce.
    pending: DashMap<u64, PendingRequest>,
    /// Signalled whenever any pending request is answered.
    answered: Arc<Notify>,
    got_preliminary: AtomicBool,
    no_seed_fired: AtomicBool,
    /// The seed that served the preliminary response; the updated
    /// request goes to the same one.
    preliminary_seed: Mutex<Option<NodeAddress>>,
    retry_task: Mutex<Option<JoinHandle<()>>>,
}

impl RequestDataManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        storage: Arc<P2pDataStorage>,
        peers: Arc<PeerManager>,
        events: mpsc::Sender<RequestDataEvent>,
        retry_delay: Duration,
        send_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            transport,
            storage,
            peers,
            events,
            retry_delay,
            send_timeout,
            pending: DashMap::new(),
            answered: Arc::new(Notify::new()),
            got_preliminary: AtomicBool::new(false),
            no_seed_fired: AtomicBool::new(false),
            preliminary_seed: Mutex::new(None),
            retry_task: Mutex::new(None),
        })
    }

    // ── Outbound ──────────────────────────────────────────────────────────────

    /// Kick off the preliminary sync loop: try seeds in shuffled order,
    /// fire `NoSeedNodeAvailable` after the first full failed pass,
    /// keep retrying until a response lands or shutdown.
    pub fn request_preliminary_data(&self) {
        let mut guard = self.retry_task.lock().expect("retry lock poisoned");
        if guard.is_some() {
            return;
        }

        let seeds = self.peers.seed_nodes().to_vec();
        if seeds.is_empty() {
            // A node configured without seeds (a seed node itself)
            // bootstraps alone.
            tracing::info!("no seed nodes configured, skipping preliminary sync");
            let events = self.events.clone();
            self.no_seed_fired.store(true, Ordering::SeqCst);
            *guard = Some(tokio::spawn(async move {
                let _ = events.send(RequestDataEvent::NoSeedNodeAvailable).await;
            }));
            return;
        }

        // Always succeeds here: the caller holds a strong reference.
        let Some(this) = self.me.upgrade() else {
            return;
        };
        *guard = Some(tokio::spawn(async move {
            let mut seeds = seeds;
            loop {
                seeds.shuffle(&mut rand::thread_rng());
                for seed in &seeds {
                    if this.got_preliminary.load(Ordering::SeqCst) {
                        return;
                    }
                    this.send_data_request(seed.clone(), true).await;

                    // Wait for an answer or give up on this seed.
                    let waited =
                        tokio::time::timeout(this.retry_delay, this.answered.notified()).await;
                    if this.got_preliminary.load(Ordering::SeqCst) {
                        return;
                    }
                    if waited.is_err() {
                        tracing::debug!(seed = %seed, "data request timed out, trying next seed");
                    }
                }
                if !this.no_seed_fired.swap(true, Ordering::SeqCst) {
                    tracing::warn!("all seed nodes failed to answer the preliminary request");
                    let _ = this.events.send(RequestDataEvent::NoSeedNodeAvailable).await;
                }
                tokio::time::sleep(this.retry_delay).await;
            }
        }));
    }

    /// Send the post-ready incremental request to `seed`.
    pub async fn request_update_data(&self, seed: NodeAddress) {
        self.send_data_request(seed, false).await;
    }

    async fn send_data_request(&self, seed: NodeAddress, preliminary: bool) {
        let nonce = rand::thread_rng().gen();
        let excluded_ids = self.storage.protected_ids();
        let excluded_hashes = self.storage.persistable_hashes();
        let envelope = if preliminary {
            NetworkEnvelope::PreliminaryDataRequest {
                nonce,
                excluded_ids,
                excluded_hashes,
                capabilities: Capabilities::own(),
            }
        } else {
            NetworkEnvelope::UpdatedDataRequest {
                nonce,
                excluded_ids,
                excluded_hashes,
                capabilities: Capabilities::own(),
            }
        };

        self.pending.insert(
            nonce,
            PendingRequest {
                seed: seed.clone(),
                preliminary,
            },
        );
        tracing::info!(seed = %seed, preliminary, "sending data request");
        if let Err(e) = self
            .transport
            .send_message(seed.clone(), envelope, self.send_timeout)
            .await
        {
            tracing::warn!(seed = %seed, error = %e, "data request send failed");
            self.pending.remove(&nonce);
        }
    }

    // ── Inbound ───────────────────────────────────────────────────────────────

    /// Serve a data request from local storage, omitting what the
    /// requester already holds and what its capabilities cannot parse.
    pub async fn handle_data_request(
        &self,
        from: &NodeAddress,
        nonce: u64,
        excluded_ids: &[rialto_core::EntryId],
        excluded_hashes: &[[u8; 32]],
        capabilities: &Capabilities,
    ) {
        self.peers.record_capabilities(from, capabilities);

        let entries: Vec<_> = self
            .storage
            .map_snapshot()
            .into_iter()
            .filter(|(id, _)| !excluded_ids.contains(id))
            .filter_map(|(id, entry)| match entry.payload.required_capability() {
                Some(cap) if !capabilities.has(cap) => {
                    tracing::warn!(
                        peer = %from,
                        id = %id,
                        capability = ?cap,
                        "omitting entry the requester cannot parse"
                    );
                    None
                }
                _ => Some(entry),
            })
            .collect();

        let persistable: Vec<_> = self
            .storage
            .persistable_snapshot()
            .into_iter()
            .filter(|p| !excluded_hashes.contains(&p.declared_hash()))
            .filter(|p| match p.required_capability() {
                Some(cap) => capabilities.has(cap),
                None => true,
            })
            .collect();

        tracing::info!(
            peer = %from,
            entries = entries.len(),
            persistable = persistable.len(),
            "serving data request"
        );
        let response = NetworkEnvelope::DataResponse {
            request_nonce: nonce,
            entries,
            persistable,
            capabilities: Capabilities::own(),
        };
        if let Err(e) = self
            .transport
            .send_message(from.clone(), response, self.send_timeout)
            .await
        {
            tracing::warn!(peer = %from, error = %e, "data response send failed");
        }
    }

    /// Ingest a data response. Entries still pass full validation; a
    /// hostile seed gains nothing by responding.
    pub async fn handle_data_response(
        &self,
        from: &NodeAddress,
        request_nonce: u64,
        entries: Vec<rialto_core::ProtectedEntry>,
        persistable: Vec<rialto_core::PersistablePayload>,
        capabilities: &Capabilities,
    ) {
        self.peers.record_capabilities(from, capabilities);

        let now = now_ms();
        let entry_count = entries.len();
        self.storage.try_add_batch(entries, now);
        self.storage.try_add_persistable_batch(persistable);
        tracing::info!(seed = %from, entries = entry_count, "data response ingested");

        let Some((_, pending)) = self.pending.remove(&request_nonce) else {
            tracing::debug!(peer = %from, nonce = request_nonce, "unsolicited data response");
            return;
        };
        if &pending.seed != from {
            tracing::warn!(peer = %from, "data response from unexpected address");
        }

        if pending.preliminary {
            if !self.got_preliminary.swap(true, Ordering::SeqCst) {
                *self.preliminary_seed.lock().expect("seed lock poisoned") =
                    Some(pending.seed);
                let _ = self
                    .events
                    .send(RequestDataEvent::PreliminaryDataReceived)
                    .await;
            }
        } else {
            let _ = self.events.send(RequestDataEvent::UpdatedDataReceived).await;
        }
        self.answered.notify_waiters();
    }

    /// The seed that answered the preliminary request, if any yet.
    pub fn preliminary_seed(&self) -> Option<NodeAddress> {
        self.preliminary_seed
            .lock()
            .expect("seed lock poisoned")
            .clone()
    }

    pub fn shut_down(&self) {
        if let Some(handle) = self.retry_task.lock().expect("retry lock poisoned").take() {
            handle.abort();
        }
    }
}
