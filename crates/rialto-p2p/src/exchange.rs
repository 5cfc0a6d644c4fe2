//! Peer exchange and keep-alive.
//!
//! After bootstrap the node asks seed nodes for their reported-peer
//! lists, then opens connections toward reported or seed peers. A
//! periodic ping keeps connections warm and measures round-trip time.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rand::Rng;
use tokio::task::JoinHandle;

use rialto_core::{Capabilities, NetworkEnvelope, NodeAddress};

use crate::peers::PeerManager;
use crate::storage::now_ms;
use crate::transport::Transport;

/// How many fresh connections the initial round tries to open.
const INITIAL_CONNECT_TARGET: usize = 8;

pub struct PeerExchangeManager {
    me: Weak<PeerExchangeManager>,
    transport: Arc<dyn Transport>,
    peers: Arc<PeerManager>,
    send_timeout: Duration,
    /// Outstanding pings by nonce, for RTT measurement.
    pending_pings: DashMap<u64, Instant>,
    keep_alive_task: Mutex<Option<JoinHandle<()>>>,
    /// Consecutive keep-alive rounds, for log context.
    rounds: AtomicUsize,
}

impl PeerExchangeManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        peers: Arc<PeerManager>,
        send_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            transport,
            peers,
            send_timeout,
            pending_pings: DashMap::new(),
            keep_alive_task: Mutex::new(None),
            rounds: AtomicUsize::new(0),
        })
    }

    // ── Outbound ──────────────────────────────────────────────────────────────

    /// Ask one seed node for its reported peers.
    pub async fn request_reported_peers(&self, seed: &NodeAddress) {
        let nonce = rand::thread_rng().gen();
        let request = NetworkEnvelope::PeersRequest {
            nonce,
            capabilities: Capabilities::own(),
        };
        tracing::debug!(seed = %seed, "requesting reported peers");
        if let Err(e) = self
            .transport
            .send_message(seed.clone(), request, self.send_timeout)
            .await
        {
            tracing::warn!(seed = %seed, error = %e, "peers request failed");
        }
    }

    /// Open connections toward reported or seed peers by sending each a
    /// peers request. Returns how many candidates were contacted;
    /// zero means the node knows nobody to talk to.
    pub async fn initial_request(&self) -> usize {
        let candidates = self.peers.candidates_for_connection();
        let mut contacted = 0;
        for candidate in candidates.into_iter().take(INITIAL_CONNECT_TARGET) {
            let nonce = rand::thread_rng().gen();
            let request = NetworkEnvelope::PeersRequest {
                nonce,
                capabilities: Capabilities::own(),
            };
            match self
                .transport
                .send_message(candidate.clone(), request, self.send_timeout)
                .await
            {
                Ok(()) => contacted += 1,
                Err(e) => {
                    tracing::debug!(peer = %candidate, error = %e, "initial peer contact failed")
                }
            }
        }
        tracing::info!(contacted, "initial peer round complete");
        contacted
    }

    // ── Inbound ───────────────────────────────────────────────────────────────

    pub async fn handle_peers_request(
        &self,
        from: &NodeAddress,
        nonce: u64,
        capabilities: &Capabilities,
    ) {
        self.peers.record_capabilities(from, capabilities);
        // A peer that asks us is itself a live address worth reporting.
        self.peers.add_reported([from.clone()], now_ms());

        let response = NetworkEnvelope::PeersResponse {
            request_nonce: nonce,
            reported: self.peers.reported_peers(from),
        };
        if let Err(e) = self
            .transport
            .send_message(from.clone(), response, self.send_timeout)
            .await
        {
            tracing::debug!(peer = %from, error = %e, "peers response failed");
        }
    }

    pub fn handle_peers_response(&self, from: &NodeAddress, reported: Vec<NodeAddress>) {
        tracing::debug!(peer = %from, count = reported.len(), "reported peers received");
        let own = self.transport.my_address();
        self.peers.add_reported(
            reported.into_iter().filter(|a| Some(a) != own.as_ref()),
            now_ms(),
        );
    }

    pub async fn handle_ping(&self, from: &NodeAddress, nonce: u64) {
        let pong = NetworkEnvelope::Pong {
            request_nonce: nonce,
        };
        if let Err(e) = self
            .transport
            .send_message(from.clone(), pong, self.send_timeout)
            .await
        {
            tracing::debug!(peer = %from, error = %e, "pong failed");
        }
    }

    pub fn handle_pong(&self, from: &NodeAddress, request_nonce: u64) {
        if let Some((_, sent)) = self.pending_pings.remove(&request_nonce) {
            tracing::debug!(peer = %from, rtt_ms = sent.elapsed().as_millis() as u64, "pong");
        }
    }

    // ── Keep-alive ────────────────────────────────────────────────────────────

    /// Start the periodic keep-alive loop. Idempotent.
    pub fn start_keep_alive(&self, interval: Duration) {
        let mut guard = self.keep_alive_task.lock().expect("keep-alive lock poisoned");
        if guard.is_some() {
            return;
        }
        // Always succeeds here: the caller holds a strong reference.
        let Some(this) = self.me.upgrade() else {
            return;
        };
        *guard = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                this.ping_round().await;
            }
        }));
    }

    async fn ping_round(&self) {
        let round = self.rounds.fetch_add(1, Ordering::Relaxed);
        // Pings that never came back are dead weight after a round.
        self.pending_pings
            .retain(|_, sent| sent.elapsed() < Duration::from_secs(120));

        let connected = self.peers.connected_with_capabilities();
        tracing::debug!(round, peers = connected.len(), "keep-alive round");
        for (addr, _) in connected {
            let nonce = rand::thread_rng().gen();
            self.pending_pings.insert(nonce, Instant::now());
            if let Err(e) = self
                .transport
                .send_message(addr.clone(), NetworkEnvelope::Ping { nonce }, self.send_timeout)
                .await
            {
                tracing::debug!(peer = %addr, error = %e, "keep-alive ping failed");
                self.pending_pings.remove(&nonce);
            }
        }
    }

    pub fn shut_down(&self) {
        if let Some(handle) = self
            .keep_alive_task
            .lock()
            .expect("keep-alive lock poisoned")
            .take()
        {
            handle.abort();
        }
    }
}
