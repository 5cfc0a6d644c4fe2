//! Peer book — connected peers, their capabilities, and candidate
//! addresses learned through peer exchange.
//!
//! Capability knowledge is grow-only: once a peer has advertised a
//! capability we never forget it, even across reconnects, so gating
//! decisions only ever become more permissive for that peer.

use std::sync::Arc;

use dashmap::{DashMap, DashSet};

use rialto_core::{Capabilities, Capability, NodeAddress};

/// Cap on the reported-peer book. Oldest entries are evicted beyond it.
const MAX_REPORTED_PEERS: usize = 1_000;

pub struct PeerManager {
    seed_nodes: Vec<NodeAddress>,
    /// Addresses with a live connection right now.
    connected: DashSet<NodeAddress>,
    /// What each peer has ever advertised. Survives disconnects, so a
    /// reconnecting peer resumes with what we already learned.
    capabilities: DashMap<NodeAddress, Capabilities>,
    /// Addresses learned via peer exchange, with last-seen timestamps.
    reported: DashMap<NodeAddress, u64>,
}

impl PeerManager {
    pub fn new(seed_nodes: Vec<NodeAddress>) -> Arc<Self> {
        Arc::new(Self {
            seed_nodes,
            connected: DashSet::new(),
            capabilities: DashMap::new(),
            reported: DashMap::new(),
        })
    }

    pub fn seed_nodes(&self) -> &[NodeAddress] {
        &self.seed_nodes
    }

    pub fn is_seed_node(&self, addr: &NodeAddress) -> bool {
        self.seed_nodes.contains(addr)
    }

    // ── Connections ───────────────────────────────────────────────────────────

    pub fn on_connected(&self, addr: NodeAddress, capabilities: Capabilities) {
        tracing::debug!(peer = %addr, "peer connected");
        self.record_capabilities(&addr, &capabilities);
        self.connected.insert(addr);
    }

    pub fn on_disconnected(&self, addr: &NodeAddress) {
        // The capability record stays behind for the next connection.
        if self.connected.remove(addr).is_some() {
            tracing::debug!(peer = %addr, "peer disconnected");
        }
    }

    /// Merge freshly advertised capabilities into the peer's record.
    /// The set only ever grows.
    pub fn record_capabilities(&self, addr: &NodeAddress, capabilities: &Capabilities) {
        self.capabilities
            .entry(addr.clone())
            .and_modify(|known| known.add_all(capabilities))
            .or_insert_with(|| capabilities.clone());
    }

    pub fn is_connected(&self, addr: &NodeAddress) -> bool {
        self.connected.contains(addr)
    }

    pub fn num_connections(&self) -> usize {
        self.connected.len()
    }

    /// Snapshot of live connections with their known capability sets.
    pub fn connected_with_capabilities(&self) -> Vec<(NodeAddress, Capabilities)> {
        self.connected
            .iter()
            .map(|a| {
                let caps = self
                    .capabilities
                    .get(a.key())
                    .map(|c| c.clone())
                    .unwrap_or_default();
                (a.key().clone(), caps)
            })
            .collect()
    }

    pub fn peer_supports(&self, addr: &NodeAddress, capability: Capability) -> bool {
        self.capabilities
            .get(addr)
            .map(|caps| caps.has(capability))
            .unwrap_or(false)
    }

    // ── Reported peers ────────────────────────────────────────────────────────

    /// Record addresses learned from a peer's exchange response.
    pub fn add_reported(&self, addrs: impl IntoIterator<Item = NodeAddress>, now_ms: u64) {
        for addr in addrs {
            self.reported.insert(addr, now_ms);
        }
        if self.reported.len() > MAX_REPORTED_PEERS {
            self.evict_oldest_reported();
        }
    }

    fn evict_oldest_reported(&self) {
        let mut entries: Vec<(NodeAddress, u64)> = self
            .reported
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        entries.sort_by_key(|(_, seen)| *seen);
        let excess = entries.len().saturating_sub(MAX_REPORTED_PEERS);
        for (addr, _) in entries.into_iter().take(excess) {
            self.reported.remove(&addr);
        }
    }

    /// Reported peers to hand out in a [`PeersResponse`], excluding the
    /// requester itself.
    ///
    /// [`PeersResponse`]: rialto_core::NetworkEnvelope::PeersResponse
    pub fn reported_peers(&self, exclude: &NodeAddress) -> Vec<NodeAddress> {
        self.reported
            .iter()
            .map(|e| e.key().clone())
            .filter(|a| a != exclude)
            .collect()
    }

    /// Connection candidates for the initial peer round: reported peers
    /// first, seeds as fallback, never addresses we already hold a
    /// connection to.
    pub fn candidates_for_connection(&self) -> Vec<NodeAddress> {
        let mut candidates: Vec<NodeAddress> = self
            .reported
            .iter()
            .map(|e| e.key().clone())
            .filter(|a| !self.connected.contains(a))
            .collect();
        if candidates.is_empty() {
            candidates = self
                .seed_nodes
                .iter()
                .filter(|a| !self.connected.contains(*a))
                .cloned()
                .collect();
        }
        candidates
    }
}
