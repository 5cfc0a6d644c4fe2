//! Gossip broadcaster — fans accepted mutations out to connected peers.
//!
//! One bounded queue and one worker task per peer, so a slow peer
//! backs up its own queue and nobody else's. When a queue is full, the
//! newly offered envelope is dropped for that peer with a warning;
//! gossip is redundant and the entry will arrive via another path or
//! the next data request.
//!
//! Capability gating happens here, at enqueue time: a peer that never
//! advertised a payload's required capability is skipped, with an
//! audit log line since advertisements are known to be incomplete.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use rialto_core::{NetworkEnvelope, NodeAddress};

use crate::peers::PeerManager;
use crate::transport::Transport;

pub struct Broadcaster {
    transport: Arc<dyn Transport>,
    peers: Arc<PeerManager>,
    queue_depth: usize,
    send_timeout: Duration,
    shutdown_drain: Duration,
    accepting: AtomicBool,
    queues: DashMap<NodeAddress, mpsc::Sender<NetworkEnvelope>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Broadcaster {
    pub fn new(
        transport: Arc<dyn Transport>,
        peers: Arc<PeerManager>,
        queue_depth: usize,
        send_timeout: Duration,
        shutdown_drain: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            peers,
            queue_depth,
            send_timeout,
            shutdown_drain,
            accepting: AtomicBool::new(true),
            queues: DashMap::new(),
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Enqueue `envelope` for every connected peer except `exclude`
    /// (the peer we received it from, on a relay). Returns the number
    /// of peers it was queued for.
    pub fn broadcast(&self, envelope: NetworkEnvelope, exclude: Option<&NodeAddress>) -> usize {
        if !self.accepting.load(Ordering::SeqCst) {
            return 0;
        }

        let required = envelope.required_capability();
        let mut queued = 0;

        for (addr, capabilities) in self.peers.connected_with_capabilities() {
            if Some(&addr) == exclude {
                continue;
            }
            if let Some(capability) = required {
                if !capabilities.has(capability) {
                    // Advertisements are incomplete in the wild; log the
                    // skip so operators can spot over-eager gating.
                    tracing::warn!(
                        peer = %addr,
                        envelope = envelope.name(),
                        capability = ?capability,
                        "skipping peer without required capability"
                    );
                    continue;
                }
            }

            let queue = self.queue_for(&addr);
            match queue.try_send(envelope.clone()) {
                Ok(()) => queued += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        peer = %addr,
                        envelope = envelope.name(),
                        "broadcast queue full, dropping envelope for peer"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    self.queues.remove(&addr);
                }
            }
        }

        tracing::debug!(envelope = envelope.name(), peers = queued, "broadcast queued");
        queued
    }

    fn queue_for(&self, addr: &NodeAddress) -> mpsc::Sender<NetworkEnvelope> {
        if let Some(existing) = self.queues.get(addr) {
            return existing.clone();
        }
        let (tx, mut rx) = mpsc::channel(self.queue_depth);
        self.queues.insert(addr.clone(), tx.clone());

        let transport = Arc::clone(&self.transport);
        let peer = addr.clone();
        let timeout = self.send_timeout;
        let handle = tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                if let Err(e) = transport
                    .send_message(peer.clone(), envelope, timeout)
                    .await
                {
                    tracing::debug!(peer = %peer, error = %e, "broadcast send failed");
                }
            }
        });
        self.workers
            .lock()
            .expect("worker lock poisoned")
            .push(handle);
        tx
    }

    /// Drop the queue for a departed peer; its worker exits once the
    /// sender is gone.
    pub fn drop_peer(&self, addr: &NodeAddress) {
        self.queues.remove(addr);
    }

    /// Stop accepting new broadcasts, then wait a bounded time for the
    /// per-peer workers to drain what is already queued.
    pub async fn shut_down(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        self.queues.clear();

        let workers: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self.workers.lock().expect("worker lock poisoned"),
        );
        if workers.is_empty() {
            return;
        }
        if tokio::time::timeout(self.shutdown_drain, join_all(workers))
            .await
            .is_err()
        {
            tracing::warn!("broadcast drain timed out at shutdown");
        }
    }
}
