//! Transport boundary — the anonymizing network is an external
//! collaborator behind this trait.
//!
//! The transport owns connections and delivers [`TransportEvent`]s into
//! an mpsc channel handed over at construction time. The P2P core never
//! sees sockets or onion circuits; it sees envelopes with provenance.
//!
//! The [`memory`] submodule provides an in-process hub implementation
//! used by the integration tests and local simulations.

use std::time::Duration;

use futures::future::BoxFuture;
use thiserror::Error;

use rialto_core::{Capabilities, NetworkEnvelope, NodeAddress};

/// Events the transport pushes into the orchestrator.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The transport stack is up; outbound requests may be sent.
    Ready,
    /// Our hidden endpoint is published and reachable; `addr` is our
    /// own node address from now on.
    EndpointPublished(NodeAddress),
    /// Transport setup failed. Terminal for this transport instance.
    SetupFailed(String),
    /// A connection to `addr` exists. `capabilities` is what the peer
    /// advertised during the connection handshake.
    Connected {
        addr: NodeAddress,
        capabilities: Capabilities,
    },
    Disconnected {
        addr: NodeAddress,
    },
    /// An envelope arrived on an established connection.
    Message {
        from: NodeAddress,
        envelope: NetworkEnvelope,
    },
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport not started")]
    NotStarted,

    #[error("peer {0} unreachable")]
    PeerUnreachable(NodeAddress),

    #[error("send to {0} timed out")]
    Timeout(NodeAddress),

    #[error("transport closed: {0}")]
    Closed(String),
}

/// The contract this core consumes. Implementations must preserve
/// per-connection FIFO order; no ordering is guaranteed across
/// connections.
pub trait Transport: Send + Sync + 'static {
    /// Bring the transport up. Emits `Ready` and, once the hidden
    /// endpoint is reachable, `EndpointPublished`.
    fn start(&self) -> BoxFuture<'_, Result<(), TransportError>>;

    /// Send one envelope to a peer, establishing a connection if
    /// needed. Resolves when the transport has accepted the message
    /// for delivery (not when the peer processed it).
    fn send_message(
        &self,
        to: NodeAddress,
        envelope: NetworkEnvelope,
        timeout: Duration,
    ) -> BoxFuture<'static, Result<(), TransportError>>;

    /// Addresses with a live connection right now.
    fn connections(&self) -> Vec<NodeAddress>;

    /// Our own published address, once the endpoint is up.
    fn my_address(&self) -> Option<NodeAddress>;

    /// Tear down all connections. The orchestrator drains the
    /// broadcaster before calling this.
    fn shut_down(&self) -> BoxFuture<'_, ()>;
}

pub mod memory {
    //! In-process hub transport.
    //!
    //! Every node registers an inbox with a shared [`MemoryHub`];
    //! sending looks the recipient up and pushes into its inbox. A
    //! single unbounded inbox per node preserves per-sender FIFO order,
    //! matching the trait contract.

    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use dashmap::DashMap;
    use futures::future::BoxFuture;
    use tokio::sync::mpsc;

    use rialto_core::{Capabilities, NetworkEnvelope, NodeAddress};

    use super::{Transport, TransportError, TransportEvent};

    struct NodeHandle {
        inbox: mpsc::UnboundedSender<(NodeAddress, NetworkEnvelope)>,
        capabilities: Capabilities,
    }

    /// The shared "network": node address → inbox + advertised capabilities.
    #[derive(Default)]
    pub struct MemoryHub {
        nodes: DashMap<NodeAddress, NodeHandle>,
    }

    impl MemoryHub {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn capabilities_of(&self, addr: &NodeAddress) -> Option<Capabilities> {
            self.nodes.get(addr).map(|h| h.capabilities.clone())
        }
    }

    pub struct MemoryTransport {
        hub: Arc<MemoryHub>,
        addr: NodeAddress,
        capabilities: Capabilities,
        events: mpsc::Sender<TransportEvent>,
        inbox_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<(NodeAddress, NetworkEnvelope)>>>,
        inbox_tx: mpsc::UnboundedSender<(NodeAddress, NetworkEnvelope)>,
        connected: Arc<DashMap<NodeAddress, ()>>,
        started: AtomicBool,
    }

    impl MemoryTransport {
        /// Create a transport for `addr` advertising `capabilities`.
        /// Returns the transport and the event stream the orchestrator
        /// consumes.
        pub fn new(
            hub: Arc<MemoryHub>,
            addr: NodeAddress,
            capabilities: Capabilities,
        ) -> (Arc<Self>, mpsc::Receiver<TransportEvent>) {
            let (events_tx, events_rx) = mpsc::channel(1024);
            let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
            let transport = Arc::new(Self {
                hub,
                addr,
                capabilities,
                events: events_tx,
                inbox_rx: std::sync::Mutex::new(Some(inbox_rx)),
                inbox_tx,
                connected: Arc::new(DashMap::new()),
                started: AtomicBool::new(false),
            });
            (transport, events_rx)
        }

        /// Record a connection to `peer` if new, emitting `Connected`
        /// with the peer's advertised capability set.
        fn note_connected(&self, peer: &NodeAddress) {
            if self.connected.insert(peer.clone(), ()).is_none() {
                let capabilities = self
                    .hub
                    .capabilities_of(peer)
                    .unwrap_or_default();
                let _ = self.events.try_send(TransportEvent::Connected {
                    addr: peer.clone(),
                    capabilities,
                });
            }
        }
    }

    impl Transport for MemoryTransport {
        fn start(&self) -> BoxFuture<'_, Result<(), TransportError>> {
            Box::pin(async move {
                let mut inbox = self
                    .inbox_rx
                    .lock()
                    .expect("inbox lock poisoned")
                    .take()
                    .ok_or(TransportError::Closed("already started".into()))?;

                self.hub.nodes.insert(
                    self.addr.clone(),
                    NodeHandle {
                        inbox: self.inbox_tx.clone(),
                        capabilities: self.capabilities.clone(),
                    },
                );
                self.started.store(true, Ordering::SeqCst);

                let events = self.events.clone();
                let connected = self.connected.clone();
                let hub = self.hub.clone();
                tokio::spawn(async move {
                    while let Some((from, envelope)) = inbox.recv().await {
                        if connected.insert(from.clone(), ()).is_none() {
                            let capabilities =
                                hub.capabilities_of(&from).unwrap_or_default();
                            let _ = events
                                .send(TransportEvent::Connected {
                                    addr: from.clone(),
                                    capabilities,
                                })
                                .await;
                        }
                        if events
                            .send(TransportEvent::Message { from, envelope })
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                });

                let _ = self.events.send(TransportEvent::Ready).await;
                let _ = self
                    .events
                    .send(TransportEvent::EndpointPublished(self.addr.clone()))
                    .await;
                Ok(())
            })
        }

        fn send_message(
            &self,
            to: NodeAddress,
            envelope: NetworkEnvelope,
            _timeout: Duration,
        ) -> BoxFuture<'static, Result<(), TransportError>> {
            if !self.started.load(Ordering::SeqCst) {
                return Box::pin(async { Err(TransportError::NotStarted) });
            }
            let result = match self.hub.nodes.get(&to) {
                Some(handle) => handle
                    .inbox
                    .send((self.addr.clone(), envelope))
                    .map_err(|_| TransportError::PeerUnreachable(to.clone())),
                None => Err(TransportError::PeerUnreachable(to.clone())),
            };
            if result.is_ok() {
                self.note_connected(&to);
            }
            Box::pin(async move { result })
        }

        fn connections(&self) -> Vec<NodeAddress> {
            self.connected.iter().map(|e| e.key().clone()).collect()
        }

        fn my_address(&self) -> Option<NodeAddress> {
            if self.started.load(Ordering::SeqCst) {
                Some(self.addr.clone())
            } else {
                None
            }
        }

        fn shut_down(&self) -> BoxFuture<'_, ()> {
            Box::pin(async move {
                self.hub.nodes.remove(&self.addr);
                self.connected.clear();
                self.started.store(false, Ordering::SeqCst);
            })
        }
    }
}
