//! rialto-p2p — the peer-to-peer overlay: bootstrap orchestration,
//! protected storage with gossip replication, peer exchange, and
//! encrypted direct messaging over a pluggable anonymizing transport.

pub mod broadcast;
pub mod exchange;
pub mod mailbox;
pub mod peers;
pub mod request;
pub mod service;
pub mod storage;
pub mod transport;

pub use broadcast::Broadcaster;
pub use exchange::PeerExchangeManager;
pub use mailbox::{MailboxHandler, NoopMailbox};
pub use peers::PeerManager;
pub use request::{RequestDataEvent, RequestDataManager};
pub use service::{
    DecryptedMessage, DirectMessageListener, P2pService, P2pServiceListener, SendResult,
};
pub use storage::{
    AddResult, P2pDataStorage, PersistableAddResult, RemoveResult, StorageListener,
};
pub use transport::{Transport, TransportError, TransportEvent};
