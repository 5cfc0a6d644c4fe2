//! rialto-core — shared types, wire envelopes, and cryptographic primitives.
//! All other Rialto crates depend on this one.

pub mod capability;
pub mod config;
pub mod crypto;
pub mod envelope;
pub mod payload;

pub use capability::{Capabilities, Capability};
pub use crypto::{KeyRing, PubKeyRing, SealedAndSigned};
pub use envelope::{
    DirectMessage, NetworkEnvelope, NodeAddress, P2pError, ProtectedEntry, RefreshTtlMessage,
};
pub use payload::{EntryId, PersistablePayload, ProtectedPayload};
