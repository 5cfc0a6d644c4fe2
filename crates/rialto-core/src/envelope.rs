//! Wire model — every message the transport carries between peers.
//!
//! [`NetworkEnvelope`] is the single tagged type handed to the
//! transport; the transport has no opinion about its contents. The
//! canonical signed-bytes encoding for protected entries also lives
//! here so signing and verification cannot drift apart.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capability::{Capabilities, Capability};
use crate::crypto::{self, CryptoError, KeyRing, SealedAndSigned};
use crate::payload::{EntryId, PersistablePayload, ProtectedPayload};

/// Hard cap on a serialized protected entry. Anything larger is
/// rejected before signature verification — a malformed or hostile
/// entry must not cost us the crypto.
pub const MAX_ENTRY_BYTES: usize = 100 * 1024;

// ── NodeAddress ───────────────────────────────────────────────────────────────

/// Opaque peer identity: an onion host plus port, reachable only over
/// the anonymizing transport. Used as the map key for all connection
/// bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeAddress {
    pub host: String,
    pub port: u16,
}

impl NodeAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse "host:port". Used for seed-node config entries.
    pub fn parse(s: &str) -> Option<Self> {
        let (host, port) = s.rsplit_once(':')?;
        let port = port.parse().ok()?;
        if host.is_empty() {
            return None;
        }
        Some(Self::new(host, port))
    }
}

impl std::fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

// ── ProtectedEntry ────────────────────────────────────────────────────────────

/// Canonical bytes the owner signs: `(payload, sequence_number)`.
/// Field order is fixed by this struct's declaration order.
#[derive(Serialize)]
struct SignedTuple<'a> {
    payload: &'a ProtectedPayload,
    sequence_number: u32,
}

/// The signed envelope around a [`ProtectedPayload`].
///
/// `signature` covers `(payload, sequence_number)` under the owner's
/// Ed25519 key. The same structure doubles as a tombstone: a
/// `RemoveData` envelope carries an entry whose signature authorizes
/// deletion at that sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedEntry {
    pub payload: ProtectedPayload,
    /// Ed25519 verifying key of the owner. Must match the key embedded
    /// in the payload's `PubKeyRing` — checked at validation.
    pub owner_pub_key: [u8; 32],
    pub sequence_number: u32,
    pub signature: Vec<u8>,
    pub creation_ts_ms: u64,
    pub ttl_ms: u64,
}

impl ProtectedEntry {
    /// Build and sign a new entry for a local mutation.
    pub fn new_signed(
        key_ring: &KeyRing,
        payload: ProtectedPayload,
        sequence_number: u32,
        now_ms: u64,
    ) -> Result<Self, CryptoError> {
        let ttl_ms = payload.ttl().as_millis() as u64;
        let signature = key_ring.sign(&Self::signed_bytes(&payload, sequence_number)?);
        Ok(Self {
            owner_pub_key: key_ring.pub_key_ring().signing,
            payload,
            sequence_number,
            signature,
            creation_ts_ms: now_ms,
            ttl_ms,
        })
    }

    /// The canonical encoding of `(payload, sequence_number)`.
    pub fn signed_bytes(
        payload: &ProtectedPayload,
        sequence_number: u32,
    ) -> Result<Vec<u8>, CryptoError> {
        Ok(serde_json::to_vec(&SignedTuple {
            payload,
            sequence_number,
        })?)
    }

    /// Verify this entry's signature against its own claimed owner key,
    /// and that the claimed key matches the payload's embedded key ring.
    pub fn verify_signature(&self) -> bool {
        if self.owner_pub_key != self.payload.owner_pub_key_ring().signing {
            return false;
        }
        let Ok(bytes) = Self::signed_bytes(&self.payload, self.sequence_number) else {
            return false;
        };
        crypto::verify(&self.owner_pub_key, &bytes, &self.signature)
    }

    pub fn entry_id(&self) -> EntryId {
        self.payload.entry_id()
    }

    /// TTL expiry is a pure function of local time, never of peer input.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms > self.creation_ts_ms.saturating_add(self.ttl_ms)
    }

    pub fn serialized_size(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(usize::MAX)
    }
}

// ── RefreshTtlMessage ─────────────────────────────────────────────────────────

/// Re-stamps an entry's creation time without resending the payload.
/// The owner signs `(entry_id, sequence_number)`; storage verifies it
/// against the stored entry's owner key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshTtlMessage {
    pub entry_id: EntryId,
    pub sequence_number: u32,
    pub signature: Vec<u8>,
}

impl RefreshTtlMessage {
    pub fn new_signed(key_ring: &KeyRing, entry_id: EntryId, sequence_number: u32) -> Self {
        let signature = key_ring.sign(&Self::signed_bytes(&entry_id, sequence_number));
        Self {
            entry_id,
            sequence_number,
            signature,
        }
    }

    pub fn signed_bytes(entry_id: &EntryId, sequence_number: u32) -> Vec<u8> {
        let mut b = b"refresh:".to_vec();
        b.extend_from_slice(&entry_id.0);
        b.extend_from_slice(&sequence_number.to_le_bytes());
        b
    }
}

// ── DirectMessage ─────────────────────────────────────────────────────────────

/// Plaintext of an encrypted point-to-point message.
///
/// The trading protocol defines `msg_type`/`body` pairs; this layer
/// only moves them. Unknown `msg_type` values are delivered verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectMessage {
    /// Deduplication id chosen by the sender.
    pub msg_id: String,
    /// Well-known type string, extensible.
    pub msg_type: String,
    /// Unix timestamp in milliseconds at send time.
    pub sent_ts_ms: u64,
    /// Type-specific content. Structure is defined by `msg_type`.
    pub body: serde_json::Value,
}

impl DirectMessage {
    /// Capability the recipient must support, derived from `msg_type`.
    pub fn required_capability(&self) -> Option<Capability> {
        match self.msg_type.as_str() {
            "offer-taken" => Some(Capability::ReceiveOffersTaken),
            "mediation" => Some(Capability::Mediation),
            _ => None,
        }
    }
}

// ── NetworkEnvelope ───────────────────────────────────────────────────────────

/// Every message the transport carries. One tagged enum, no dynamic
/// dispatch — validation and capability tags hang off the variants'
/// payload types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "envelope", rename_all = "snake_case")]
pub enum NetworkEnvelope {
    /// A single protected-storage mutation being gossiped.
    AddData { entry: ProtectedEntry },
    /// Signed tombstone for an existing entry.
    RemoveData { tombstone: ProtectedEntry },
    RefreshTtl { message: RefreshTtlMessage },
    /// Append-only payload being gossiped.
    AddPersistable { payload: PersistablePayload },

    /// First sync request a starting node sends to a seed node.
    PreliminaryDataRequest {
        nonce: u64,
        excluded_ids: Vec<EntryId>,
        excluded_hashes: Vec<[u8; 32]>,
        capabilities: Capabilities,
    },
    /// Incremental request once the network is ready.
    UpdatedDataRequest {
        nonce: u64,
        excluded_ids: Vec<EntryId>,
        excluded_hashes: Vec<[u8; 32]>,
        capabilities: Capabilities,
    },
    /// Batched answer to either data request kind.
    DataResponse {
        request_nonce: u64,
        entries: Vec<ProtectedEntry>,
        persistable: Vec<PersistablePayload>,
        capabilities: Capabilities,
    },

    /// Peer-exchange: ask a peer for its reported-peer list.
    PeersRequest {
        nonce: u64,
        capabilities: Capabilities,
    },
    PeersResponse {
        request_nonce: u64,
        reported: Vec<NodeAddress>,
    },

    Ping { nonce: u64 },
    Pong { request_nonce: u64 },

    /// An encrypted direct message. `sender_address` is provenance for
    /// the listener callback, not trusted for anything security-relevant.
    SealedMessage {
        sender_address: NodeAddress,
        sealed: SealedAndSigned,
    },
}

impl NetworkEnvelope {
    /// Capability a peer must advertise before this envelope may be
    /// sent to it. None = safe for every peer.
    pub fn required_capability(&self) -> Option<Capability> {
        match self {
            NetworkEnvelope::AddData { entry } => entry.payload.required_capability(),
            NetworkEnvelope::RemoveData { tombstone } => tombstone.payload.required_capability(),
            NetworkEnvelope::AddPersistable { payload } => payload.required_capability(),
            _ => None,
        }
    }

    /// Short name for log output.
    pub fn name(&self) -> &'static str {
        match self {
            NetworkEnvelope::AddData { .. } => "AddData",
            NetworkEnvelope::RemoveData { .. } => "RemoveData",
            NetworkEnvelope::RefreshTtl { .. } => "RefreshTtl",
            NetworkEnvelope::AddPersistable { .. } => "AddPersistable",
            NetworkEnvelope::PreliminaryDataRequest { .. } => "PreliminaryDataRequest",
            NetworkEnvelope::UpdatedDataRequest { .. } => "UpdatedDataRequest",
            NetworkEnvelope::DataResponse { .. } => "DataResponse",
            NetworkEnvelope::PeersRequest { .. } => "PeersRequest",
            NetworkEnvelope::PeersResponse { .. } => "PeersResponse",
            NetworkEnvelope::Ping { .. } => "Ping",
            NetworkEnvelope::Pong { .. } => "Pong",
            NetworkEnvelope::SealedMessage { .. } => "SealedMessage",
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Top-level error type for the public P2P API.
#[derive(Debug, Error)]
pub enum P2pError {
    /// A mutating or sending call arrived before bootstrap completed.
    /// This is a caller-side sequencing bug, reported distinctly.
    #[error("network not ready — bootstrap has not completed")]
    NetworkNotReady,

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("send timed out")]
    Timeout,
}
