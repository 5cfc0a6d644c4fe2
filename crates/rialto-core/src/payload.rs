//! Payload taxonomy — what the network actually replicates.
//!
//! Two families:
//!   - [`ProtectedPayload`]: mutable, owner-signed, TTL'd entries
//!     (offers, filters, alerts). Identity is application-defined so
//!     a newer signed version replaces the old one.
//!   - [`PersistablePayload`]: append-only, hash-addressed data
//!     (trade statistics, account witnesses). No owner, no mutation —
//!     identity is the content hash itself.
//!
//! Per-type behavior (TTL, truncation cap, capability tag,
//! replacement-is-removal) lives here on the variants, not as
//! conditionals inside the storage engine.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::capability::Capability;
use crate::crypto::{hash, PubKeyRing};

/// The application-defined identity of a mutable entry — a BLAKE3
/// digest over the payload's identity bytes, not its full content.
/// Two versions of the same offer share one `EntryId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryId(pub [u8; 32]);

impl EntryId {
    /// Short hex prefix, for log output.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.short())
    }
}

// ── Protected payloads ────────────────────────────────────────────────────────

/// Offers are short-lived and must be refreshed by an online maker.
pub const OFFER_TTL: Duration = Duration::from_secs(9 * 60);
/// Filters and alerts persist until their publisher rotates them.
pub const FILTER_TTL: Duration = Duration::from_secs(30 * 24 * 3600);
pub const ALERT_TTL: Duration = Duration::from_secs(30 * 24 * 3600);

/// A mutable, owner-signed payload replicated through protected storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProtectedPayload {
    /// A maker's open offer. Replaced on every edit, removed on take.
    OfferAnnouncement {
        offer_id: String,
        owner_pub_key_ring: PubKeyRing,
        market: String,
        is_buy_offer: bool,
        amount_minor: u64,
        price_minor: u64,
    },
    /// Operator-published filter of banned offers/currencies.
    /// One per publisher key.
    MarketFilter {
        owner_pub_key_ring: PubKeyRing,
        banned_offer_ids: Vec<String>,
        banned_currency_codes: Vec<String>,
    },
    /// Operator-published alert shown to all nodes. One per publisher key.
    MarketAlert {
        owner_pub_key_ring: PubKeyRing,
        message: String,
        requires_update: bool,
    },
}

impl ProtectedPayload {
    /// The owner's public key ring. Only this key may mutate or remove
    /// the entry.
    pub fn owner_pub_key_ring(&self) -> &PubKeyRing {
        match self {
            ProtectedPayload::OfferAnnouncement {
                owner_pub_key_ring, ..
            }
            | ProtectedPayload::MarketFilter {
                owner_pub_key_ring, ..
            }
            | ProtectedPayload::MarketAlert {
                owner_pub_key_ring, ..
            } => owner_pub_key_ring,
        }
    }

    /// Identity bytes: what makes two envelopes "the same" record.
    /// Offers are keyed by offer id; filters and alerts by publisher key
    /// (a publisher has at most one live instance of each).
    fn id_bytes(&self) -> Vec<u8> {
        match self {
            ProtectedPayload::OfferAnnouncement { offer_id, .. } => {
                let mut b = b"offer:".to_vec();
                b.extend_from_slice(offer_id.as_bytes());
                b
            }
            ProtectedPayload::MarketFilter {
                owner_pub_key_ring, ..
            } => {
                let mut b = b"filter:".to_vec();
                b.extend_from_slice(&owner_pub_key_ring.signing);
                b
            }
            ProtectedPayload::MarketAlert {
                owner_pub_key_ring, ..
            } => {
                let mut b = b"alert:".to_vec();
                b.extend_from_slice(&owner_pub_key_ring.signing);
                b
            }
        }
    }

    /// The entry identity used as the protected-storage map key.
    pub fn entry_id(&self) -> EntryId {
        EntryId(hash(&self.id_bytes()))
    }

    /// How long an entry lives without a refresh.
    pub fn ttl(&self) -> Duration {
        match self {
            ProtectedPayload::OfferAnnouncement { .. } => OFFER_TTL,
            ProtectedPayload::MarketFilter { .. } => FILTER_TTL,
            ProtectedPayload::MarketAlert { .. } => ALERT_TTL,
        }
    }

    /// Capability a peer must advertise before we send it this payload.
    pub fn required_capability(&self) -> Option<Capability> {
        match self {
            ProtectedPayload::MarketAlert { .. } => Some(Capability::MarketAlert),
            _ => None,
        }
    }

    /// Whether replacing an entry implies removal of the prior version.
    /// True for offers: takers must see the stale version disappear.
    pub fn is_removal_on_replace(&self) -> bool {
        matches!(self, ProtectedPayload::OfferAnnouncement { .. })
    }
}

// ── Persistable payloads ──────────────────────────────────────────────────────

/// Cap on locally retained trade statistics. Oldest beyond this are
/// dropped by the pruning sweep.
pub const TRADE_STATISTIC_MAX_ITEMS: usize = 10_000;

/// Append-only, hash-addressed payload. Once accepted, never overwritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PersistablePayload {
    /// A completed trade, published for market statistics.
    TradeStatistic {
        market: String,
        amount_minor: u64,
        price_minor: u64,
        trade_date_ms: u64,
        hash: [u8; 32],
    },
    /// Proof of account age, referenced during trades.
    AccountWitness {
        account_input_hash: [u8; 32],
        created_ms: u64,
        hash: [u8; 32],
    },
}

impl PersistablePayload {
    pub fn new_trade_statistic(
        market: String,
        amount_minor: u64,
        price_minor: u64,
        trade_date_ms: u64,
    ) -> Self {
        let hash = Self::trade_statistic_hash(&market, amount_minor, price_minor, trade_date_ms);
        PersistablePayload::TradeStatistic {
            market,
            amount_minor,
            price_minor,
            trade_date_ms,
            hash,
        }
    }

    pub fn new_account_witness(account_input_hash: [u8; 32], created_ms: u64) -> Self {
        let hash = Self::account_witness_hash(&account_input_hash, created_ms);
        PersistablePayload::AccountWitness {
            account_input_hash,
            created_ms,
            hash,
        }
    }

    fn trade_statistic_hash(
        market: &str,
        amount_minor: u64,
        price_minor: u64,
        trade_date_ms: u64,
    ) -> [u8; 32] {
        let mut b = b"trade-statistic:".to_vec();
        b.extend_from_slice(market.as_bytes());
        b.extend_from_slice(&amount_minor.to_le_bytes());
        b.extend_from_slice(&price_minor.to_le_bytes());
        b.extend_from_slice(&trade_date_ms.to_le_bytes());
        hash(&b)
    }

    fn account_witness_hash(account_input_hash: &[u8; 32], created_ms: u64) -> [u8; 32] {
        let mut b = b"account-witness:".to_vec();
        b.extend_from_slice(account_input_hash);
        b.extend_from_slice(&created_ms.to_le_bytes());
        hash(&b)
    }

    /// The declared content hash — the map key in append-only storage.
    pub fn declared_hash(&self) -> [u8; 32] {
        match self {
            PersistablePayload::TradeStatistic { hash, .. }
            | PersistablePayload::AccountWitness { hash, .. } => *hash,
        }
    }

    /// Recompute the hash from content and compare with the declared
    /// one. A mismatch means the payload was tampered with in transit.
    pub fn verify_hash(&self) -> bool {
        let recomputed = match self {
            PersistablePayload::TradeStatistic {
                market,
                amount_minor,
                price_minor,
                trade_date_ms,
                ..
            } => Self::trade_statistic_hash(market, *amount_minor, *price_minor, *trade_date_ms),
            PersistablePayload::AccountWitness {
                account_input_hash,
                created_ms,
                ..
            } => Self::account_witness_hash(account_input_hash, *created_ms),
        };
        recomputed == self.declared_hash()
    }

    /// Per-type truncation cap applied by the pruning sweep.
    /// None = retain everything.
    pub fn max_items(&self) -> Option<usize> {
        match self {
            PersistablePayload::TradeStatistic { .. } => Some(TRADE_STATISTIC_MAX_ITEMS),
            PersistablePayload::AccountWitness { .. } => None,
        }
    }

    /// Ordering key for truncation — oldest first.
    pub fn sort_date_ms(&self) -> u64 {
        match self {
            PersistablePayload::TradeStatistic { trade_date_ms, .. } => *trade_date_ms,
            PersistablePayload::AccountWitness { created_ms, .. } => *created_ms,
        }
    }

    /// Capability a peer must advertise before we send it this payload.
    pub fn required_capability(&self) -> Option<Capability> {
        match self {
            PersistablePayload::TradeStatistic { .. } => Some(Capability::TradeStatistics),
            PersistablePayload::AccountWitness { .. } => Some(Capability::AccountWitness),
        }
    }
}
