//! Capability tags — the backward-compatibility mechanism.
//!
//! A peer advertises the set of message kinds it can parse. Before
//! sending a gated payload to a peer, senders check the peer's set and
//! skip peers that would mis-handle it. Capability sets only ever grow
//! for the life of a connection.
//!
//! Gating is treated as a soft hint, not a hard invariant: peers have
//! been observed failing to report a capability they do support, so
//! every skip is logged for audit rather than silently swallowed.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;

/// A feature tag a peer can advertise. The wire value is the u32
/// discriminant; unknown values from newer peers are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum Capability {
    TradeStatistics = 1,
    AccountWitness = 2,
    MarketAlert = 3,
    Mediation = 4,
    ReceiveOffersTaken = 5,
}

impl From<Capability> for u32 {
    fn from(c: Capability) -> u32 {
        c as u32
    }
}

impl TryFrom<u32> for Capability {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Capability::TradeStatistics),
            2 => Ok(Capability::AccountWitness),
            3 => Ok(Capability::MarketAlert),
            4 => Ok(Capability::Mediation),
            5 => Ok(Capability::ReceiveOffersTaken),
            other => Err(format!("unknown capability tag {other}")),
        }
    }
}

/// A peer's advertised capability set.
///
/// Grow-only: [`Capabilities::add_all`] unions, nothing removes. Two
/// handshakes from the same connection therefore never shrink what we
/// believe the peer supports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities(BTreeSet<Capability>);

impl Serialize for Capabilities {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter().map(|c| *c as u32))
    }
}

impl<'de> Deserialize<'de> for Capabilities {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Unknown tags come from newer peers and are dropped, not
        // fatal: one new capability must never make the carrying
        // envelope undecodable.
        let tags = Vec::<u32>::deserialize(deserializer)?;
        Ok(Self(
            tags.into_iter()
                .filter_map(|tag| Capability::try_from(tag).ok())
                .collect(),
        ))
    }
}

impl Capabilities {
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// The full set a current node advertises.
    pub fn own() -> Self {
        Self::from_iter([
            Capability::TradeStatistics,
            Capability::AccountWitness,
            Capability::MarketAlert,
            Capability::Mediation,
            Capability::ReceiveOffersTaken,
        ])
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    /// Union in another set. Monotonic — never removes tags.
    pub fn add_all(&mut self, other: &Capabilities) {
        self.0.extend(other.0.iter().copied());
    }

    pub fn is_superset_of(&self, other: &Capabilities) -> bool {
        self.0.is_superset(&other.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Capability> for Capabilities {
    fn from_iter<T: IntoIterator<Item = Capability>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
