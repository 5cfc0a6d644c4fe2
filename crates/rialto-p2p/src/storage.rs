//! Protected storage engine — the single authoritative store.
//!
//! Two maps: mutable owner-signed entries keyed by [`EntryId`], and
//! append-only hash-addressed payloads keyed by their content hash.
//! The engine is the sole owner of both; every mutation goes through
//! `try_add` / `try_remove` / `try_add_persistable` / `refresh_ttl`
//! and fires batched change notifications to registered listeners.
//!
//! Validation order for signed entries is deliberate: signature before
//! sequence number, so a peer can never probe the sequence book with
//! unsigned garbage.
//!
//! A sequence-number book survives removal — it is the tombstone
//! memory that stops an identity from being re-added at a sequence
//! number at or below its deletion.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;

use rialto_core::envelope::MAX_ENTRY_BYTES;
use rialto_core::{
    EntryId, PersistablePayload, ProtectedEntry, RefreshTtlMessage,
};

/// Sequence-book records untouched for this long are garbage-collected
/// during pruning sweeps. Until then they carry tombstone memory.
const SEQUENCE_BOOK_PURGE_AGE_MS: u64 = 10 * 24 * 3600 * 1000;

/// Unix time in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ── Results ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddResult {
    /// Newly stored (or replaced a prior version). Broadcast-worthy.
    Accepted,
    /// Byte-identical to what we already hold at the same sequence
    /// number. Success, but nothing changed and nothing is re-broadcast.
    AcceptedIdempotent,
    RejectedBadSignature,
    RejectedStaleSequence,
    RejectedOversize,
}

impl AddResult {
    pub fn is_accepted(&self) -> bool {
        matches!(self, AddResult::Accepted | AddResult::AcceptedIdempotent)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveResult {
    Removed,
    /// No stored entry for that identity, or the tombstone's sequence
    /// number does not advance past the book.
    RejectedUnknown,
    RejectedBadSignature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistableAddResult {
    Accepted,
    /// Already held — idempotent success to tolerate re-delivery.
    AcceptedDuplicate,
    /// Declared hash does not match a recomputation over the content.
    RejectedInvalidHash,
}

impl PersistableAddResult {
    pub fn is_accepted(&self) -> bool {
        !matches!(self, PersistableAddResult::RejectedInvalidHash)
    }
}

// ── Listeners ─────────────────────────────────────────────────────────────────

/// Change notifications. One callback per triggering network message:
/// a batch of 50 entries yields one `on_added` with 50 items.
pub trait StorageListener: Send + Sync {
    fn on_added(&self, _entries: &[ProtectedEntry]) {}
    fn on_removed(&self, _entries: &[ProtectedEntry]) {}
    fn on_persistable_added(&self, _payloads: &[PersistablePayload]) {}
}

// ── Engine ────────────────────────────────────────────────────────────────────

#[derive(Clone)]
struct SeqRecord {
    sequence_number: u32,
    owner_pub_key: [u8; 32],
    touched_ms: u64,
}

pub struct P2pDataStorage {
    me: Weak<P2pDataStorage>,
    protected: DashMap<EntryId, ProtectedEntry>,
    persistable: DashMap<[u8; 32], PersistablePayload>,
    /// Highest accepted sequence number per identity, surviving removal.
    sequence_book: DashMap<EntryId, SeqRecord>,
    listeners: RwLock<Vec<Arc<dyn StorageListener>>>,
    bootstrapped: AtomicBool,
    sweep_task: Mutex<Option<JoinHandle<()>>>,
}

impl P2pDataStorage {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            protected: DashMap::new(),
            persistable: DashMap::new(),
            sequence_book: DashMap::new(),
            listeners: RwLock::new(Vec::new()),
            bootstrapped: AtomicBool::new(false),
            sweep_task: Mutex::new(None),
        })
    }

    // ── Protected entries ─────────────────────────────────────────────────────

    /// Validate and store one signed entry. See the module docs for
    /// the validation order.
    pub fn try_add(&self, entry: ProtectedEntry, now_ms: u64) -> AddResult {
        let result = self.validate_and_store(&entry, now_ms);
        if result == AddResult::Accepted {
            self.notify_added(std::slice::from_ref(&entry));
        }
        result
    }

    /// Validate and store a batch arriving in one network message.
    /// Accepted entries produce a single batched notification.
    pub fn try_add_batch(&self, entries: Vec<ProtectedEntry>, now_ms: u64) -> Vec<AddResult> {
        let mut accepted = Vec::new();
        let mut results = Vec::with_capacity(entries.len());
        for entry in entries {
            let result = self.validate_and_store(&entry, now_ms);
            if result == AddResult::Accepted {
                accepted.push(entry);
            }
            results.push(result);
        }
        if !accepted.is_empty() {
            self.notify_added(&accepted);
        }
        results
    }

    fn validate_and_store(&self, entry: &ProtectedEntry, now_ms: u64) -> AddResult {
        if entry.serialized_size() > MAX_ENTRY_BYTES {
            tracing::debug!(id = %entry.entry_id(), "rejecting oversize entry");
            return AddResult::RejectedOversize;
        }

        // Signature first — never let an unsigned probe touch the book.
        if !entry.verify_signature() {
            tracing::debug!(id = %entry.entry_id(), "rejecting entry with bad signature");
            return AddResult::RejectedBadSignature;
        }

        let id = entry.entry_id();

        if let Some(record) = self.sequence_book.get(&id) {
            // The identity is owned; only the original key may mutate it.
            if record.owner_pub_key != entry.owner_pub_key {
                tracing::warn!(
                    id = %id,
                    "rejecting entry signed by a different owner than the stored identity"
                );
                return AddResult::RejectedBadSignature;
            }
            if entry.sequence_number < record.sequence_number {
                return AddResult::RejectedStaleSequence;
            }
            if entry.sequence_number == record.sequence_number {
                // Equal sequence number is fine only for an identical
                // re-delivery of what we already hold.
                return match self.protected.get(&id) {
                    Some(stored) if *stored == *entry => AddResult::AcceptedIdempotent,
                    _ => AddResult::RejectedStaleSequence,
                };
            }
        }

        self.sequence_book.insert(
            id,
            SeqRecord {
                sequence_number: entry.sequence_number,
                owner_pub_key: entry.owner_pub_key,
                touched_ms: now_ms,
            },
        );

        let replaced = self.protected.insert(id, entry.clone());
        tracing::debug!(
            id = %id,
            seq = entry.sequence_number,
            replaced = replaced.is_some(),
            "protected entry stored"
        );

        // Offers declare replacement-is-removal: takers must observe
        // the stale version disappear.
        if let Some(old) = replaced {
            if old.payload.is_removal_on_replace() {
                self.notify_removed(std::slice::from_ref(&old));
            }
        }

        AddResult::Accepted
    }

    /// Remove an entry given a signed tombstone. The tombstone's
    /// signature must validate against the *stored* entry's owner key —
    /// not whatever key the submitter claims.
    pub fn try_remove(&self, tombstone: &ProtectedEntry, now_ms: u64) -> RemoveResult {
        if !tombstone.verify_signature() {
            return RemoveResult::RejectedBadSignature;
        }

        let id = tombstone.entry_id();
        let Some(stored) = self.protected.get(&id).map(|e| e.clone()) else {
            return RemoveResult::RejectedUnknown;
        };

        if stored.owner_pub_key != tombstone.owner_pub_key {
            tracing::warn!(id = %id, "tombstone signed by non-owner rejected");
            return RemoveResult::RejectedBadSignature;
        }

        let book_seq = self
            .sequence_book
            .get(&id)
            .map(|r| r.sequence_number)
            .unwrap_or(0);
        if tombstone.sequence_number <= book_seq {
            return RemoveResult::RejectedUnknown;
        }

        self.sequence_book.insert(
            id,
            SeqRecord {
                sequence_number: tombstone.sequence_number,
                owner_pub_key: stored.owner_pub_key,
                touched_ms: now_ms,
            },
        );
        self.protected.remove(&id);
        tracing::debug!(id = %id, seq = tombstone.sequence_number, "protected entry removed");

        self.notify_removed(std::slice::from_ref(&stored));
        RemoveResult::Removed
    }

    /// Re-stamp an entry's creation time from an owner-signed refresh.
    /// Returns false if the entry is unknown, the signature does not
    /// match the stored owner, or the sequence number does not advance.
    pub fn refresh_ttl(&self, message: &RefreshTtlMessage, now_ms: u64) -> bool {
        let id = message.entry_id;
        let Some(mut stored) = self.protected.get_mut(&id) else {
            tracing::debug!(id = %id, "refresh for unknown entry ignored");
            return false;
        };

        let signed = RefreshTtlMessage::signed_bytes(&id, message.sequence_number);
        if !rialto_core::crypto::verify(&stored.owner_pub_key, &signed, &message.signature) {
            tracing::debug!(id = %id, "refresh with bad signature ignored");
            return false;
        }

        let book_seq = self
            .sequence_book
            .get(&id)
            .map(|r| r.sequence_number)
            .unwrap_or(0);
        if message.sequence_number <= book_seq {
            return false;
        }

        stored.sequence_number = message.sequence_number;
        stored.creation_ts_ms = now_ms;
        let owner = stored.owner_pub_key;
        drop(stored);

        self.sequence_book.insert(
            id,
            SeqRecord {
                sequence_number: message.sequence_number,
                owner_pub_key: owner,
                touched_ms: now_ms,
            },
        );
        tracing::debug!(id = %id, seq = message.sequence_number, "ttl refreshed");
        true
    }

    /// Next sequence number for a local mutation of this identity.
    pub fn next_sequence_number(&self, id: &EntryId) -> u32 {
        self.sequence_book
            .get(id)
            .map(|r| r.sequence_number + 1)
            .unwrap_or(1)
    }

    // ── Persistable payloads ──────────────────────────────────────────────────

    /// Append-only add: accept iff the declared hash recomputes, with
    /// duplicate delivery an idempotent success.
    pub fn try_add_persistable(&self, payload: PersistablePayload) -> PersistableAddResult {
        if !payload.verify_hash() {
            tracing::debug!("rejecting persistable payload with invalid hash");
            return PersistableAddResult::RejectedInvalidHash;
        }
        let hash = payload.declared_hash();
        if self.persistable.contains_key(&hash) {
            return PersistableAddResult::AcceptedDuplicate;
        }
        self.persistable.insert(hash, payload.clone());
        self.notify_persistable_added(std::slice::from_ref(&payload));
        PersistableAddResult::Accepted
    }

    /// Batch variant for data responses; one notification for the batch.
    pub fn try_add_persistable_batch(
        &self,
        payloads: Vec<PersistablePayload>,
    ) -> Vec<PersistableAddResult> {
        let mut accepted = Vec::new();
        let mut results = Vec::with_capacity(payloads.len());
        for payload in payloads {
            if !payload.verify_hash() {
                results.push(PersistableAddResult::RejectedInvalidHash);
                continue;
            }
            let hash = payload.declared_hash();
            if self.persistable.contains_key(&hash) {
                results.push(PersistableAddResult::AcceptedDuplicate);
                continue;
            }
            self.persistable.insert(hash, payload.clone());
            accepted.push(payload);
            results.push(PersistableAddResult::Accepted);
        }
        if !accepted.is_empty() {
            self.notify_persistable_added(&accepted);
        }
        results
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    /// Read-only snapshot of the protected map. Does not stay live.
    pub fn map_snapshot(&self) -> HashMap<EntryId, ProtectedEntry> {
        self.protected
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect()
    }

    pub fn get(&self, id: &EntryId) -> Option<ProtectedEntry> {
        self.protected.get(id).map(|e| e.clone())
    }

    pub fn contains_persistable(&self, hash: &[u8; 32]) -> bool {
        self.persistable.contains_key(hash)
    }

    pub fn persistable_snapshot(&self) -> Vec<PersistablePayload> {
        self.persistable.iter().map(|e| e.value().clone()).collect()
    }

    pub fn protected_ids(&self) -> Vec<EntryId> {
        self.protected.iter().map(|e| *e.key()).collect()
    }

    pub fn persistable_hashes(&self) -> Vec<[u8; 32]> {
        self.persistable.iter().map(|e| *e.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.protected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.protected.is_empty()
    }

    // ── Pruning ───────────────────────────────────────────────────────────────

    /// Drop entries past their TTL and apply per-type truncation caps.
    /// Pruning is a pure function of local time, never of peer input.
    pub fn prune_expired(&self, now_ms: u64) {
        let expired: Vec<ProtectedEntry> = self
            .protected
            .iter()
            .filter(|e| e.value().is_expired(now_ms))
            .map(|e| e.value().clone())
            .collect();

        for entry in &expired {
            self.protected.remove(&entry.entry_id());
        }
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "pruned expired entries");
            self.notify_removed(&expired);
        }

        self.truncate_persistable();

        // Sequence-book records (tombstone memory included) age out
        // eventually so the book cannot grow without bound.
        self.sequence_book
            .retain(|_, r| now_ms.saturating_sub(r.touched_ms) < SEQUENCE_BOOK_PURGE_AGE_MS);
    }

    /// Apply each payload kind's own truncation policy: the oldest
    /// members beyond that kind's cap are dropped. Uncapped kinds keep
    /// everything.
    fn truncate_persistable(&self) {
        let mut groups: HashMap<
            std::mem::Discriminant<PersistablePayload>,
            (usize, Vec<([u8; 32], u64)>),
        > = HashMap::new();
        for e in self.persistable.iter() {
            if let Some(max) = e.value().max_items() {
                groups
                    .entry(std::mem::discriminant(e.value()))
                    .or_insert_with(|| (max, Vec::new()))
                    .1
                    .push((*e.key(), e.value().sort_date_ms()));
            }
        }
        for (max, mut members) in groups.into_values() {
            if members.len() <= max {
                continue;
            }
            members.sort_by_key(|(_, date)| *date);
            let excess = members.len() - max;
            for (hash, _) in members.drain(..excess) {
                self.persistable.remove(&hash);
            }
            tracing::info!(dropped = excess, "truncated capped persistable payloads");
        }
    }

    /// Enable the periodic pruning sweep. Called once the node is
    /// bootstrapped — pruning before the initial sync would fight the
    /// data we are about to receive.
    pub fn on_bootstrapped(&self, sweep_interval: Duration) {
        if self.bootstrapped.swap(true, Ordering::SeqCst) {
            return;
        }
        // Always succeeds here: the caller holds a strong reference.
        let Some(storage) = self.me.upgrade() else {
            return;
        };
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_interval);
            interval.tick().await; // first tick fires immediately
            loop {
                interval.tick().await;
                storage.prune_expired(now_ms());
            }
        });
        *self.sweep_task.lock().expect("sweep lock poisoned") = Some(handle);
        tracing::info!("storage bootstrapped, pruning sweep enabled");
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrapped.load(Ordering::SeqCst)
    }

    pub fn shut_down(&self) {
        if let Some(handle) = self.sweep_task.lock().expect("sweep lock poisoned").take() {
            handle.abort();
        }
    }

    // ── Listener plumbing ─────────────────────────────────────────────────────

    pub fn add_listener(&self, listener: Arc<dyn StorageListener>) {
        self.listeners
            .write()
            .expect("listener lock poisoned")
            .push(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn StorageListener>) {
        self.listeners
            .write()
            .expect("listener lock poisoned")
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    fn snapshot_listeners(&self) -> Vec<Arc<dyn StorageListener>> {
        self.listeners
            .read()
            .expect("listener lock poisoned")
            .clone()
    }

    fn notify_added(&self, entries: &[ProtectedEntry]) {
        for listener in self.snapshot_listeners() {
            // A failing listener must not block delivery to the rest.
            if catch_unwind(AssertUnwindSafe(|| listener.on_added(entries))).is_err() {
                tracing::error!("storage listener panicked in on_added");
            }
        }
    }

    fn notify_removed(&self, entries: &[ProtectedEntry]) {
        for listener in self.snapshot_listeners() {
            if catch_unwind(AssertUnwindSafe(|| listener.on_removed(entries))).is_err() {
                tracing::error!("storage listener panicked in on_removed");
            }
        }
    }

    fn notify_persistable_added(&self, payloads: &[PersistablePayload]) {
        for listener in self.snapshot_listeners() {
            if catch_unwind(AssertUnwindSafe(|| listener.on_persistable_added(payloads))).is_err()
            {
                tracing::error!("storage listener panicked in on_persistable_added");
            }
        }
    }
}
