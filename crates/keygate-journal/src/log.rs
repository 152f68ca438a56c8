//! The audit log itself.
//!
//! Appends are linearized by an async mutex around the chain head: the
//! previous hash is read, the new entry hashed and written, and the head
//! advanced before the next append may begin. The entry key is written with
//! `store_if_absent`, so a second writer sharing the same storage cannot
//! silently overwrite a sequence slot; it gets `RaceAborted` instead.
//!
//! The same mutex guards an in-memory index built from storage on first use
//! and extended by every successful append. Per-caller counts and paging
//! come from the index; only the entries a page returns are read back.
//! A lost race or a retention sweep drops the index so the next call
//! rebuilds it from storage.

use keygate_core::effects::{ClockEffects, StorageEffects};
use keygate_core::{
    CallerId, Decision, EventKind, Hash32, KeygateError, KindScope, RequestType, Result,
};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::entry::{compute_entry_hash, AuditLogEntry, AuditRecord, GENESIS_HASH};
use crate::verify::{verify_entries, ChainCheckpoint, ChainVerification};

const ENTRY_PREFIX: &str = "audit/entry/";
const CHECKPOINT_KEY: &str = "audit/checkpoint";

fn entry_key(sequence: u64) -> String {
    format!("{ENTRY_PREFIX}{sequence:020}")
}

#[derive(Debug, Clone, Copy)]
struct ChainHead {
    next_sequence: u64,
    last_hash: Hash32,
}

/// Ordering key for reads: wall timestamp, then sequence.
type Stamp = (u64, u64);

#[derive(Debug, Default)]
struct CallerIndex {
    order: BTreeSet<Stamp>,
    kind_counts: HashMap<EventKind, usize>,
    last_allow: Option<u64>,
}

#[derive(Debug)]
struct LogIndex {
    head: ChainHead,
    order: BTreeSet<Stamp>,
    callers: HashMap<CallerId, CallerIndex>,
}

impl LogIndex {
    fn new(head: ChainHead) -> Self {
        Self {
            head,
            order: BTreeSet::new(),
            callers: HashMap::new(),
        }
    }

    fn insert(&mut self, entry: &AuditLogEntry) {
        let stamp = (entry.timestamp, entry.sequence);
        self.order.insert(stamp);
        let caller = self.callers.entry(entry.caller_id.clone()).or_default();
        caller.order.insert(stamp);
        if let Some(kind) = entry.event_kind {
            *caller.kind_counts.entry(kind).or_default() += 1;
        }
        if entry.decision == Decision::Allow {
            caller.last_allow = caller.last_allow.max(Some(entry.timestamp));
        }
    }
}

/// Sequences of one page, newest first.
fn page_of<'a>(
    order: impl DoubleEndedIterator<Item = &'a Stamp>,
    limit: usize,
    offset: usize,
) -> Vec<u64> {
    order
        .rev()
        .skip(offset)
        .take(limit)
        .map(|(_, sequence)| *sequence)
        .collect()
}

/// Outcome of a retention sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionReport {
    /// Entries deleted by this sweep
    pub removed: usize,
    /// Checkpoint now anchoring the chain, if any sweep ever removed entries
    pub checkpoint: Option<ChainCheckpoint>,
}

/// Append-only, hash-chained audit log
#[derive(Debug)]
pub struct AuditLog<S, C> {
    storage: S,
    clock: C,
    index: Mutex<Option<LogIndex>>,
}

impl<S: StorageEffects, C: ClockEffects> AuditLog<S, C> {
    /// Open the log over `storage`. The chain head and index are loaded
    /// lazily.
    pub fn new(storage: S, clock: C) -> Self {
        Self {
            storage,
            clock,
            index: Mutex::new(None),
        }
    }

    /// Lock the index, building it from storage if it is not loaded.
    async fn loaded_index(&self) -> Result<MutexGuard<'_, Option<LogIndex>>> {
        let mut guard = self.index.lock().await;
        if guard.is_none() {
            *guard = Some(self.load_index().await?);
        }
        Ok(guard)
    }

    async fn with_index<T>(&self, read: impl FnOnce(&LogIndex) -> T) -> Result<T> {
        let guard = self.loaded_index().await?;
        match guard.as_ref() {
            Some(index) => Ok(read(index)),
            None => Err(KeygateError::internal("audit index not loaded")),
        }
    }

    /// Append a decision, returning the stored entry with its hash.
    pub async fn append(&self, record: AuditRecord) -> Result<AuditLogEntry> {
        let mut guard = self.loaded_index().await?;
        let Some(head) = guard.as_ref().map(|index| index.head) else {
            return Err(KeygateError::internal("audit index not loaded"));
        };

        let mut entry = AuditLogEntry {
            sequence: head.next_sequence,
            timestamp: self.clock.physical_time_ms(),
            caller_id: record.caller_id,
            request_type: record.request_type,
            event_kind: record.event_kind,
            decision: record.decision,
            was_automatic: record.was_automatic,
            entry_hash: Hash32::ZERO,
        };
        entry.entry_hash = compute_entry_hash(&head.last_hash, &entry);

        let bytes = serde_json::to_vec(&entry)?;
        let inserted = match self
            .storage
            .store_if_absent(&entry_key(entry.sequence), bytes)
            .await
        {
            Ok(inserted) => inserted,
            Err(e) => {
                *guard = None;
                return Err(e.into());
            }
        };
        if !inserted {
            *guard = None;
            warn!(sequence = entry.sequence, "audit sequence slot already taken");
            return Err(KeygateError::race_aborted(format!(
                "audit entry {} was written concurrently",
                entry.sequence
            )));
        }

        if let Some(index) = guard.as_mut() {
            index.head = ChainHead {
                next_sequence: entry.sequence + 1,
                last_hash: entry.entry_hash,
            };
            index.insert(&entry);
        }
        debug!(
            sequence = entry.sequence,
            caller = %entry.caller_id,
            decision = %entry.decision,
            automatic = entry.was_automatic,
            "audit entry appended"
        );
        Ok(entry)
    }

    async fn load_index(&self) -> Result<LogIndex> {
        let entries = self.load_entries().await?;
        let head = match entries.last() {
            Some(last) => ChainHead {
                next_sequence: last.sequence + 1,
                last_hash: last.entry_hash,
            },
            None => self.anchored_head().await?,
        };
        let mut index = LogIndex::new(head);
        for entry in &entries {
            index.insert(entry);
        }
        debug!(entries = entries.len(), "audit index loaded");
        Ok(index)
    }

    async fn anchored_head(&self) -> Result<ChainHead> {
        Ok(match self.checkpoint().await? {
            Some(checkpoint) => ChainHead {
                next_sequence: checkpoint.anchor_sequence + 1,
                last_hash: checkpoint.anchor_hash,
            },
            None => ChainHead {
                next_sequence: 1,
                last_hash: GENESIS_HASH,
            },
        })
    }

    /// Every stored entry in chain (ascending sequence) order.
    async fn load_entries(&self) -> Result<Vec<AuditLogEntry>> {
        let keys = self.storage.list_keys(ENTRY_PREFIX).await?;
        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            // A key can vanish between listing and reading if a sweep runs.
            if let Some(bytes) = self.storage.retrieve(&key).await? {
                entries.push(serde_json::from_slice::<AuditLogEntry>(&bytes)?);
            }
        }
        entries.sort_by_key(|e| e.sequence);
        Ok(entries)
    }

    /// Read back the given sequences, skipping any swept meanwhile.
    async fn load_sequences(&self, sequences: Vec<u64>) -> Result<Vec<AuditLogEntry>> {
        let mut entries = Vec::with_capacity(sequences.len());
        for sequence in sequences {
            if let Some(bytes) = self.storage.retrieve(&entry_key(sequence)).await? {
                entries.push(serde_json::from_slice::<AuditLogEntry>(&bytes)?);
            }
        }
        Ok(entries)
    }

    /// All entries in chain order, for replay and export.
    pub async fn all_ordered(&self) -> Result<Vec<AuditLogEntry>> {
        self.load_entries().await
    }

    /// Number of stored entries.
    pub async fn len(&self) -> Result<usize> {
        Ok(self.storage.list_keys(ENTRY_PREFIX).await?.len())
    }

    /// Whether the log holds no entries.
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// The newest `limit` entries.
    pub async fn recent(&self, limit: usize) -> Result<Vec<AuditLogEntry>> {
        self.page(limit, 0).await
    }

    /// One page of entries, newest first: timestamp descending, then
    /// sequence descending.
    pub async fn page(&self, limit: usize, offset: usize) -> Result<Vec<AuditLogEntry>> {
        let sequences = self
            .with_index(|index| page_of(index.order.iter(), limit, offset))
            .await?;
        self.load_sequences(sequences).await
    }

    /// One page of a single caller's entries, newest first.
    pub async fn for_caller(
        &self,
        caller: &CallerId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AuditLogEntry>> {
        let sequences = self
            .with_index(|index| {
                index
                    .callers
                    .get(caller)
                    .map(|c| page_of(c.order.iter(), limit, offset))
                    .unwrap_or_default()
            })
            .await?;
        self.load_sequences(sequences).await
    }

    /// Timestamp of the caller's last allowed request.
    pub async fn last_used_time(&self, caller: &CallerId) -> Result<Option<u64>> {
        self.with_index(|index| index.callers.get(caller).and_then(|c| c.last_allow))
            .await
    }

    /// Timestamp of the last allowed request covered by one permission tuple.
    pub async fn last_used_time_for_permission(
        &self,
        caller: &CallerId,
        request_type: RequestType,
        scope: KindScope,
    ) -> Result<Option<u64>> {
        let sequences = self
            .with_index(|index| {
                index
                    .callers
                    .get(caller)
                    .map(|c| {
                        c.order
                            .iter()
                            .map(|(_, sequence)| *sequence)
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default()
            })
            .await?;
        Ok(self
            .load_sequences(sequences)
            .await?
            .iter()
            .filter(|e| e.decision == Decision::Allow && e.matches_scope(request_type, scope))
            .map(|e| e.timestamp)
            .max())
    }

    /// How many entries the caller has for exactly this kind.
    pub async fn count_for_kind(&self, caller: &CallerId, kind: EventKind) -> Result<usize> {
        self.with_index(|index| {
            index
                .callers
                .get(caller)
                .and_then(|c| c.kind_counts.get(&kind).copied())
                .unwrap_or(0)
        })
        .await
    }

    /// How many entries the caller has with `timestamp >= since_ms`.
    pub async fn count_since(&self, caller: &CallerId, since_ms: u64) -> Result<usize> {
        self.with_index(|index| {
            index
                .callers
                .get(caller)
                .map_or(0, |c| c.order.range((since_ms, 0)..).count())
        })
        .await
    }

    /// Checkpoint left by earlier retention sweeps.
    pub async fn checkpoint(&self) -> Result<Option<ChainCheckpoint>> {
        match self.storage.retrieve(CHECKPOINT_KEY).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Retention sweep.
    ///
    /// Removes the oldest contiguous run of entries (by sequence) whose
    /// timestamp is before `cutoff_ms`. The run stops at the first newer
    /// entry so the survivors always form an unbroken suffix of the chain.
    /// The checkpoint is written before anything is deleted; an interrupted
    /// sweep leaves only entries that verification already skips.
    pub async fn delete_older_than(&self, cutoff_ms: u64) -> Result<RetentionReport> {
        let mut guard = self.index.lock().await;
        // Rebuilt on next use, also when the sweep fails part way.
        *guard = None;
        let previous = self.checkpoint().await?;
        let entries = self.load_entries().await?;

        let stale_below = previous.as_ref().map_or(0, |c| c.anchor_sequence);
        let (stale, live): (Vec<_>, Vec<_>) =
            entries.into_iter().partition(|e| e.sequence <= stale_below);
        for entry in &stale {
            self.storage.remove(&entry_key(entry.sequence)).await?;
        }

        let expired: Vec<&AuditLogEntry> =
            live.iter().take_while(|e| e.timestamp < cutoff_ms).collect();
        let Some(last) = expired.last() else {
            return Ok(RetentionReport {
                removed: 0,
                checkpoint: previous,
            });
        };

        let checkpoint = ChainCheckpoint {
            anchor_sequence: last.sequence,
            anchor_hash: last.entry_hash,
            swept_at: self.clock.physical_time_ms(),
            entries_removed: previous.as_ref().map_or(0, |c| c.entries_removed)
                + expired.len() as u64,
        };
        self.storage
            .store(CHECKPOINT_KEY, serde_json::to_vec(&checkpoint)?)
            .await?;
        for entry in &expired {
            self.storage.remove(&entry_key(entry.sequence)).await?;
        }

        info!(
            removed = expired.len(),
            anchor_sequence = checkpoint.anchor_sequence,
            "audit retention sweep complete"
        );
        Ok(RetentionReport {
            removed: expired.len(),
            checkpoint: Some(checkpoint),
        })
    }

    /// Replay the stored chain from its anchor.
    pub async fn verify_chain(&self) -> Result<ChainVerification> {
        let checkpoint = self.checkpoint().await?;
        let entries = self.load_entries().await?;
        let verification = verify_entries(checkpoint.as_ref(), &entries);
        if let Some((sequence, reason)) = &verification.first_break {
            warn!(sequence, ?reason, "audit chain broken");
        }
        Ok(verification)
    }
}
