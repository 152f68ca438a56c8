//! Chain replay and checkpoints.

use keygate_core::Hash32;
use serde::{Deserialize, Serialize};

use crate::entry::{compute_entry_hash, AuditLogEntry, GENESIS_HASH};

/// Anchor left behind by a retention sweep.
///
/// Entries up to and including `anchor_sequence` have been deleted; the
/// first surviving entry chains from `anchor_hash` instead of genesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainCheckpoint {
    pub anchor_sequence: u64,
    pub anchor_hash: Hash32,
    /// Wall-clock milliseconds of the sweep that produced this anchor
    pub swept_at: u64,
    /// Entries removed by all sweeps so far
    pub entries_removed: u64,
}

/// Why verification stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainBreak {
    /// The stored hash differs from the recomputed one
    HashMismatch { expected: Hash32, stored: Hash32 },
    /// Sequence numbers are not contiguous
    MissingEntry { expected_sequence: u64 },
}

/// Result of replaying the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainVerification {
    /// Hash the replay started from
    pub anchor: Hash32,
    /// Entries whose hash was reproduced
    pub entries_verified: usize,
    /// Sequence of the first entry that failed, with the reason
    pub first_break: Option<(u64, ChainBreak)>,
}

impl ChainVerification {
    /// Whether every entry verified.
    pub fn is_intact(&self) -> bool {
        self.first_break.is_none()
    }
}

/// Replay `entries` (ascending sequence) from the checkpoint, or genesis.
///
/// Entries at or below the checkpoint's anchor are skipped: they are the
/// leftovers of an interrupted sweep. The replay chains on recomputed
/// hashes, so an edited entry also invalidates everything after it.
pub fn verify_entries(
    checkpoint: Option<&ChainCheckpoint>,
    entries: &[AuditLogEntry],
) -> ChainVerification {
    let (anchor, anchor_sequence) = checkpoint
        .map(|c| (c.anchor_hash, c.anchor_sequence))
        .unwrap_or((GENESIS_HASH, 0));

    let mut previous = anchor;
    let mut expected_sequence = anchor_sequence + 1;
    let mut verified = 0;

    for entry in entries.iter().filter(|e| e.sequence > anchor_sequence) {
        if entry.sequence != expected_sequence {
            return ChainVerification {
                anchor,
                entries_verified: verified,
                first_break: Some((
                    expected_sequence,
                    ChainBreak::MissingEntry { expected_sequence },
                )),
            };
        }
        let recomputed = compute_entry_hash(&previous, entry);
        if recomputed != entry.entry_hash {
            return ChainVerification {
                anchor,
                entries_verified: verified,
                first_break: Some((
                    entry.sequence,
                    ChainBreak::HashMismatch {
                        expected: recomputed,
                        stored: entry.entry_hash,
                    },
                )),
            };
        }
        previous = recomputed;
        expected_sequence += 1;
        verified += 1;
    }

    ChainVerification {
        anchor,
        entries_verified: verified,
        first_break: None,
    }
}
