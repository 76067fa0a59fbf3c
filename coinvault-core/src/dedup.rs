//! Same-batch deduplication with a deterministic last-arrival-wins policy.
//!
//! Operates purely within one batch: a duplicate against an already-committed
//! archive record is the validator's concern, not handled here.

use crate::domain::{AssetRecord, RecordKey};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A key that appeared more than once in the batch, with the position of
/// the arrival that was dropped in favor of a later one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedDuplicate {
    pub key: RecordKey,
    pub dropped_index: usize,
}

/// Result of deduplicating one batch.
#[derive(Debug, Clone)]
pub struct DedupOutcome {
    /// At most one record per key, in first-arrival key order.
    pub records: Vec<AssetRecord>,
    /// Every superseded arrival, in arrival order.
    pub dropped: Vec<DroppedDuplicate>,
}

/// Deduplicate a batch: last arrival wins per `(asset_id, date)` key.
///
/// Output order is the order in which each key was first seen, so the
/// result is deterministic for a given input sequence.
pub fn dedup_last_wins(records: Vec<AssetRecord>) -> DedupOutcome {
    let mut slot_for_key: HashMap<RecordKey, usize> = HashMap::with_capacity(records.len());
    let mut kept: Vec<AssetRecord> = Vec::with_capacity(records.len());
    let mut dropped: Vec<DroppedDuplicate> = Vec::new();
    let mut index_of_slot: Vec<usize> = Vec::with_capacity(records.len());

    for (index, record) in records.into_iter().enumerate() {
        let key = record.key();
        match slot_for_key.get(&key) {
            Some(&slot) => {
                dropped.push(DroppedDuplicate {
                    key,
                    dropped_index: index_of_slot[slot],
                });
                kept[slot] = record;
                index_of_slot[slot] = index;
            }
            None => {
                slot_for_key.insert(key, kept.len());
                index_of_slot.push(index);
                kept.push(record);
            }
        }
    }

    DedupOutcome {
        records: kept,
        dropped,
    }
}
