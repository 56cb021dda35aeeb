//! Reply bookkeeping: which inbound message already produced which reply.
//!
//! Only the `hot` window (the most recent `HOT_WINDOW` replies) is indexed.
//! Older records move to the `cold` list, which is kept for the record but
//! never consulted by lookups.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::constants::HOT_WINDOW;

/// One posted reply and the message it answered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyRecord {
    pub id: String,
    pub parent_id: String,
    pub parent_author: String,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub richtext: bool,
}

impl ReplyRecord {
    pub fn new(id: &str, parent_id: &str, parent_author: &str) -> Self {
        Self {
            id: id.to_string(),
            parent_id: parent_id.to_string(),
            parent_author: parent_author.to_string(),
            deleted: false,
            richtext: false,
        }
    }
}

/// Order reply ids as base-36 numbers: a longer id is newer.
pub fn compare_reply_ids(a: &str, b: &str) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Serialized form: `comments` is the hot window, `comments_old` the overflow.
/// Both are most-recent-first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    #[serde(default)]
    pub comments: Vec<ReplyRecord>,
    #[serde(default)]
    pub comments_old: Vec<ReplyRecord>,
}

#[derive(Debug, Clone)]
pub struct ReplyLedger {
    hot: HashMap<String, ReplyRecord>,
    cold: Vec<ReplyRecord>,
    hot_capacity: usize,
}

impl Default for ReplyLedger {
    fn default() -> Self {
        Self::new(HOT_WINDOW)
    }
}

impl ReplyLedger {
    pub fn new(hot_capacity: usize) -> Self {
        Self {
            hot: HashMap::new(),
            cold: Vec::new(),
            hot_capacity: hot_capacity.max(1),
        }
    }

    /// Rebuild from a snapshot. Anything past the hot capacity is demoted.
    pub fn from_snapshot(snapshot: LedgerSnapshot, hot_capacity: usize) -> Self {
        let mut ledger = Self::new(hot_capacity);
        ledger.cold = snapshot.comments_old;
        for record in snapshot.comments {
            ledger.insert(record);
        }
        ledger.compact();
        ledger
    }

    /// The non-deleted record answering `parent_id`, if still in the hot window.
    pub fn find_active(&self, parent_id: &str) -> Option<&ReplyRecord> {
        self.hot.get(parent_id).filter(|r| !r.deleted)
    }

    /// Add a record. A record already held for the same parent is demoted to cold.
    pub fn insert(&mut self, record: ReplyRecord) {
        if let Some(previous) = self.hot.insert(record.parent_id.clone(), record) {
            self.cold.insert(0, previous);
        }
    }

    /// Flag the active record for `parent_id` as deleted.
    /// Returns false if there was none.
    pub fn mark_deleted(&mut self, parent_id: &str) -> bool {
        match self.hot.get_mut(parent_id) {
            Some(record) if !record.deleted => {
                record.deleted = true;
                true
            }
            _ => false,
        }
    }

    /// Demote everything past the newest `hot_capacity` records to the front
    /// of the cold list.
    pub fn compact(&mut self) {
        if self.hot.len() <= self.hot_capacity {
            return;
        }
        let ordered = self.hot_records();
        let overflow: Vec<ReplyRecord> = ordered[self.hot_capacity..]
            .iter()
            .map(|r| (*r).clone())
            .collect();
        for record in &overflow {
            self.hot.remove(&record.parent_id);
        }
        self.cold.splice(0..0, overflow);
    }

    /// Hot records, most recent first.
    pub fn hot_records(&self) -> Vec<&ReplyRecord> {
        let mut records: Vec<&ReplyRecord> = self.hot.values().collect();
        records.sort_by(|a, b| compare_reply_ids(&b.id, &a.id));
        records
    }

    pub fn cold_records(&self) -> &[ReplyRecord] {
        &self.cold
    }

    /// Compact, then capture the full hot + cold state.
    pub fn snapshot(&mut self) -> LedgerSnapshot {
        self.compact();
        LedgerSnapshot {
            comments: self.hot_records().into_iter().cloned().collect(),
            comments_old: self.cold.clone(),
        }
    }

    pub fn hot_len(&self) -> usize {
        self.hot.len()
    }

    pub fn active_len(&self) -> usize {
        self.hot.values().filter(|r| !r.deleted).count()
    }

    pub fn hot_capacity(&self) -> usize {
        self.hot_capacity
    }
}
