//! Bounded per-target operation journal
//!
//! Targets are referred to by an opaque `TargetId` handed out by the host,
//! never by owning references, so a journal can never keep a node alive.
//! The host reports node disposal through [`OperationJournal::release`],
//! which drops that target's journal.
//!
//! Each target holds a FIFO ring of at most `capacity` records: inserting
//! past capacity evicts exactly the single oldest record.

use crate::operation::OperationRecord;
use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Identity of an observed tree node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(pub u64);

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Journal statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JournalStats {
    pub targets: usize,
    pub records: usize,
    pub total_recorded: u64,
    pub total_evicted: u64,
    pub total_dropped: u64,
}

#[derive(Debug)]
pub struct OperationJournal {
    capacity: usize,
    entries: FnvHashMap<TargetId, VecDeque<OperationRecord>>,
    total_recorded: u64,
    total_evicted: u64,
    total_dropped: u64,
}

impl OperationJournal {
    /// # Panics
    ///
    /// Panics if capacity is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Journal capacity must be > 0");
        Self {
            capacity,
            entries: FnvHashMap::default(),
            total_recorded: 0,
            total_evicted: 0,
            total_dropped: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Change the per-target capacity, trimming the oldest records if needed
    pub fn set_capacity(&mut self, capacity: usize) {
        let capacity = capacity.max(1);
        self.capacity = capacity;
        for ring in self.entries.values_mut() {
            while ring.len() > capacity {
                ring.pop_front();
                self.total_evicted += 1;
            }
        }
    }

    /// Append a record for `target`
    ///
    /// No-op when there is no target or the record has no call site.
    /// Returns whether the record was stored.
    pub fn record(&mut self, target: Option<TargetId>, record: OperationRecord) -> bool {
        let Some(target) = target else {
            self.total_dropped += 1;
            return false;
        };
        if record.call_site.is_none() {
            tracing::trace!(%target, kind = %record.kind, "dropping record without call site");
            self.total_dropped += 1;
            return false;
        }

        let ring = self
            .entries
            .entry(target)
            .or_insert_with(|| VecDeque::with_capacity(self.capacity.min(32)));
        ring.push_back(record);
        self.total_recorded += 1;
        if ring.len() > self.capacity {
            ring.pop_front();
            self.total_evicted += 1;
        }
        true
    }

    /// Records for `target` with `timestamp >= since_ms`, oldest first
    pub fn query(&self, target: TargetId, since_ms: f64) -> Vec<&OperationRecord> {
        match self.entries.get(&target) {
            // Direct callers may record out of timestamp order.
            Some(ring) => ring.iter().filter(|r| r.timestamp >= since_ms).collect(),
            None => Vec::new(),
        }
    }

    /// Every retained record for `target`, oldest first
    pub fn dump(&self, target: TargetId) -> Vec<&OperationRecord> {
        self.entries
            .get(&target)
            .map(|ring| ring.iter().collect())
            .unwrap_or_default()
    }

    pub fn len(&self, target: TargetId) -> usize {
        self.entries.get(&target).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Lifecycle notification: the host disposed of `target`
    pub fn release(&mut self, target: TargetId) -> bool {
        self.entries.remove(&target).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> JournalStats {
        JournalStats {
            targets: self.entries.len(),
            records: self.entries.values().map(VecDeque::len).sum(),
            total_recorded: self.total_recorded,
            total_evicted: self.total_evicted,
            total_dropped: self.total_dropped,
        }
    }
}
