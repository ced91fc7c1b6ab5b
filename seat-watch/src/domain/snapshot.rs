//! The set of trains observed by one poll cycle.

use std::collections::HashMap;

use chrono::{DateTime, Local};

use super::train::TrainRecord;

/// Ordered train records captured by one poll cycle.
///
/// Records are keyed by train code. Insertion order is preserved so that
/// anything iterating a snapshot (the change detector in particular) is
/// deterministic.
#[derive(Debug, Clone)]
pub struct Snapshot {
    captured_at: DateTime<Local>,
    records: Vec<TrainRecord>,
    index: HashMap<String, usize>,
}

impl Snapshot {
    /// Create an empty snapshot.
    pub fn new(captured_at: DateTime<Local>) -> Self {
        Self {
            captured_at,
            records: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Build a snapshot from records, in order.
    ///
    /// Records rejected by [`Snapshot::push`] are dropped.
    pub fn from_records(
        captured_at: DateTime<Local>,
        records: impl IntoIterator<Item = TrainRecord>,
    ) -> Self {
        let mut snapshot = Self::new(captured_at);
        for record in records {
            snapshot.push(record);
        }
        snapshot
    }

    /// Append a record.
    ///
    /// Returns `false` (and drops the record) when it has no train code or
    /// its code is already present; the first record for a code wins.
    pub fn push(&mut self, record: TrainRecord) -> bool {
        let Some(code) = record.train_code.clone() else {
            return false;
        };
        if self.index.contains_key(&code) {
            return false;
        }
        self.index.insert(code, self.records.len());
        self.records.push(record);
        true
    }

    /// Look up a train by code.
    pub fn get(&self, train_code: &str) -> Option<&TrainRecord> {
        self.index.get(train_code).map(|&i| &self.records[i])
    }

    /// Iterate records in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &TrainRecord> {
        self.records.iter()
    }

    /// Records in insertion order.
    pub fn records(&self) -> &[TrainRecord] {
        &self.records
    }

    /// When the snapshot was captured.
    pub fn captured_at(&self) -> DateTime<Local> {
        self.captured_at
    }

    /// Number of trains.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no trains were captured.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
