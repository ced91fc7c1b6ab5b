//! Which trains are worth ordering.

use crate::domain::{SeatClass, Snapshot, TrainRecord};

/// Caller-supplied order filter.
///
/// Empty lists match everything: no train codes means any train, no seat
/// classes means any class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderCriteria {
    /// Train codes to order, e.g. `["G1", "K511"]`.
    pub train_codes: Vec<String>,
    /// Seat classes to order, in preference order.
    pub seat_classes: Vec<SeatClass>,
    /// Fewest seats a class must show to count.
    pub min_available: u32,
}

impl OrderCriteria {
    pub fn with_train_codes(mut self, codes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.train_codes = codes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_seat_classes(mut self, classes: impl IntoIterator<Item = SeatClass>) -> Self {
        self.seat_classes = classes.into_iter().collect();
        self
    }

    pub fn with_min_available(mut self, min: u32) -> Self {
        self.min_available = min;
        self
    }

    /// Seat classes of `record` that meet the minimum, in preference order.
    pub fn matching_classes(&self, record: &TrainRecord) -> Vec<SeatClass> {
        let wanted: &[SeatClass] = if self.seat_classes.is_empty() {
            &SeatClass::ALL
        } else {
            &self.seat_classes
        };
        wanted
            .iter()
            .copied()
            .filter(|&class| record.seat(class).at_least(self.min_available))
            .collect()
    }

    /// Whether `record` is a train we want with enough seats.
    pub fn matches(&self, record: &TrainRecord) -> bool {
        let code_ok = self.train_codes.is_empty()
            || record
                .code()
                .is_some_and(|code| self.train_codes.iter().any(|c| c == code));
        code_ok && !self.matching_classes(record).is_empty()
    }

    /// Matching trains of a snapshot, in snapshot order.
    pub fn filter<'a>(&self, snapshot: &'a Snapshot) -> Vec<&'a TrainRecord> {
        snapshot.iter().filter(|r| self.matches(r)).collect()
    }
}

impl Default for OrderCriteria {
    fn default() -> Self {
        Self {
            train_codes: Vec::new(),
            seat_classes: Vec::new(),
            min_available: 1,
        }
    }
}
