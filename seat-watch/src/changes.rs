//! Change detection between successive snapshots.
//!
//! Compares seat counts train by train and class by class, and produces one
//! [`ChangeEvent`] for every seat class whose availability moved.

use std::fmt;

use crate::domain::{SeatClass, SeatCount, Snapshot};

/// A seat availability transition for one train and seat class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// Seats appeared where there were none.
    ///
    /// `previous` is `None` on the first snapshot of a session.
    NewAvailability {
        train_code: String,
        seat_class: SeatClass,
        previous: Option<SeatCount>,
        current: SeatCount,
    },
    /// The last seats went.
    SoldOut {
        train_code: String,
        seat_class: SeatClass,
        previous: SeatCount,
    },
    /// Still available, but a different amount.
    CountChanged {
        train_code: String,
        seat_class: SeatClass,
        previous: SeatCount,
        current: SeatCount,
    },
}

impl ChangeEvent {
    pub fn train_code(&self) -> &str {
        match self {
            ChangeEvent::NewAvailability { train_code, .. }
            | ChangeEvent::SoldOut { train_code, .. }
            | ChangeEvent::CountChanged { train_code, .. } => train_code,
        }
    }

    pub fn seat_class(&self) -> SeatClass {
        match self {
            ChangeEvent::NewAvailability { seat_class, .. }
            | ChangeEvent::SoldOut { seat_class, .. }
            | ChangeEvent::CountChanged { seat_class, .. } => *seat_class,
        }
    }

    /// Count after the transition.
    pub fn current(&self) -> SeatCount {
        match self {
            ChangeEvent::NewAvailability { current, .. }
            | ChangeEvent::CountChanged { current, .. } => *current,
            ChangeEvent::SoldOut { .. } => SeatCount::ZERO,
        }
    }

    /// Count before the transition, if known.
    pub fn previous(&self) -> Option<SeatCount> {
        match self {
            ChangeEvent::NewAvailability { previous, .. } => *previous,
            ChangeEvent::SoldOut { previous, .. } | ChangeEvent::CountChanged { previous, .. } => {
                Some(*previous)
            }
        }
    }

    pub fn is_new_availability(&self) -> bool {
        matches!(self, ChangeEvent::NewAvailability { .. })
    }
}

impl fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeEvent::NewAvailability {
                train_code,
                seat_class,
                current,
                ..
            } => write!(f, "{train_code} {seat_class}: now available ({current})"),
            ChangeEvent::SoldOut {
                train_code,
                seat_class,
                previous,
            } => write!(f, "{train_code} {seat_class}: sold out (was {previous})"),
            ChangeEvent::CountChanged {
                train_code,
                seat_class,
                previous,
                current,
            } => write!(f, "{train_code} {seat_class}: {previous} -> {current}"),
        }
    }
}

/// Compare `current` against the previous snapshot.
///
/// Trains are visited in `current` order and seat classes in canonical
/// order. A train missing from `previous` counts as having had no seats;
/// trains that disappeared from `current` produce nothing. With no previous
/// snapshot, every available seat class is reported as new.
pub fn diff(current: &Snapshot, previous: Option<&Snapshot>) -> Vec<ChangeEvent> {
    let mut events = Vec::new();

    for record in current.iter() {
        let Some(code) = record.code() else {
            continue;
        };
        let before = previous.map(|p| p.get(code));

        for class in SeatClass::ALL {
            let now = record.seat(class);

            let Some(before) = before else {
                if now.is_positive() {
                    events.push(ChangeEvent::NewAvailability {
                        train_code: code.to_string(),
                        seat_class: class,
                        previous: None,
                        current: now,
                    });
                }
                continue;
            };

            let was = before.map(|r| r.seat(class)).unwrap_or(SeatCount::ZERO);
            if let Some(event) = transition(code, class, was, now) {
                events.push(event);
            }
        }
    }

    events
}

fn transition(code: &str, class: SeatClass, was: SeatCount, now: SeatCount) -> Option<ChangeEvent> {
    if was == now {
        return None;
    }
    let train_code = code.to_string();
    let event = match (was.is_positive(), now.is_positive()) {
        (false, true) => ChangeEvent::NewAvailability {
            train_code,
            seat_class: class,
            previous: Some(was),
            current: now,
        },
        (true, false) => ChangeEvent::SoldOut {
            train_code,
            seat_class: class,
            previous: was,
        },
        (true, true) => ChangeEvent::CountChanged {
            train_code,
            seat_class: class,
            previous: was,
            current: now,
        },
        (false, false) => return None,
    };
    Some(event)
}

/// Per-kind counts of a cycle's events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeSummary {
    pub new_availability: usize,
    pub sold_out: usize,
    pub count_changed: usize,
}

impl ChangeSummary {
    pub fn of(events: &[ChangeEvent]) -> Self {
        let mut summary = Self::default();
        for event in events {
            match event {
                ChangeEvent::NewAvailability { .. } => summary.new_availability += 1,
                ChangeEvent::SoldOut { .. } => summary.sold_out += 1,
                ChangeEvent::CountChanged { .. } => summary.count_changed += 1,
            }
        }
        summary
    }

    pub fn has_new_availability(&self) -> bool {
        self.new_availability > 0
    }

    pub fn total(&self) -> usize {
        self.new_availability + self.sold_out + self.count_changed
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

impl fmt::Display for ChangeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} new, {} sold out, {} changed",
            self.new_availability, self.sold_out, self.count_changed
        )
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::domain::TrainRecord;
    use chrono::Local;
    use proptest::prelude::*;

    fn seat_count() -> impl Strategy<Value = SeatCount> {
        prop_oneof![
            (0u32..30).prop_map(SeatCount::Count),
            Just(SeatCount::Plentiful),
        ]
    }

    fn record() -> impl Strategy<Value = TrainRecord> {
        (
            "[GDKTZ][0-9]{1,4}",
            prop::collection::btree_map(prop::sample::select(SeatClass::ALL.to_vec()), seat_count(), 0..9),
        )
            .prop_map(|(code, seats)| TrainRecord {
                train_code: Some(code),
                seats,
                ..Default::default()
            })
    }

    fn snapshot() -> impl Strategy<Value = Snapshot> {
        prop::collection::vec(record(), 0..12)
            .prop_map(|records| Snapshot::from_records(Local::now(), records))
    }

    proptest! {
        /// Diffing against an identical copy yields nothing.
        #[test]
        fn diff_is_idempotent(snap in snapshot()) {
            let copy = snap.clone();
            prop_assert!(diff(&snap, Some(&copy)).is_empty());
        }

        /// Every event reflects a real difference, and the event kind
        /// matches the direction of the change.
        #[test]
        fn events_match_counts(current in snapshot(), previous in snapshot()) {
            for event in diff(&current, Some(&previous)) {
                let now = current.get(event.train_code()).unwrap().seat(event.seat_class());
                let was = previous
                    .get(event.train_code())
                    .map(|r| r.seat(event.seat_class()))
                    .unwrap_or(SeatCount::ZERO);

                prop_assert_ne!(now, was);
                prop_assert_eq!(event.current(), now);
                prop_assert_eq!(event.previous(), Some(was));
                match event {
                    ChangeEvent::NewAvailability { .. } => prop_assert!(!was.is_positive() && now.is_positive()),
                    ChangeEvent::SoldOut { .. } => prop_assert!(was.is_positive() && !now.is_positive()),
                    ChangeEvent::CountChanged { .. } => prop_assert!(was.is_positive() && now.is_positive()),
                }
            }
        }
    }
}
