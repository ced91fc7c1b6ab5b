//! Normalized train listing records.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;

use super::seat::{SeatClass, SeatCount};
use super::station::StationRef;

/// One train as listed for a (route, date) query.
///
/// Every column is optional because listing records may be shorter than the
/// schema expects. Seat classes that are absent from `seats` have no seats.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrainRecord {
    /// Internal train number (e.g. "240000G1010C").
    pub train_no: Option<String>,

    /// Public train code (e.g. "G101", "K1").
    pub train_code: Option<String>,

    /// Where the train starts its whole run.
    pub start_station: Option<StationRef>,

    /// Where the train ends its whole run.
    pub end_station: Option<StationRef>,

    /// Boarding station for this query.
    pub from_station: Option<StationRef>,

    /// Alighting station for this query.
    pub to_station: Option<StationRef>,

    /// Departure from `from_station`.
    pub departure: Option<NaiveDateTime>,

    /// Arrival at `to_station`.
    pub arrival: Option<NaiveDateTime>,

    /// Journey duration as published ("HH:MM").
    pub duration: Option<String>,

    /// Whether the service allows booking online ("Y"/"N"/"IS_TIME_NOT_BUY").
    pub can_web_buy: Option<String>,

    /// Available seats per class.
    pub seats: BTreeMap<SeatClass, SeatCount>,
}

impl TrainRecord {
    /// Seats available in a class, zero if the class is not listed.
    pub fn seat(&self, class: SeatClass) -> SeatCount {
        self.seats.get(&class).copied().unwrap_or_default()
    }

    /// The train code, if present.
    pub fn code(&self) -> Option<&str> {
        self.train_code.as_deref()
    }

    /// Whether any seat class has availability.
    pub fn has_any_seats(&self) -> bool {
        self.seats.values().any(|c| c.is_positive())
    }

    /// Whether the service marks this train as bookable online.
    pub fn is_bookable(&self) -> bool {
        self.can_web_buy.as_deref() == Some("Y")
    }
}
