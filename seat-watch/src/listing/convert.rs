//! Conversion from listing records to domain types.
//!
//! Records are decoded column by column through a [`RecordSchema`]. Missing
//! columns become `None`; a malformed record is skipped without failing the
//! rest of the listing.

use std::collections::BTreeMap;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use tracing::{debug, warn};

use crate::domain::{SeatCountDecoder, Snapshot, StationNames, TrainRecord};

use super::schema::{Field, RecordSchema};
use super::types::ListingResponse;

/// Column delimiter of listing records.
const DELIMITER: char = '|';

/// Error while decoding one listing record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    /// The record has no content at all
    #[error("empty record")]
    Empty,
}

/// Decodes listing records according to a schema.
#[derive(Debug, Clone, Default)]
pub struct RecordParser {
    schema: RecordSchema,
    decoder: SeatCountDecoder,
}

impl RecordParser {
    /// Create a parser for a schema and seat count decoder.
    pub fn new(schema: RecordSchema, decoder: SeatCountDecoder) -> Self {
        Self { schema, decoder }
    }

    /// The schema in use.
    pub fn schema(&self) -> &RecordSchema {
        &self.schema
    }

    /// Decode a single raw record.
    ///
    /// `travel_date` anchors the departure and arrival times.
    pub fn parse_record(
        &self,
        raw: &str,
        stations: &StationNames,
        travel_date: NaiveDate,
    ) -> Result<TrainRecord, RecordError> {
        if raw.trim().is_empty() {
            return Err(RecordError::Empty);
        }

        let columns: Vec<&str> = raw.split(DELIMITER).collect();
        let column = |index: usize| {
            columns
                .get(index)
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
        };

        let mut record = TrainRecord::default();
        let mut seats = BTreeMap::new();
        let mut departure_time = None;
        let mut arrival_time = None;

        for spec in &self.schema.fields {
            match (spec.field, column(spec.index)) {
                // A missing seat column means no seats, not an unknown count.
                (Field::Seat(class), value) => {
                    seats.insert(class, self.decoder.decode(value.unwrap_or("")));
                }
                (_, None) => {}
                (Field::TrainNo, Some(v)) => record.train_no = Some(v.to_string()),
                (Field::TrainCode, Some(v)) => record.train_code = Some(v.to_string()),
                (Field::StartStation, Some(v)) => record.start_station = Some(stations.resolve(v)),
                (Field::EndStation, Some(v)) => record.end_station = Some(stations.resolve(v)),
                (Field::FromStation, Some(v)) => record.from_station = Some(stations.resolve(v)),
                (Field::ToStation, Some(v)) => record.to_station = Some(stations.resolve(v)),
                (Field::DepartureTime, Some(v)) => departure_time = parse_hhmm(v),
                (Field::ArrivalTime, Some(v)) => arrival_time = parse_hhmm(v),
                (Field::Duration, Some(v)) => record.duration = Some(v.to_string()),
                (Field::CanWebBuy, Some(v)) => record.can_web_buy = Some(v.to_string()),
            }
        }

        record.seats = seats;
        record.departure = departure_time.map(|t| travel_date.and_time(t));
        record.arrival = arrival_timestamp(
            record.departure,
            arrival_time,
            record.duration.as_deref(),
            travel_date,
        );

        Ok(record)
    }

    /// Decode a whole listing response into a snapshot.
    ///
    /// Undecodable records, records without a train code and repeated train
    /// codes are logged and skipped.
    pub fn parse_listing(
        &self,
        response: &ListingResponse,
        travel_date: NaiveDate,
        captured_at: DateTime<Local>,
    ) -> Snapshot {
        let stations: StationNames = response
            .data
            .as_ref()
            .map(|d| d.map.clone().into_iter().collect())
            .unwrap_or_default();

        let mut snapshot = Snapshot::new(captured_at);

        for (position, raw) in response.records().iter().enumerate() {
            let record = match self.parse_record(raw, &stations, travel_date) {
                Ok(record) => record,
                Err(e) => {
                    debug!(position, error = %e, "skipping listing record");
                    continue;
                }
            };

            if record.train_code.is_none() {
                warn!(position, "skipping listing record without a train code");
                continue;
            }

            let code = record.train_code.clone().unwrap_or_default();
            if !snapshot.push(record) {
                warn!(position, train_code = %code, "skipping duplicate train code");
            }
        }

        snapshot
    }
}

/// Parse an "HH:MM" time of day.
fn parse_hhmm(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M").ok()
}

/// Parse an "HH:MM" duration, where hours may exceed 23.
fn parse_duration(s: &str) -> Option<TimeDelta> {
    let (hours, minutes) = s.split_once(':')?;
    let hours: i64 = hours.parse().ok()?;
    let minutes: i64 = minutes.parse().ok()?;
    if hours < 0 || !(0..60).contains(&minutes) {
        return None;
    }
    TimeDelta::try_hours(hours)?.checked_add(&TimeDelta::try_minutes(minutes)?)
}

/// Work out the arrival timestamp.
///
/// Prefers departure + duration; otherwise places the arrival time on the
/// travel date, rolling over to the next day when it precedes departure.
fn arrival_timestamp(
    departure: Option<NaiveDateTime>,
    arrival_time: Option<NaiveTime>,
    duration: Option<&str>,
    travel_date: NaiveDate,
) -> Option<NaiveDateTime> {
    let by_duration = departure
        .zip(duration.and_then(parse_duration))
        .and_then(|(dep, duration)| dep.checked_add_signed(duration));
    if by_duration.is_some() {
        return by_duration;
    }

    let arrival = travel_date.and_time(arrival_time?);
    match departure {
        Some(dep) if arrival < dep => arrival.checked_add_signed(TimeDelta::days(1)),
        _ => Some(arrival),
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Records of any length never fail to parse unless blank
        #[test]
        fn truncated_records_parse(columns in proptest::collection::vec("[A-Za-z0-9:]{0,6}", 1..40)) {
            let raw = columns.join("|");
            prop_assume!(!raw.trim().is_empty());
            let parser = RecordParser::default();
            let date = NaiveDate::from_ymd_opt(2026, 1, 20).unwrap();
            prop_assert!(parser.parse_record(&raw, &StationNames::default(), date).is_ok());
        }
    }
}
