//! Column layout of listing records.
//!
//! Listing records are `|`-delimited with a fixed, undocumented column order
//! that the service changes from time to time. The layout lives here as a
//! table so that a protocol change is a data change: either edit
//! [`RecordSchema::default`] or supply a schema in the configuration file.

use std::collections::HashSet;
use std::fmt;

use serde::Deserialize;

use crate::domain::SeatClass;

/// Error in a record schema definition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    /// Two fields claim the same column
    #[error("column {0} is mapped more than once")]
    DuplicateIndex(usize),

    /// The same field appears twice
    #[error("field {0} is mapped more than once")]
    DuplicateField(Field),

    /// The schema cannot identify trains
    #[error("schema must map train_code")]
    MissingTrainCode,
}

/// A named column of a listing record.
///
/// The field also selects the decoder: text columns are kept verbatim,
/// station columns are resolved against the station map, time columns are
/// parsed as `HH:MM`, and seat columns go through the seat count decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum Field {
    TrainNo,
    TrainCode,
    StartStation,
    EndStation,
    FromStation,
    ToStation,
    DepartureTime,
    ArrivalTime,
    Duration,
    CanWebBuy,
    Seat(SeatClass),
}

impl Field {
    /// Parse a field from its schema name, e.g. `"train_code"` or
    /// `"seat.hard_sleep"`.
    pub fn parse(name: &str) -> Option<Self> {
        if let Some(key) = name.strip_prefix("seat.") {
            return SeatClass::from_key(key).map(Field::Seat);
        }
        let field = match name {
            "train_no" => Field::TrainNo,
            "train_code" => Field::TrainCode,
            "start_station" => Field::StartStation,
            "end_station" => Field::EndStation,
            "from_station" => Field::FromStation,
            "to_station" => Field::ToStation,
            "departure_time" => Field::DepartureTime,
            "arrival_time" => Field::ArrivalTime,
            "duration" => Field::Duration,
            "can_web_buy" => Field::CanWebBuy,
            _ => return None,
        };
        Some(field)
    }
}

impl TryFrom<String> for Field {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Field::parse(&value).ok_or_else(|| format!("unknown listing field: {value}"))
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Field::TrainNo => "train_no",
            Field::TrainCode => "train_code",
            Field::StartStation => "start_station",
            Field::EndStation => "end_station",
            Field::FromStation => "from_station",
            Field::ToStation => "to_station",
            Field::DepartureTime => "departure_time",
            Field::ArrivalTime => "arrival_time",
            Field::Duration => "duration",
            Field::CanWebBuy => "can_web_buy",
            Field::Seat(class) => return write!(f, "seat.{}", class.key()),
        };
        f.write_str(name)
    }
}

/// One column mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct FieldSpec {
    /// Zero-based column index.
    pub index: usize,
    /// What the column holds.
    pub field: Field,
}

/// Versioned mapping from column index to field.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RecordSchema {
    /// Free-form label for the layout, logged at startup.
    pub version: String,
    /// Column mappings.
    pub fields: Vec<FieldSpec>,
}

/// The layout published by the service at the time of writing.
const CURRENT_LAYOUT: &[(usize, Field)] = &[
    (2, Field::TrainNo),
    (3, Field::TrainCode),
    (4, Field::StartStation),
    (5, Field::EndStation),
    (6, Field::FromStation),
    (7, Field::ToStation),
    (8, Field::DepartureTime),
    (9, Field::ArrivalTime),
    (10, Field::Duration),
    (11, Field::CanWebBuy),
    (21, Field::Seat(SeatClass::AdvancedSoftSleep)),
    (23, Field::Seat(SeatClass::SoftSleep)),
    (26, Field::Seat(SeatClass::NoSeat)),
    (27, Field::Seat(SeatClass::SoftSeat)),
    (28, Field::Seat(SeatClass::HardSleep)),
    (29, Field::Seat(SeatClass::HardSeat)),
    (30, Field::Seat(SeatClass::Second)),
    (31, Field::Seat(SeatClass::First)),
    (32, Field::Seat(SeatClass::Business)),
];

impl RecordSchema {
    /// Check that the schema is usable.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let mut indices = HashSet::new();
        let mut fields = HashSet::new();

        for spec in &self.fields {
            if !indices.insert(spec.index) {
                return Err(SchemaError::DuplicateIndex(spec.index));
            }
            if !fields.insert(spec.field) {
                return Err(SchemaError::DuplicateField(spec.field));
            }
        }

        if !fields.contains(&Field::TrainCode) {
            return Err(SchemaError::MissingTrainCode);
        }

        Ok(())
    }

    /// Number of columns a record needs for every mapped field to be present.
    pub fn expected_len(&self) -> usize {
        self.fields.iter().map(|s| s.index + 1).max().unwrap_or(0)
    }
}

impl Default for RecordSchema {
    fn default() -> Self {
        Self {
            version: "left-ticket-2024".to_string(),
            fields: CURRENT_LAYOUT
                .iter()
                .map(|&(index, field)| FieldSpec { index, field })
                .collect(),
        }
    }
}
