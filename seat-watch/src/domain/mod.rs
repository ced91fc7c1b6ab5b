//! Domain types for seat availability monitoring.
//!
//! These types represent listing data after it has been decoded from the
//! service's wire format. Snapshots and records are rebuilt every poll
//! cycle; nothing here talks to the network.

mod seat;
mod snapshot;
mod station;
mod train;

pub use seat::{SeatClass, SeatCount, SeatCountDecoder, SeatLabels};
pub use snapshot::Snapshot;
pub use station::{InvalidStationCode, StationCode, StationNames, StationRef};
pub use train::TrainRecord;
