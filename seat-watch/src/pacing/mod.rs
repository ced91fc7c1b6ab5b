//! Request pacing and ban avoidance.
//!
//! [`PacingController`] decides how long the poll loop waits between
//! queries, backs off when queries keep failing, and stops polling while the
//! service appears to have banned us or the daily quota is spent.

mod clock;
mod config;
mod controller;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BanIndicators, PacingConfig};
pub use controller::{
    Failure, FailureKind, PacingController, PacingMode, PacingState, PacingStatus,
};
