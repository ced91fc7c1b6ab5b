//! Polling orchestration.
//!
//! Ties the listing client, change detection, pacing and egress rotation
//! together into a loop over one (route, date) target. Notification
//! delivery and order submission stay behind the traits in
//! [`collaborators`](self::NotificationSink).

mod collaborators;
mod criteria;
mod runner;

pub use collaborators::{
    LogSink, NotificationError, NotificationSink, OrderCollaborator, OrderError, OrderOutcome,
};
pub use criteria::OrderCriteria;
pub use runner::{CycleOutcome, PollLoop, QuotaPolicy, RunConfig, StopReason};
