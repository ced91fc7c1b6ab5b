//! Seat availability watcher.
//!
//! Polls a ticket listing service for one route and date, reports when seat
//! availability changes, and paces itself (and rotates egress proxies) so
//! that the service does not lock it out.

pub mod changes;
pub mod config;
pub mod domain;
pub mod egress;
pub mod listing;
pub mod pacing;
pub mod poll;
