//! Listing query client.
//!
//! This module talks to the ticket listing endpoint and turns its answers
//! into [`Snapshot`](crate::domain::Snapshot)s.
//!
//! Key characteristics of the listing endpoint:
//! - Records are **positional** `|`-delimited strings; the column layout is
//!   described by a [`RecordSchema`] so drift is a configuration change
//! - Station names are not in the records; a code-to-name map travels
//!   alongside them in the same response
//! - Times are `HH:MM` local time, durations are `HH:MM` and may exceed a day
//! - The endpoint path rotates between a few known variants

mod client;
mod convert;
mod error;
mod mock;
mod schema;
mod types;

pub use client::{
    AuthSession, ListingClient, ListingConfig, ListingSource, QueryTarget, StaticSession,
};
pub use convert::{RecordError, RecordParser};
pub use error::QueryError;
pub use mock::MockListingClient;
pub use schema::{Field, FieldSpec, RecordSchema, SchemaError};
pub use types::{ListingData, ListingResponse};
