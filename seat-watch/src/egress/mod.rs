//! Egress rotation.
//!
//! Queries can leave through a pool of proxies. [`EgressRotator`] lends one
//! endpoint per request as a [`Lease`], takes endpoints that keep failing
//! out of rotation, and periodically health-checks the pool.

mod endpoint;
mod probe;
mod rotator;

pub use endpoint::{EgressEndpoint, EndpointConfig, EndpointId, Protocol};
pub use probe::{HealthProbe, HttpProbe};
pub use rotator::{
    Egress, EgressConfig, EgressError, EgressRotator, HealthReport, HealthResults, Lease,
    PendingHealthCheck, PoolStats, SharedRotator,
};
