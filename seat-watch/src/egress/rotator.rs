//! Egress endpoint pool with failure-driven eviction.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, TimeDelta};
use futures::future::join_all;
use rand::seq::IndexedRandom;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::pacing::{Clock, SystemClock};

use super::endpoint::{EgressEndpoint, EndpointConfig, EndpointId};
use super::probe::{HealthProbe, HttpProbe};

const DEFAULT_PROBE_URL: &str = "https://kyfw.12306.cn/";

/// A rotator shared between poll loops. All pool mutation goes through the
/// mutex.
pub type SharedRotator<C = SystemClock> = Arc<tokio::sync::Mutex<EgressRotator<C>>>;

/// Errors from pool management.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EgressError {
    #[error("endpoint {0} is already in the pool")]
    Duplicate(String),
}

/// Configuration for egress rotation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EgressConfig {
    /// When false, every lease is direct.
    pub enabled: bool,

    /// Proxies in the pool.
    pub endpoints: Vec<EndpointConfig>,

    /// Seconds between automatic health checks.
    pub check_interval_secs: u64,

    /// Consecutive failures before an endpoint is taken out of rotation.
    pub failure_threshold: u32,

    /// Page fetched through each proxy during a health check.
    pub probe_url: String,

    /// Per-probe timeout (seconds).
    pub probe_timeout_secs: u64,
}

impl EgressConfig {
    /// Enable rotation over the given endpoints.
    pub fn with_endpoints(mut self, endpoints: impl IntoIterator<Item = EndpointConfig>) -> Self {
        self.enabled = true;
        self.endpoints = endpoints.into_iter().collect();
        self
    }

    /// Returns the health check interval as a Duration.
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    /// Returns the probe timeout as a Duration.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoints: Vec::new(),
            check_interval_secs: 300, // 5 minutes
            failure_threshold: 3,
            probe_url: DEFAULT_PROBE_URL.to_string(),
            probe_timeout_secs: 10,
        }
    }
}

/// How a request leaves the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Egress {
    /// No proxy.
    Direct,
    /// Through the proxy at this URL.
    Proxy(String),
}

impl fmt::Display for Egress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Egress::Direct => write!(f, "direct"),
            Egress::Proxy(_) => write!(f, "proxy"),
        }
    }
}

/// An endpoint on loan from the pool.
///
/// Hand it back with [`EgressRotator::release`] once the request is done.
#[must_use = "a lease must be released back to the rotator"]
#[derive(Debug, PartialEq, Eq)]
pub struct Lease {
    egress: Egress,
    endpoint: Option<EndpointId>,
}

impl Lease {
    fn direct() -> Self {
        Self {
            egress: Egress::Direct,
            endpoint: None,
        }
    }

    pub fn egress(&self) -> &Egress {
        &self.egress
    }

    /// The pooled endpoint behind this lease, if not direct.
    pub fn endpoint(&self) -> Option<EndpointId> {
        self.endpoint
    }

    pub fn is_direct(&self) -> bool {
        self.endpoint.is_none()
    }
}

/// Result of a health check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HealthReport {
    pub available: usize,
    pub unavailable: usize,
}

/// Pool summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub enabled: bool,
    pub total: usize,
    pub available: usize,
    pub unavailable: usize,
    pub last_check: Option<DateTime<Local>>,
}

/// A health check taken out of the pool, see
/// [`EgressRotator::begin_health_check`].
pub struct PendingHealthCheck {
    targets: Vec<(EndpointId, String)>,
    probe: Arc<dyn HealthProbe>,
}

impl PendingHealthCheck {
    /// Probe every endpoint concurrently.
    pub async fn run(self) -> HealthResults {
        let probe = &self.probe;
        let results = join_all(self.targets.iter().map(|(_, url)| probe.check(url))).await;
        HealthResults(
            self.targets
                .into_iter()
                .map(|(id, _)| id)
                .zip(results)
                .collect(),
        )
    }
}

/// Probe outcome per endpoint, applied with
/// [`EgressRotator::finish_health_check`].
#[derive(Debug, Clone, Default)]
pub struct HealthResults(Vec<(EndpointId, bool)>);

/// Rotating pool of egress endpoints.
pub struct EgressRotator<C: Clock = SystemClock> {
    config: EgressConfig,
    endpoints: Vec<EgressEndpoint>,
    next_id: u64,
    last_check: Option<DateTime<Local>>,
    probe: Arc<dyn HealthProbe>,
    clock: C,
}

impl EgressRotator<SystemClock> {
    /// Create a rotator that probes over HTTP on the system clock.
    pub fn new(config: EgressConfig) -> Self {
        let probe = HttpProbe::new(config.probe_url.clone(), config.probe_timeout());
        Self::with_parts(config, Arc::new(probe), SystemClock)
    }
}

impl<C: Clock> EgressRotator<C> {
    /// Create a rotator from its parts.
    ///
    /// Repeated `host:port` entries in the configuration are dropped.
    pub fn with_parts(mut config: EgressConfig, probe: Arc<dyn HealthProbe>, clock: C) -> Self {
        let endpoints = std::mem::take(&mut config.endpoints);
        let mut rotator = Self {
            config,
            endpoints: Vec::new(),
            next_id: 0,
            last_check: None,
            probe,
            clock,
        };

        for endpoint in endpoints {
            if let Err(e) = rotator.add_endpoint(endpoint) {
                warn!(error = %e, "Skipping endpoint");
            }
        }

        info!(
            enabled = rotator.config.enabled,
            endpoints = rotator.endpoints.len(),
            "Egress pool ready"
        );
        rotator
    }

    /// Wrap for sharing between poll loops.
    pub fn shared(self) -> SharedRotator<C> {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn endpoints(&self) -> &[EgressEndpoint] {
        &self.endpoints
    }

    pub fn endpoint(&self, id: EndpointId) -> Option<&EgressEndpoint> {
        self.endpoints.iter().find(|e| e.id == id)
    }

    /// Borrow an endpoint.
    ///
    /// Picks uniformly at random among available endpoints. When none are
    /// available every endpoint is restored first. Direct when rotation is
    /// disabled or the pool is empty.
    pub fn get(&mut self) -> Lease {
        if !self.config.enabled {
            return Lease::direct();
        }

        if self.endpoints.is_empty() {
            warn!("Egress pool is empty, going direct");
            return Lease::direct();
        }

        if !self.endpoints.iter().any(|e| e.available) {
            warn!("No available endpoints, recovering pool");
            self.recover_all();
        }

        let eligible: Vec<&EgressEndpoint> =
            self.endpoints.iter().filter(|e| e.available).collect();

        match eligible.choose(&mut rand::rng()) {
            Some(endpoint) => {
                debug!(endpoint = %endpoint.config.address(), "Selected endpoint");
                Lease {
                    egress: Egress::Proxy(endpoint.config.url()),
                    endpoint: Some(endpoint.id),
                }
            }
            None => Lease::direct(),
        }
    }

    /// Return a borrowed endpoint and record how the request went.
    pub fn release(&mut self, lease: Lease, success: bool) {
        let Some(id) = lease.endpoint else {
            return;
        };

        let threshold = self.config.failure_threshold;
        let now = self.clock.now();
        let Some(endpoint) = self.endpoints.iter_mut().find(|e| e.id == id) else {
            debug!(%id, "Released endpoint no longer in pool");
            return;
        };

        endpoint.last_checked = Some(now);

        if success {
            endpoint.successes += 1;
            endpoint.consecutive_failures = 0;
            return;
        }

        endpoint.failures += 1;
        endpoint.consecutive_failures += 1;
        if endpoint.available && endpoint.consecutive_failures >= threshold {
            endpoint.available = false;
            warn!(
                endpoint = %endpoint.config.address(),
                failures = endpoint.consecutive_failures,
                "Endpoint taken out of rotation"
            );
        }
    }

    /// Probe every endpoint and set availability from the results.
    pub async fn health_check(&mut self) -> HealthReport {
        let results = self.begin_health_check().run().await;
        self.finish_health_check(results)
    }

    /// Start a health check that runs without borrowing the pool.
    ///
    /// Marks the check as done now, so other callers do not start another
    /// one while this one is in flight.
    pub fn begin_health_check(&mut self) -> PendingHealthCheck {
        self.last_check = Some(self.clock.now());
        PendingHealthCheck {
            targets: self
                .endpoints
                .iter()
                .map(|e| (e.id, e.config.url()))
                .collect(),
            probe: self.probe.clone(),
        }
    }

    /// Apply probe results. Endpoints removed since the check began are
    /// skipped.
    pub fn finish_health_check(&mut self, results: HealthResults) -> HealthReport {
        let now = self.clock.now();
        let mut report = HealthReport::default();

        for (id, healthy) in results.0 {
            let Some(endpoint) = self.endpoints.iter_mut().find(|e| e.id == id) else {
                continue;
            };
            endpoint.available = healthy;
            endpoint.last_checked = Some(now);
            if healthy {
                report.available += 1;
            } else {
                report.unavailable += 1;
            }
        }

        self.last_check = Some(now);
        info!(
            available = report.available,
            unavailable = report.unavailable,
            "Health check complete"
        );
        report
    }

    /// Borrow an endpoint, running a health check first when one is due.
    ///
    /// Returns `None` when rotation is disabled.
    pub async fn auto_rotate(&mut self) -> Option<Lease> {
        if !self.config.enabled {
            return None;
        }

        if self.health_check_due() {
            self.health_check().await;
        }

        Some(self.get())
    }

    /// Borrow an endpoint from a shared pool, running a health check first
    /// when one is due.
    ///
    /// Unlike [`EgressRotator::auto_rotate`], the pool lock is released while
    /// endpoints are probed. Falls back to [`EgressRotator::get`] when
    /// rotation is disabled.
    pub async fn lease_from(pool: &SharedRotator<C>) -> Lease {
        let pending = {
            let mut rotator = pool.lock().await;
            if !rotator.config.enabled || !rotator.health_check_due() {
                return rotator.get();
            }
            rotator.begin_health_check()
        };

        let results = pending.run().await;

        let mut rotator = pool.lock().await;
        rotator.finish_health_check(results);
        rotator.get()
    }

    /// Whether the check interval has elapsed since the last health check.
    pub fn health_check_due(&self) -> bool {
        let interval = TimeDelta::from_std(self.config.check_interval()).unwrap_or(TimeDelta::MAX);
        match self.last_check {
            None => true,
            Some(last) => self.clock.now() - last >= interval,
        }
    }

    /// Add an endpoint to the pool.
    pub fn add_endpoint(&mut self, config: EndpointConfig) -> Result<EndpointId, EgressError> {
        let address = config.address();
        if self.endpoints.iter().any(|e| e.config.address() == address) {
            return Err(EgressError::Duplicate(address));
        }

        let id = EndpointId(self.next_id);
        self.next_id += 1;
        self.endpoints.push(EgressEndpoint::new(id, config));
        debug!(endpoint = %address, %id, "Added endpoint");
        Ok(id)
    }

    /// Remove the endpoint at `host:port`. Returns whether one was removed.
    pub fn remove_endpoint(&mut self, host: &str, port: u16) -> bool {
        let before = self.endpoints.len();
        self.endpoints
            .retain(|e| !(e.config.host == host && e.config.port == port));
        let removed = self.endpoints.len() < before;
        if removed {
            info!(endpoint = %format!("{host}:{port}"), "Removed endpoint");
        }
        removed
    }

    pub fn stats(&self) -> PoolStats {
        let available = self.endpoints.iter().filter(|e| e.available).count();
        PoolStats {
            enabled: self.config.enabled,
            total: self.endpoints.len(),
            available,
            unavailable: self.endpoints.len() - available,
            last_check: self.last_check,
        }
    }

    fn recover_all(&mut self) {
        for endpoint in &mut self.endpoints {
            endpoint.available = true;
            endpoint.consecutive_failures = 0;
        }
        info!(endpoints = self.endpoints.len(), "Recovered all endpoints");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pacing::ManualClock;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Probe with scripted answers per proxy URL, counting calls.
    #[derive(Default)]
    struct ScriptedProbe {
        healthy: Mutex<HashMap<String, bool>>,
        calls: AtomicUsize,
    }

    impl ScriptedProbe {
        fn set(&self, url: &str, healthy: bool) {
            self.healthy.lock().unwrap().insert(url.to_string(), healthy);
        }
    }

    #[async_trait]
    impl HealthProbe for ScriptedProbe {
        async fn check(&self, proxy_url: &str) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.healthy
                .lock()
                .unwrap()
                .get(proxy_url)
                .copied()
                .unwrap_or(true)
        }
    }

    fn endpoints(n: u16) -> Vec<EndpointConfig> {
        (0..n)
            .map(|i| EndpointConfig::new("10.0.0.1", 8000 + i))
            .collect()
    }

    fn rotator(n: u16) -> (EgressRotator<ManualClock>, Arc<ScriptedProbe>, ManualClock) {
        let probe = Arc::new(ScriptedProbe::default());
        let clock = ManualClock::new(Local.with_ymd_and_hms(2026, 2, 1, 8, 0, 0).unwrap());
        let config = EgressConfig::default().with_endpoints(endpoints(n));
        let rotator = EgressRotator::with_parts(config, probe.clone(), clock.clone());
        (rotator, probe, clock)
    }

    #[test]
    fn disabled_is_direct() {
        let mut rotator = EgressRotator::new(EgressConfig::default());

        let lease = rotator.get();
        assert!(lease.is_direct());
        assert_eq!(lease.egress(), &Egress::Direct);
        rotator.release(lease, false);
    }

    #[test]
    fn empty_pool_is_direct() {
        let (mut rotator, _, _) = rotator(0);
        assert!(rotator.is_enabled());

        let lease = rotator.get();
        assert!(lease.is_direct());
        rotator.release(lease, true);
    }

    #[test]
    fn get_returns_proxy_url() {
        let (mut rotator, _, _) = rotator(1);

        let lease = rotator.get();
        assert_eq!(lease.egress(), &Egress::Proxy("http://10.0.0.1:8000".into()));
        assert!(lease.endpoint().is_some());
        rotator.release(lease, true);

        let endpoint = &rotator.endpoints()[0];
        assert_eq!(endpoint.successes, 1);
        assert!(endpoint.last_checked.is_some());
    }

    #[test]
    fn failures_evict_at_threshold() {
        let (mut rotator, _, _) = rotator(2);
        let target = rotator.endpoints()[0].id;

        for i in 0..3 {
            assert!(rotator.endpoint(target).unwrap().available, "evicted early at {i}");
            rotator.release(
                Lease {
                    egress: Egress::Proxy(String::new()),
                    endpoint: Some(target),
                },
                false,
            );
        }

        let endpoint = rotator.endpoint(target).unwrap();
        assert!(!endpoint.available);
        assert_eq!(endpoint.consecutive_failures, 3);

        // Only the other endpoint is handed out now
        for _ in 0..20 {
            let lease = rotator.get();
            assert_ne!(lease.endpoint(), Some(target));
            rotator.release(lease, true);
        }
    }

    #[test]
    fn success_resets_consecutive_failures() {
        let (mut rotator, _, _) = rotator(1);

        for _ in 0..2 {
            let lease = rotator.get();
            rotator.release(lease, false);
        }
        let lease = rotator.get();
        rotator.release(lease, true);

        let endpoint = &rotator.endpoints()[0];
        assert_eq!(endpoint.consecutive_failures, 0);
        assert_eq!(endpoint.failures, 2);
        assert!(endpoint.available);
    }

    #[test]
    fn exhausted_pool_recovers() {
        let (mut rotator, _, _) = rotator(3);

        for endpoint in &mut rotator.endpoints {
            endpoint.available = false;
            endpoint.consecutive_failures = 5;
        }

        let lease = rotator.get();
        assert!(lease.endpoint().is_some());
        rotator.release(lease, true);

        assert!(rotator.endpoints().iter().all(|e| e.available));
        assert!(rotator.endpoints().iter().all(|e| e.consecutive_failures == 0));
    }

    #[test]
    fn recovered_pool_reaches_every_endpoint() {
        let (mut rotator, _, _) = rotator(3);
        for endpoint in &mut rotator.endpoints {
            endpoint.available = false;
        }

        let mut seen = HashSet::new();
        for _ in 0..300 {
            let lease = rotator.get();
            seen.extend(lease.endpoint());
            rotator.release(lease, true);
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn release_after_removal_is_ignored() {
        let (mut rotator, _, _) = rotator(1);

        let lease = rotator.get();
        assert!(rotator.remove_endpoint("10.0.0.1", 8000));
        rotator.release(lease, false);

        assert!(rotator.endpoints().is_empty());
    }

    #[tokio::test]
    async fn health_check_overrides_failures() {
        let (mut rotator, probe, _) = rotator(2);
        let sick = rotator.endpoints()[0].config.url();
        probe.set(&sick, false);

        // Evict the healthy one through failures
        let healthy_id = rotator.endpoints()[1].id;
        for _ in 0..3 {
            rotator.release(
                Lease {
                    egress: Egress::Proxy(String::new()),
                    endpoint: Some(healthy_id),
                },
                false,
            );
        }

        let report = rotator.health_check().await;
        assert_eq!(
            report,
            HealthReport {
                available: 1,
                unavailable: 1
            }
        );
        assert!(!rotator.endpoints()[0].available);
        assert!(rotator.endpoints()[1].available);
        assert!(rotator.stats().last_check.is_some());
    }

    #[tokio::test]
    async fn auto_rotate_checks_when_due() {
        let (mut rotator, probe, clock) = rotator(2);

        let lease = rotator.auto_rotate().await.unwrap();
        rotator.release(lease, true);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);

        clock.advance(TimeDelta::seconds(299));
        let lease = rotator.auto_rotate().await.unwrap();
        rotator.release(lease, true);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);

        clock.advance(TimeDelta::seconds(1));
        let lease = rotator.auto_rotate().await.unwrap();
        rotator.release(lease, true);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn auto_rotate_disabled() {
        let mut rotator = EgressRotator::new(EgressConfig::default());
        assert!(rotator.auto_rotate().await.is_none());
    }

    /// Probe that blocks until the test hands out permits.
    struct GatedProbe {
        gate: tokio::sync::Semaphore,
        started: AtomicUsize,
    }

    #[async_trait]
    impl HealthProbe for GatedProbe {
        async fn check(&self, _proxy_url: &str) -> bool {
            self.started.fetch_add(1, Ordering::SeqCst);
            let _permit = self.gate.acquire().await;
            true
        }
    }

    #[tokio::test]
    async fn lease_from_unlocks_pool_while_probing() {
        let probe = Arc::new(GatedProbe {
            gate: tokio::sync::Semaphore::new(0),
            started: AtomicUsize::new(0),
        });
        let config = EgressConfig::default().with_endpoints(endpoints(2));
        let pool = EgressRotator::with_parts(config, probe.clone(), SystemClock).shared();

        let task = tokio::spawn({
            let pool = pool.clone();
            async move { EgressRotator::lease_from(&pool).await }
        });
        while probe.started.load(Ordering::SeqCst) < 2 {
            tokio::task::yield_now().await;
        }

        {
            let rotator = pool.try_lock().expect("pool locked during health check");
            assert!(!rotator.health_check_due());
        }

        probe.gate.add_permits(2);
        let lease = task.await.unwrap();
        assert!(!lease.is_direct());
        assert_eq!(pool.lock().await.stats().available, 2);
    }

    #[tokio::test]
    async fn lease_from_checks_only_when_due() {
        let (rotator, probe, clock) = rotator(2);
        let pool = rotator.shared();

        let lease = EgressRotator::lease_from(&pool).await;
        pool.lock().await.release(lease, true);
        let lease = EgressRotator::lease_from(&pool).await;
        pool.lock().await.release(lease, true);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);

        clock.advance(TimeDelta::seconds(300));
        let lease = EgressRotator::lease_from(&pool).await;
        pool.lock().await.release(lease, true);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn lease_from_disabled_is_direct() {
        let pool = EgressRotator::new(EgressConfig::default()).shared();
        let lease = EgressRotator::lease_from(&pool).await;
        assert!(lease.is_direct());
    }

    #[test]
    fn duplicate_endpoint_rejected() {
        let (mut rotator, _, _) = rotator(1);

        let result = rotator.add_endpoint(EndpointConfig::new("10.0.0.1", 8000));
        assert_eq!(result, Err(EgressError::Duplicate("10.0.0.1:8000".into())));

        assert!(rotator.add_endpoint(EndpointConfig::new("10.0.0.2", 8000)).is_ok());
        assert_eq!(rotator.stats().total, 2);
    }

    #[test]
    fn duplicate_config_entries_dropped() {
        let probe = Arc::new(ScriptedProbe::default());
        let config = EgressConfig::default().with_endpoints([
            EndpointConfig::new("10.0.0.1", 8000),
            EndpointConfig::new("10.0.0.1", 8000),
        ]);
        let rotator = EgressRotator::with_parts(config, probe, SystemClock);
        assert_eq!(rotator.endpoints().len(), 1);
    }

    #[test]
    fn stats_counts() {
        let (mut rotator, _, _) = rotator(3);
        rotator.endpoints[1].available = false;

        let stats = rotator.stats();
        assert!(stats.enabled);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.available, 2);
        assert_eq!(stats.unavailable, 1);
        assert!(stats.last_check.is_none());
    }

    #[tokio::test]
    async fn shared_rotator_serializes_access() {
        let (rotator, _, _) = rotator(2);
        let shared = rotator.shared();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let shared = shared.clone();
            handles.push(tokio::spawn(async move {
                let mut pool = shared.lock().await;
                let lease = pool.get();
                pool.release(lease, true);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let pool = shared.lock().await;
        let total: u64 = pool.endpoints().iter().map(|e| e.successes).sum();
        assert_eq!(total, 8);
    }
}
