//! Adaptive request pacing.
//!
//! The controller is a small state machine:
//!
//! - `Normal`: requests go out every `interval`, which shrinks back toward
//!   the minimum while requests succeed.
//! - `Throttled`: the consecutive failure counter reached the threshold; the
//!   interval grows on every further failure, up to the maximum.
//! - `Banned`: a failure carried a ban indicator. Nothing should be sent
//!   until the cooldown elapses, after which the controller returns to
//!   `Normal` without clearing the failure counter.
//!
//! Independently, a per-day request counter enforces the daily quota and
//! resets when the local date changes.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate};
use rand::Rng;
use tracing::{debug, error, info, warn};

use super::clock::{Clock, SystemClock};
use super::config::PacingConfig;

/// Pacing state machine mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacingMode {
    Normal,
    Throttled,
    Banned,
}

impl fmt::Display for PacingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacingMode::Normal => write!(f, "normal"),
            PacingMode::Throttled => write!(f, "throttled"),
            PacingMode::Banned => write!(f, "banned"),
        }
    }
}

/// What kind of failure a request ended in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// No answer within the per-call timeout
    Timeout,
    /// The service answered with this HTTP status
    HttpStatus(u16),
    /// Connection, proxy or TLS failure
    Transport,
    /// The service answered but flagged the query as failed
    Rejected,
    /// The answer could not be decoded
    Malformed,
}

impl FailureKind {
    /// The HTTP status involved, if any.
    pub fn status(self) -> Option<u16> {
        match self {
            FailureKind::HttpStatus(status) => Some(status),
            _ => None,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::HttpStatus(status) => write!(f, "HTTP {status}"),
            FailureKind::Transport => write!(f, "transport error"),
            FailureKind::Rejected => write!(f, "rejected"),
            FailureKind::Malformed => write!(f, "malformed response"),
        }
    }
}

/// A failed request, as seen by the pacing controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    /// Messages from the response body, searched for ban indicators.
    pub messages: Vec<String>,
}

impl Failure {
    pub fn new(kind: FailureKind) -> Self {
        Self {
            kind,
            messages: Vec::new(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.messages.push(message.into());
        self
    }

    pub fn with_messages(mut self, messages: impl IntoIterator<Item = String>) -> Self {
        self.messages.extend(messages);
        self
    }
}

/// Mutable pacing state.
#[derive(Debug, Clone, PartialEq)]
pub struct PacingState {
    pub mode: PacingMode,
    pub interval: Duration,
    pub consecutive_failures: u32,
    pub daily_count: u32,
    pub last_reset: Option<NaiveDate>,
    pub ban_until: Option<DateTime<Local>>,
}

impl PacingState {
    fn initial(config: &PacingConfig) -> Self {
        Self {
            mode: PacingMode::Normal,
            interval: config.min_interval(),
            consecutive_failures: 0,
            daily_count: 0,
            last_reset: None,
            ban_until: None,
        }
    }
}

/// Point-in-time view of the controller, for logging.
#[derive(Debug, Clone, PartialEq)]
pub struct PacingStatus {
    pub mode: PacingMode,
    pub consecutive_failures: u32,
    pub interval: Duration,
    pub daily_count: u32,
    pub daily_limit: u32,
    pub remaining_requests: u32,
    pub ban_until: Option<DateTime<Local>>,
}

impl fmt::Display for PacingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (failures {}, interval {:.1}s, today {}/{})",
            self.mode,
            self.consecutive_failures,
            self.interval.as_secs_f64(),
            self.daily_count,
            self.daily_limit
        )?;
        if let Some(until) = self.ban_until {
            write!(f, ", banned until {}", until.format("%H:%M:%S"))?;
        }
        Ok(())
    }
}

/// Adaptive rate limiter and ban detector.
#[derive(Debug)]
pub struct PacingController<C: Clock = SystemClock> {
    config: PacingConfig,
    state: PacingState,
    clock: C,
}

impl PacingController<SystemClock> {
    /// Create a controller on the system clock.
    pub fn new(config: PacingConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> PacingController<C> {
    /// Create a controller reading time from `clock`.
    pub fn with_clock(config: PacingConfig, clock: C) -> Self {
        let state = PacingState::initial(&config);
        info!(
            min_secs = config.min_interval().as_secs_f64(),
            max_secs = config.max_interval().as_secs_f64(),
            daily_limit = config.daily_limit,
            "Pacing controller started"
        );
        Self {
            config,
            state,
            clock,
        }
    }

    pub fn config(&self) -> &PacingConfig {
        &self.config
    }

    pub fn state(&self) -> &PacingState {
        &self.state
    }

    pub fn mode(&self) -> PacingMode {
        self.state.mode
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Record a successful request.
    pub fn on_success(&mut self) {
        self.roll_over_day();

        self.state.consecutive_failures = self.state.consecutive_failures.saturating_sub(1);

        if self.state.consecutive_failures == 0 {
            self.state.interval = scale(
                self.state.interval,
                self.config.shrink_factor,
                self.config.max_interval(),
            )
            .max(self.config.min_interval());
        }

        if self.state.mode == PacingMode::Banned {
            info!("Ban cleared by successful request");
        }
        self.state.ban_until = None;
        self.state.mode = if self.state.consecutive_failures >= self.config.failure_threshold {
            PacingMode::Throttled
        } else {
            PacingMode::Normal
        };

        self.state.daily_count = self.state.daily_count.saturating_add(1);
    }

    /// Record a failed request.
    pub fn on_failure(&mut self, failure: &Failure) {
        self.roll_over_day();

        self.state.consecutive_failures = self.state.consecutive_failures.saturating_add(1);
        self.state.daily_count = self.state.daily_count.saturating_add(1);

        if self.state.consecutive_failures >= self.config.failure_threshold {
            self.throttle();
        }

        let banned = self.config.ban_indicators.matches(
            failure.kind.status(),
            failure.messages.iter().map(String::as_str),
        );
        if banned {
            self.ban();
        }

        warn!(
            kind = %failure.kind,
            failures = self.state.consecutive_failures,
            today = self.state.daily_count,
            limit = self.config.daily_limit,
            "Request failed"
        );
    }

    fn throttle(&mut self) {
        self.state.interval = scale(
            self.state.interval,
            self.config.grow_factor,
            self.config.max_interval(),
        );
        if self.state.mode != PacingMode::Banned {
            self.state.mode = PacingMode::Throttled;
        }
        warn!(
            failures = self.state.consecutive_failures,
            interval_secs = self.state.interval.as_secs_f64(),
            "Throttling requests"
        );
    }

    fn ban(&mut self) {
        let cooldown = self.config.ban_cooldown(self.state.consecutive_failures);
        let until = self.clock.now() + cooldown;
        self.state.mode = PacingMode::Banned;
        self.state.ban_until = Some(until);
        error!(
            cooldown_secs = cooldown.as_secs(),
            until = %until.format("%H:%M:%S"),
            "Ban detected"
        );
    }

    /// Seconds to wait before the next request.
    ///
    /// While banned this is the remaining cooldown. Once the cooldown has
    /// elapsed the controller returns to `Normal` and the regular interval
    /// applies.
    pub fn get_interval(&mut self) -> Duration {
        self.roll_over_day();
        match self.remaining_ban() {
            Some(remaining) => {
                debug!(remaining_secs = remaining.as_secs(), "Still banned");
                remaining
            }
            None => self.state.interval,
        }
    }

    /// Whether the caller should pause instead of polling.
    ///
    /// True while a ban cooldown is running or once the daily quota is used
    /// up. An elapsed ban is cleared here.
    pub fn should_stop(&mut self) -> bool {
        self.roll_over_day();
        if self.remaining_ban().is_some() {
            return true;
        }
        if self.quota_exhausted() {
            warn!(limit = self.config.daily_limit, "Daily request limit reached");
            return true;
        }
        false
    }

    /// Whether today's requests have used up the quota.
    pub fn quota_exhausted(&self) -> bool {
        self.state.daily_count >= self.config.daily_limit
    }

    /// Sleep for the jittered interval. Returns how long was waited.
    pub async fn wait_interval(&mut self) -> Duration {
        let interval = self.get_interval();
        let wait = self.jittered(interval);
        debug!(wait_secs = wait.as_secs_f64(), "Waiting");
        tokio::time::sleep(wait).await;
        wait
    }

    /// Apply random jitter to an interval, respecting the wait floor.
    pub fn jittered(&self, interval: Duration) -> Duration {
        let jitter = self.config.jitter.abs();
        let factor = if jitter > 0.0 && jitter.is_finite() {
            1.0 + rand::rng().random_range(-jitter..=jitter)
        } else {
            1.0
        };
        scale(interval, factor, interval.saturating_mul(2)).max(self.config.min_wait())
    }

    /// Snapshot of the controller for logging.
    pub fn status(&self) -> PacingStatus {
        PacingStatus {
            mode: self.state.mode,
            consecutive_failures: self.state.consecutive_failures,
            interval: self.state.interval,
            daily_count: self.state.daily_count,
            daily_limit: self.config.daily_limit,
            remaining_requests: self.config.daily_limit.saturating_sub(self.state.daily_count),
            ban_until: self.state.ban_until,
        }
    }

    /// Return to the initial state.
    pub fn reset(&mut self) {
        self.state = PacingState::initial(&self.config);
        info!("Pacing state reset");
    }

    /// Remaining cooldown, clearing the ban once it has elapsed.
    fn remaining_ban(&mut self) -> Option<Duration> {
        if self.state.mode != PacingMode::Banned {
            return None;
        }
        let now = self.clock.now();
        let remaining = self
            .state
            .ban_until
            .and_then(|until| (until - now).to_std().ok())
            .filter(|d| !d.is_zero());

        if remaining.is_none() {
            self.state.mode = PacingMode::Normal;
            self.state.ban_until = None;
            info!("Ban cooldown elapsed");
        }
        remaining
    }

    fn roll_over_day(&mut self) {
        let today = self.clock.today();
        if self.state.last_reset != Some(today) {
            if self.state.last_reset.is_some() {
                info!(date = %today, "New day, resetting request count");
            }
            self.state.daily_count = 0;
            self.state.last_reset = Some(today);
        }
    }
}

/// `interval * factor`, clamped to `[0, cap]`.
fn scale(interval: Duration, factor: f64, cap: Duration) -> Duration {
    let secs = interval.as_secs_f64() * factor;
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs.min(cap.as_secs_f64())).unwrap_or(cap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pacing::ManualClock;
    use chrono::{TimeDelta, TimeZone};

    fn start() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 2, 1, 12, 0, 0).unwrap()
    }

    fn controller(config: PacingConfig) -> (PacingController<ManualClock>, ManualClock) {
        let clock = ManualClock::new(start());
        (PacingController::with_clock(config, clock.clone()), clock)
    }

    fn timeout() -> Failure {
        Failure::new(FailureKind::Timeout)
    }

    #[test]
    fn initial_state() {
        let (mut pacing, _) = controller(PacingConfig::default());

        assert_eq!(pacing.mode(), PacingMode::Normal);
        assert_eq!(pacing.get_interval(), Duration::from_secs(5));
        assert!(!pacing.should_stop());
    }

    #[test]
    fn threshold_failures_throttle() {
        let (mut pacing, _) = controller(PacingConfig::default());
        let before = pacing.get_interval();

        for _ in 0..4 {
            pacing.on_failure(&timeout());
        }
        assert_eq!(pacing.mode(), PacingMode::Normal);
        assert_eq!(pacing.get_interval(), before);

        pacing.on_failure(&timeout());
        assert_eq!(pacing.mode(), PacingMode::Throttled);
        let after = pacing.get_interval();
        assert!(after > before);
        assert_eq!(after, Duration::from_secs_f64(7.5));
    }

    #[test]
    fn throttled_interval_capped_at_max() {
        let (mut pacing, _) = controller(PacingConfig::default());

        for _ in 0..20 {
            pacing.on_failure(&timeout());
            assert!(pacing.get_interval() <= Duration::from_secs(15));
        }
        assert_eq!(pacing.get_interval(), Duration::from_secs(15));
    }

    #[test]
    fn out_of_range_factors_stay_within_bounds() {
        let config = PacingConfig {
            shrink_factor: -0.5,
            grow_factor: f64::INFINITY,
            jitter: f64::INFINITY,
            ..PacingConfig::default()
        };
        let (mut pacing, _) = controller(config);

        for _ in 0..5 {
            pacing.on_failure(&timeout());
        }
        assert_eq!(pacing.get_interval(), Duration::from_secs(15));
        assert_eq!(pacing.jittered(Duration::from_secs(15)), Duration::from_secs(15));

        for _ in 0..5 {
            pacing.on_success();
        }
        assert_eq!(pacing.get_interval(), Duration::from_secs(5));
    }

    #[test]
    fn scale_clamps() {
        let cap = Duration::from_secs(10);
        assert_eq!(scale(Duration::from_secs(4), 1.5, cap), Duration::from_secs(6));
        assert_eq!(scale(Duration::from_secs(4), 1e300, cap), cap);
        assert_eq!(scale(Duration::from_secs(4), -1.0, cap), Duration::ZERO);
        assert_eq!(scale(Duration::from_secs(4), f64::NAN, cap), Duration::ZERO);
    }

    #[test]
    fn success_decrements_failures() {
        let (mut pacing, _) = controller(PacingConfig::default());

        for _ in 0..3 {
            pacing.on_failure(&timeout());
        }
        pacing.on_success();
        assert_eq!(pacing.state().consecutive_failures, 2);

        for _ in 0..5 {
            pacing.on_success();
        }
        assert_eq!(pacing.state().consecutive_failures, 0);
    }

    #[test]
    fn interval_shrinks_to_minimum() {
        let (mut pacing, _) = controller(PacingConfig::default());

        for _ in 0..8 {
            pacing.on_failure(&timeout());
        }
        let throttled = pacing.get_interval();

        // Failures must drain before the interval shrinks
        for _ in 0..7 {
            pacing.on_success();
        }
        assert_eq!(pacing.get_interval(), throttled);

        pacing.on_success();
        assert_eq!(pacing.mode(), PacingMode::Normal);
        assert!(pacing.get_interval() < throttled);

        for _ in 0..50 {
            pacing.on_success();
        }
        assert_eq!(pacing.get_interval(), Duration::from_secs(5));
    }

    #[test]
    fn ban_indicator_message_bans() {
        let (mut pacing, _) = controller(PacingConfig::default());

        let failure = Failure::new(FailureKind::Rejected).with_message("网络繁忙");
        pacing.on_failure(&failure);

        assert_eq!(pacing.mode(), PacingMode::Banned);
        assert!(pacing.should_stop());
        assert_eq!(pacing.get_interval(), Duration::from_secs(60));
    }

    #[test]
    fn ban_status_bans() {
        let (mut pacing, _) = controller(PacingConfig::default());

        pacing.on_failure(&Failure::new(FailureKind::HttpStatus(429)));
        assert_eq!(pacing.mode(), PacingMode::Banned);

        let (mut pacing, _) = controller(PacingConfig::default());
        pacing.on_failure(&Failure::new(FailureKind::HttpStatus(500)));
        assert_eq!(pacing.mode(), PacingMode::Normal);
    }

    #[test]
    fn ban_cooldown_counts_down_and_expires() {
        let (mut pacing, clock) = controller(PacingConfig::default());

        pacing.on_failure(&Failure::new(FailureKind::HttpStatus(403)));
        let first = pacing.get_interval();
        assert!(first > Duration::ZERO);

        clock.advance(TimeDelta::seconds(20));
        let second = pacing.get_interval();
        assert!(second < first);
        assert!(second > Duration::ZERO);

        clock.advance(TimeDelta::seconds(40));
        assert_eq!(pacing.get_interval(), Duration::from_secs(5));
        assert_eq!(pacing.mode(), PacingMode::Normal);
        // Failure counter survives the cooldown
        assert_eq!(pacing.state().consecutive_failures, 1);
    }

    #[test]
    fn ban_cooldown_grows_beyond_threshold() {
        let (mut pacing, _) = controller(PacingConfig::default());

        for _ in 0..7 {
            pacing.on_failure(&timeout());
        }
        pacing.on_failure(&Failure::new(FailureKind::HttpStatus(503)));

        // 8 failures, 3 past the threshold
        assert_eq!(pacing.get_interval(), Duration::from_secs(480));
    }

    #[test]
    fn should_stop_expires_elapsed_ban() {
        let (mut pacing, clock) = controller(PacingConfig::default());

        pacing.on_failure(&Failure::new(FailureKind::HttpStatus(429)));
        assert!(pacing.should_stop());

        clock.advance(TimeDelta::seconds(61));
        assert!(!pacing.should_stop());
        assert_eq!(pacing.mode(), PacingMode::Normal);
    }

    #[test]
    fn success_clears_ban() {
        let (mut pacing, _) = controller(PacingConfig::default());

        pacing.on_failure(&Failure::new(FailureKind::HttpStatus(429)));
        pacing.on_success();

        assert_eq!(pacing.mode(), PacingMode::Normal);
        assert!(pacing.state().ban_until.is_none());
        assert!(!pacing.should_stop());
    }

    #[test]
    fn daily_limit_stops() {
        let (mut pacing, _) = controller(PacingConfig::default().with_daily_limit(3));

        pacing.on_success();
        pacing.on_failure(&timeout());
        assert!(!pacing.should_stop());

        pacing.on_success();
        assert!(pacing.should_stop());
        assert_eq!(pacing.status().remaining_requests, 0);
    }

    #[test]
    fn daily_count_resets_on_new_day() {
        let (mut pacing, clock) = controller(PacingConfig::default().with_daily_limit(2));

        pacing.on_success();
        pacing.on_success();
        assert!(pacing.should_stop());

        clock.advance(TimeDelta::hours(12));
        assert!(!pacing.should_stop());
        assert_eq!(pacing.state().daily_count, 0);
    }

    #[test]
    fn status_and_reset() {
        let (mut pacing, _) = controller(PacingConfig::default());

        for _ in 0..5 {
            pacing.on_failure(&timeout());
        }
        let status = pacing.status();
        assert_eq!(status.mode, PacingMode::Throttled);
        assert_eq!(status.consecutive_failures, 5);
        assert_eq!(status.daily_count, 5);
        assert_eq!(status.remaining_requests, 995);
        assert!(status.to_string().starts_with("throttled"));

        pacing.reset();
        assert_eq!(pacing.mode(), PacingMode::Normal);
        assert_eq!(pacing.state().consecutive_failures, 0);
        assert_eq!(pacing.get_interval(), Duration::from_secs(5));
    }

    #[test]
    fn jitter_stays_in_bounds() {
        let (pacing, _) = controller(PacingConfig::default());
        let interval = Duration::from_secs(10);

        for _ in 0..200 {
            let wait = pacing.jittered(interval);
            assert!(wait >= Duration::from_secs(8));
            assert!(wait <= Duration::from_secs(12));
        }
    }

    #[test]
    fn jitter_respects_floor() {
        let (pacing, _) = controller(PacingConfig::default());

        for _ in 0..50 {
            assert!(pacing.jittered(Duration::from_millis(200)) >= Duration::from_secs(1));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn wait_interval_sleeps() {
        let (mut pacing, _) = controller(PacingConfig::default());

        let before = tokio::time::Instant::now();
        let waited = pacing.wait_interval().await;

        assert!(waited >= Duration::from_secs(4));
        assert!(waited <= Duration::from_secs(6));
        assert!(before.elapsed() >= waited);
    }
}
