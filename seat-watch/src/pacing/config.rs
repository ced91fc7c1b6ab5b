//! Pacing configuration.

use std::time::Duration;

use serde::Deserialize;

/// Configuration parameters for request pacing.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    /// Shortest interval between requests (seconds).
    /// Successes never shrink the interval below this.
    pub min_interval_secs: f64,

    /// Longest interval between requests (seconds).
    /// Throttling never grows the interval above this.
    pub max_interval_secs: f64,

    /// Requests allowed per local calendar day.
    pub daily_limit: u32,

    /// Consecutive failures before the controller throttles.
    pub failure_threshold: u32,

    /// Interval multiplier applied once the failure counter is clear.
    pub shrink_factor: f64,

    /// Interval multiplier applied while throttled.
    pub grow_factor: f64,

    /// Cooldown for a ban detected at the failure threshold (seconds).
    /// Doubles for every failure beyond the threshold.
    pub ban_base_secs: u64,

    /// Upper bound on a ban cooldown (seconds).
    pub max_ban_secs: u64,

    /// Symmetric jitter as a fraction of the interval.
    pub jitter: f64,

    /// Shortest wait ever performed (seconds).
    pub min_wait_secs: f64,

    /// What counts as a sign of being banned.
    pub ban_indicators: BanIndicators,
}

impl PacingConfig {
    /// Set the interval bounds.
    pub fn with_interval(mut self, min_secs: f64, max_secs: f64) -> Self {
        self.min_interval_secs = min_secs;
        self.max_interval_secs = max_secs;
        self
    }

    /// Set the daily request limit.
    pub fn with_daily_limit(mut self, limit: u32) -> Self {
        self.daily_limit = limit;
        self
    }

    /// Set the consecutive failure threshold.
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Returns the minimum interval as a Duration.
    pub fn min_interval(&self) -> Duration {
        seconds(self.min_interval_secs)
    }

    /// Returns the maximum interval as a Duration.
    pub fn max_interval(&self) -> Duration {
        seconds(self.max_interval_secs.max(self.min_interval_secs))
    }

    /// Returns the base ban cooldown as a Duration.
    pub fn ban_base(&self) -> Duration {
        Duration::from_secs(self.ban_base_secs)
    }

    /// Returns the maximum ban cooldown as a Duration.
    pub fn max_ban(&self) -> Duration {
        Duration::from_secs(self.max_ban_secs)
    }

    /// Returns the wait floor as a Duration.
    pub fn min_wait(&self) -> Duration {
        seconds(self.min_wait_secs)
    }

    /// Cooldown for a ban detected with the given consecutive failure count.
    pub fn ban_cooldown(&self, failures: u32) -> Duration {
        let excess = failures.saturating_sub(self.failure_threshold);
        let factor = 2u32.checked_pow(excess).unwrap_or(u32::MAX);
        self.ban_base().saturating_mul(factor).min(self.max_ban())
    }
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            min_interval_secs: 5.0,
            max_interval_secs: 15.0,
            daily_limit: 1000,
            failure_threshold: 5,
            shrink_factor: 0.9,
            grow_factor: 1.5,
            ban_base_secs: 60,
            max_ban_secs: 1800, // 30 minutes
            jitter: 0.2,
            min_wait_secs: 1.0,
            ban_indicators: BanIndicators::default(),
        }
    }
}

/// Signals in a failed response that suggest the service has banned us.
///
/// The defaults are a known-incomplete list; extend them from configuration
/// as new messages are observed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BanIndicators {
    /// HTTP statuses treated as a ban.
    pub statuses: Vec<u16>,
    /// Substrings of response messages treated as a ban.
    pub fragments: Vec<String>,
}

impl BanIndicators {
    /// Add a message fragment.
    pub fn with_fragment(mut self, fragment: impl Into<String>) -> Self {
        self.fragments.push(fragment.into());
        self
    }

    /// Add an HTTP status.
    pub fn with_status(mut self, status: u16) -> Self {
        if !self.statuses.contains(&status) {
            self.statuses.push(status);
        }
        self
    }

    /// Whether the status or any message matches.
    pub fn matches<'a>(
        &self,
        status: Option<u16>,
        messages: impl IntoIterator<Item = &'a str>,
    ) -> bool {
        if status.is_some_and(|s| self.statuses.contains(&s)) {
            return true;
        }
        messages.into_iter().any(|msg| {
            self.fragments
                .iter()
                .any(|f| !f.is_empty() && msg.contains(f.as_str()))
        })
    }
}

impl Default for BanIndicators {
    fn default() -> Self {
        Self {
            statuses: vec![403, 429, 503],
            fragments: [
                "captcha login out",
                "登录超时",
                "用户已被锁定",
                "网络繁忙",
                "服务不可用",
                "系统繁忙",
                "操作失败",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

/// Non-negative seconds as a Duration, saturating on overflow.
fn seconds(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = PacingConfig::default();

        assert_eq!(config.min_interval(), Duration::from_secs(5));
        assert_eq!(config.max_interval(), Duration::from_secs(15));
        assert_eq!(config.daily_limit, 1000);
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.min_wait(), Duration::from_secs(1));
    }

    #[test]
    fn ban_cooldown_grows_and_caps() {
        let config = PacingConfig::default();

        assert_eq!(config.ban_cooldown(0), Duration::from_secs(60));
        assert_eq!(config.ban_cooldown(5), Duration::from_secs(60));
        assert_eq!(config.ban_cooldown(6), Duration::from_secs(120));
        assert_eq!(config.ban_cooldown(8), Duration::from_secs(480));
        assert_eq!(config.ban_cooldown(10), Duration::from_secs(1800));
        assert_eq!(config.ban_cooldown(u32::MAX), Duration::from_secs(1800));
    }

    #[test]
    fn ban_cooldown_saturates_without_cap() {
        let config = PacingConfig {
            max_ban_secs: u64::MAX,
            ..PacingConfig::default()
        };

        assert_eq!(config.ban_cooldown(5 + 31), Duration::from_secs(60 << 31));
        assert_eq!(
            config.ban_cooldown(5 + 32),
            Duration::from_secs(60 * u64::from(u32::MAX))
        );
        assert_eq!(
            config.ban_cooldown(u32::MAX),
            Duration::from_secs(60 * u64::from(u32::MAX))
        );
    }

    #[test]
    fn indicators_match_status() {
        let indicators = BanIndicators::default();

        assert!(indicators.matches(Some(429), []));
        assert!(indicators.matches(Some(403), []));
        assert!(!indicators.matches(Some(500), []));
        assert!(!indicators.matches(None, []));
    }

    #[test]
    fn indicators_match_fragments() {
        let indicators = BanIndicators::default();

        assert!(indicators.matches(None, ["当前网络繁忙，请稍后再试"]));
        assert!(indicators.matches(None, ["ok", "captcha login out"]));
        assert!(!indicators.matches(None, ["查询成功"]));
    }

    #[test]
    fn indicators_are_extensible() {
        let indicators = BanIndicators::default()
            .with_fragment("请求过于频繁")
            .with_status(418);

        assert!(indicators.matches(None, ["请求过于频繁"]));
        assert!(indicators.matches(Some(418), []));
    }

    #[test]
    fn empty_fragment_never_matches() {
        let indicators = BanIndicators {
            statuses: vec![],
            fragments: vec![String::new()],
        };
        assert!(!indicators.matches(None, ["anything"]));
    }

    #[test]
    fn deserialize_partial_toml() {
        let config: PacingConfig = toml::from_str(
            r#"
            min_interval_secs = 3.0
            daily_limit = 200

            [ban_indicators]
            fragments = ["blocked"]
            "#,
        )
        .unwrap();

        assert_eq!(config.min_interval(), Duration::from_secs(3));
        assert_eq!(config.max_interval(), Duration::from_secs(15));
        assert_eq!(config.daily_limit, 200);
        assert_eq!(config.ban_indicators.statuses, vec![403, 429, 503]);
        assert_eq!(config.ban_indicators.fragments, vec!["blocked"]);
    }
}
