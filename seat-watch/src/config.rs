//! Application configuration.
//!
//! Everything the binary needs comes from one TOML file:
//!
//! ```toml
//! [target]
//! from = "BJP"
//! to = "SHH"
//! date = "2026-02-01"
//!
//! [criteria]
//! train_codes = ["G1", "G3"]
//! seats = ["二等座", "first"]
//!
//! [pacing]
//! min_interval_secs = 5.0
//!
//! [egress]
//! enabled = true
//!
//! [[egress.endpoints]]
//! host = "10.0.0.1"
//! port = 3128
//! ```
//!
//! Every section except `[target]` is optional.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::info;

use crate::domain::{SeatClass, SeatCountDecoder, SeatLabels};
use crate::egress::EgressConfig;
use crate::listing::{ListingConfig, QueryTarget, RecordParser, RecordSchema, SchemaError};
use crate::pacing::PacingConfig;
use crate::poll::{OrderCriteria, RunConfig};

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "SEAT_WATCH_CONFIG";

/// Environment variable holding the session cookie.
pub const COOKIE_ENV: &str = "SEAT_WATCH_COOKIE";

/// Config file used when neither an argument nor the environment names one.
pub const DEFAULT_CONFIG_PATH: &str = "seat-watch.toml";

/// Longest interval or wait accepted from configuration (one day).
const MAX_WAIT_SECS: f64 = 86_400.0;

/// Errors loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("unknown seat class: {0}")]
    UnknownSeat(String),

    #[error("invalid record schema: {0}")]
    Schema(#[from] SchemaError),
}

/// Order criteria as written in the file.
///
/// Seats may be given by key (`hard_sleep`), service code (`3`) or any
/// label in the label table (`硬卧`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CriteriaConfig {
    pub train_codes: Vec<String>,
    pub seats: Vec<String>,
    pub min_available: u32,
}

impl Default for CriteriaConfig {
    fn default() -> Self {
        Self {
            train_codes: Vec::new(),
            seats: Vec::new(),
            min_available: 1,
        }
    }
}

/// Record decoding settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Column layout override. The built-in layout is used when absent.
    pub schema: Option<RecordSchema>,
    /// Seat tokens meaning "plenty". The built-in tokens are used when
    /// empty.
    pub plentiful: Vec<String>,
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Serve listings from recorded JSON files in this directory instead of
    /// the live service.
    #[serde(default)]
    pub mock_dir: Option<PathBuf>,

    pub target: QueryTarget,

    #[serde(default)]
    pub criteria: CriteriaConfig,

    #[serde(default)]
    pub listing: ListingConfig,

    #[serde(default)]
    pub parser: ParserConfig,

    #[serde(default)]
    pub pacing: PacingConfig,

    #[serde(default)]
    pub egress: EgressConfig,

    /// Extra seat labels, label to seat class key.
    #[serde(default)]
    pub labels: HashMap<String, SeatClass>,

    #[serde(default)]
    pub run: RunConfig,
}

impl AppConfig {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let config: AppConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Check settings that deserialize fine but cannot work.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let pacing = &self.pacing;
        for (name, value) in [
            ("min_interval_secs", pacing.min_interval_secs),
            ("max_interval_secs", pacing.max_interval_secs),
            ("min_wait_secs", pacing.min_wait_secs),
        ] {
            if !value.is_finite() || value > MAX_WAIT_SECS {
                return Err(ConfigError::Invalid(format!(
                    "pacing.{name} must be a number of seconds up to {MAX_WAIT_SECS}"
                )));
            }
        }
        if pacing.min_wait_secs < 0.0 {
            return Err(ConfigError::Invalid(
                "pacing.min_wait_secs must not be negative".into(),
            ));
        }
        if !(pacing.shrink_factor > 0.0 && pacing.shrink_factor <= 1.0) {
            return Err(ConfigError::Invalid(
                "pacing.shrink_factor must be in (0, 1]".into(),
            ));
        }
        if !(pacing.grow_factor >= 1.0 && pacing.grow_factor.is_finite()) {
            return Err(ConfigError::Invalid(
                "pacing.grow_factor must be finite and at least 1".into(),
            ));
        }
        if pacing.min_interval_secs <= 0.0 {
            return Err(ConfigError::Invalid(
                "pacing.min_interval_secs must be positive".into(),
            ));
        }
        if pacing.min_interval_secs > pacing.max_interval_secs {
            return Err(ConfigError::Invalid(format!(
                "pacing interval bounds inverted: min {} > max {}",
                pacing.min_interval_secs, pacing.max_interval_secs
            )));
        }
        if pacing.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "pacing.failure_threshold must be at least 1".into(),
            ));
        }
        if pacing.daily_limit == 0 {
            return Err(ConfigError::Invalid(
                "pacing.daily_limit must be at least 1".into(),
            ));
        }
        if !(0.0..1.0).contains(&pacing.jitter) {
            return Err(ConfigError::Invalid(
                "pacing.jitter must be in [0, 1)".into(),
            ));
        }
        if self.egress.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "egress.failure_threshold must be at least 1".into(),
            ));
        }
        if self.listing.query_paths.is_empty() {
            return Err(ConfigError::Invalid(
                "listing.query_paths must not be empty".into(),
            ));
        }
        if let Some(schema) = &self.parser.schema {
            schema.validate()?;
        }
        self.order_criteria()?;
        Ok(())
    }

    /// Built-in seat labels plus the configured extras.
    pub fn seat_labels(&self) -> SeatLabels {
        let mut labels = SeatLabels::zh_cn();
        for (label, class) in &self.labels {
            labels.alias(label.clone(), *class);
        }
        labels
    }

    /// Order criteria with seat names resolved.
    pub fn order_criteria(&self) -> Result<OrderCriteria, ConfigError> {
        let labels = self.seat_labels();
        let classes = self
            .criteria
            .seats
            .iter()
            .map(|name| {
                labels
                    .class_for(name)
                    .ok_or_else(|| ConfigError::UnknownSeat(name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(OrderCriteria::default()
            .with_train_codes(self.criteria.train_codes.iter().cloned())
            .with_seat_classes(classes)
            .with_min_available(self.criteria.min_available))
    }

    /// Record parser for the configured schema and tokens.
    pub fn record_parser(&self) -> RecordParser {
        let schema = self.parser.schema.clone().unwrap_or_default();
        let decoder = if self.parser.plentiful.is_empty() {
            SeatCountDecoder::default()
        } else {
            SeatCountDecoder::new(self.parser.plentiful.iter().cloned())
        };
        RecordParser::new(schema, decoder)
    }
}

/// Resolve the config file path from the first argument, then the
/// environment, then the default.
pub fn config_path(arg: Option<String>) -> PathBuf {
    arg.or_else(|| std::env::var(CONFIG_PATH_ENV).ok())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
