use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// The root configuration structure for the entire pipeline.
///
/// Built once at start-up and then passed, read-only, into every phase.
/// Every section has defaults, so an empty file is a valid configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pipeline: PipelineSettings,
    pub ingestion: IngestionSettings,
    pub validation: ValidationSettings,
    pub persistence: PersistenceSettings,
    pub parity: ParitySettings,
    pub logging: LoggingSettings,
}

impl Config {
    /// Checks the cross-field rules serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ingestion.retry.validate("ingestion.retry")?;
        self.persistence.retry.validate("persistence.retry")?;

        if self.ingestion.breaker_failure_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "ingestion.breaker_failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.parity.default_tolerance < Decimal::ZERO {
            return Err(ConfigError::ValidationError(
                "parity.default_tolerance must not be negative".to_string(),
            ));
        }
        if self.parity.epsilon <= Decimal::ZERO {
            return Err(ConfigError::ValidationError("parity.epsilon must be positive".to_string()));
        }
        if let Some((name, _)) = self.parity.tolerances.iter().find(|(_, t)| **t < Decimal::ZERO) {
            return Err(ConfigError::ValidationError(format!(
                "parity tolerance for '{}' must not be negative",
                name
            )));
        }
        Ok(())
    }
}

/// Run-level identity and scheduling settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Stamped on every `pipeline_runs` row.
    pub config_version: String,
    /// Revision of the code/config producing the run (e.g. a git sha).
    pub source_revision: String,
    /// Worker threads for KPI calculation. `0` lets rayon decide.
    pub max_workers: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            config_version: "2026.10".to_string(),
            source_revision: "unversioned".to_string(),
            max_workers: 0,
        }
    }
}

/// Exponential backoff parameters shared by ingestion and persistence.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: u32,
}

impl RetryPolicy {
    /// The pause before retry number `attempt` (1-based), capped at `max_backoff_ms`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = u64::from(self.multiplier.max(1)).saturating_pow(attempt.saturating_sub(1));
        let millis = self.initial_backoff_ms.saturating_mul(factor).min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }

    fn validate(&self, section: &str) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::ValidationError(format!(
                "{}.max_attempts must be at least 1",
                section
            )));
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(ConfigError::ValidationError(format!(
                "{}.max_backoff_ms must not be below initial_backoff_ms",
                section
            )));
        }
        Ok(())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
            multiplier: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestionSettings {
    pub timeout_secs: u64,
    pub retry: RetryPolicy,
    /// Consecutive failed attempts after which a source is disabled. Kept at or
    /// below `retry.max_attempts` so a single exhausted ingest trips the breaker.
    pub breaker_failure_threshold: u32,
    /// How long a disabled source stays disabled.
    pub breaker_cooldown_secs: u64,
    /// Name of the environment variable holding the bearer token for HTTP sources.
    pub auth_token_env: String,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            retry: RetryPolicy::default(),
            breaker_failure_threshold: 3,
            breaker_cooldown_secs: 60,
            auth_token_env: "KPI_SOURCE_TOKEN".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ValidationSettings {
    /// Snapshots older than this raise a `stale_data` warning.
    pub max_staleness_hours: f64,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self { max_staleness_hours: 72.0 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PersistenceSettings {
    /// SQLite URL of the audit ledger. `None` disables the relational sink.
    pub database_url: Option<String>,
    pub retry: RetryPolicy,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            database_url: Some("sqlite://kpi_audit.db".to_string()),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ParitySettings {
    pub enabled: bool,
    /// Relative tolerance applied when a KPI has no explicit entry (0.05 = 5%).
    pub default_tolerance: Decimal,
    /// Floor for the denominator of the relative delta.
    pub epsilon: Decimal,
    /// Per-KPI relative tolerances, keyed by KPI name.
    pub tolerances: BTreeMap<String, Decimal>,
}

impl ParitySettings {
    pub fn tolerance_for(&self, kpi_name: &str) -> Decimal {
        self.tolerances.get(kpi_name).copied().unwrap_or(self.default_tolerance)
    }
}

impl Default for ParitySettings {
    fn default() -> Self {
        let mut tolerances = BTreeMap::new();
        // Rate fields carry pricing decisions; hold them to 0.1%.
        tolerances.insert("weighted_avg_interest_rate_pct".to_string(), dec!(0.001));
        tolerances.insert("fee_yield_pct".to_string(), dec!(0.001));
        Self {
            enabled: true,
            default_tolerance: dec!(0.05),
            epsilon: dec!(0.000000001),
            tolerances,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default `EnvFilter` directive; `RUST_LOG` wins when set.
    pub level: String,
    /// When set, logs are also written to a daily-rolling file in this directory.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self { level: "info".to_string(), directory: None }
    }
}
