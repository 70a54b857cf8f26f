use crate::error::ConfigError;
use std::path::Path;

// Declare the modules that make up this crate.
pub mod error;
pub mod settings;
pub mod telemetry;

// Re-export the core types to provide a clean public API.
pub use settings::{
    Config, IngestionSettings, LoggingSettings, ParitySettings, PersistenceSettings, PipelineSettings,
    RetryPolicy, ValidationSettings,
};
pub use telemetry::init_tracing;

/// Loads the pipeline configuration.
///
/// Sources are layered in order: built-in defaults, then the TOML file (the given
/// `path`, or an optional `config.toml` in the working directory), then environment
/// variables prefixed with `KPI__` using `__` as the section separator
/// (e.g. `KPI__PERSISTENCE__DATABASE_URL`).
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let file_source = match path {
        Some(path) => config::File::from(path).required(true),
        None => config::File::with_name("config.toml").required(false),
    };

    let builder = config::Config::builder()
        .add_source(file_source)
        .add_source(
            config::Environment::with_prefix("KPI")
                .prefix_separator("__")
                .separator("__"),
        )
        .build()?;

    let config = builder.try_deserialize::<Config>()?;
    config.validate()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;

    #[test]
    fn loads_partial_file_over_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[pipeline]
config_version = "2026.11"

[persistence]
database_url = "sqlite://ledger.db"

[parity]
default_tolerance = 0.02

[parity.tolerances]
par_30_pct = 0.01
"#
        )
        .unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.pipeline.config_version, "2026.11");
        assert_eq!(config.persistence.database_url.as_deref(), Some("sqlite://ledger.db"));
        assert_eq!(config.parity.default_tolerance, dec!(0.02));
        assert_eq!(config.parity.tolerance_for("par_30_pct"), dec!(0.01));
        // Untouched sections keep their defaults.
        assert_eq!(config.ingestion.breaker_failure_threshold, 3);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let result = load_config(Some(Path::new("/definitely/not/here.toml")));
        assert!(matches!(result, Err(ConfigError::LoadError(_))));
    }

    #[test]
    fn invalid_values_fail_validation() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[parity]\ndefault_tolerance = -0.5").unwrap();
        let result = load_config(Some(file.path()));
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }
}
