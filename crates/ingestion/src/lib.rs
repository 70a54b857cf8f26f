use crate::circuit_breaker::CircuitBreaker;
use crate::error::IngestionError;
use crate::fetch::{DefaultFetcher, SourceFetcher};
use crate::retry::{retry_with_backoff, RetryExhausted};
use chrono::NaiveDate;
use configuration::{IngestionSettings, RetryPolicy};
use core_types::{RawArtifact, RawTable};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

pub mod circuit_breaker;
pub mod error;
pub mod fetch;
pub mod parse;
pub mod retry;
pub mod source;

// --- Public API ---
pub use source::{SourceDescriptor, SourceFormat};

/// Acquires raw datasets: fetch with retry and circuit breaking, hash, then parse.
pub struct Ingestor {
    fetcher: Arc<dyn SourceFetcher>,
    retry: RetryPolicy,
    breaker: CircuitBreaker,
}

impl Ingestor {
    /// Builds an ingestor backed by the filesystem/HTTP fetcher.
    pub fn new(settings: &IngestionSettings) -> Result<Self, IngestionError> {
        let fetcher = DefaultFetcher::new(Duration::from_secs(settings.timeout_secs))?;
        Ok(Self::with_fetcher(Arc::new(fetcher), settings))
    }

    pub fn with_fetcher(fetcher: Arc<dyn SourceFetcher>, settings: &IngestionSettings) -> Self {
        Self {
            fetcher,
            retry: settings.retry.clone(),
            breaker: CircuitBreaker::new(
                settings.breaker_failure_threshold,
                Duration::from_secs(settings.breaker_cooldown_secs),
            ),
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Fetches `source` and returns the parsed table plus its lineage artifact.
    ///
    /// Every failure here is fatal to the run: exhausted retries surface as `Network`
    /// with the attempt count, rejected credentials as `Auth`, unparseable payloads as
    /// `Schema`, and a disabled source as `CircuitOpen`.
    #[instrument(skip(self, source), fields(source = %source))]
    pub async fn ingest(
        &self,
        source: &SourceDescriptor,
        run_id: Uuid,
        as_of: NaiveDate,
    ) -> Result<(RawTable, RawArtifact), IngestionError> {
        let name = source.name();

        let bytes = retry_with_backoff(&self.retry, "ingest", IngestionError::is_transient, |attempt| {
            let name = name.clone();
            async move {
                if let Err(remaining) = self.breaker.check(&name) {
                    return Err(IngestionError::CircuitOpen {
                        source_name: name,
                        retry_after_secs: remaining.as_secs().max(1),
                    });
                }
                match self.fetcher.fetch(source).await {
                    Ok(bytes) => {
                        self.breaker.record_success(&name);
                        Ok(bytes)
                    }
                    Err(e) => {
                        self.breaker.record_failure(&name);
                        Err(e.at_attempt(attempt))
                    }
                }
            }
        })
        .await
        .map_err(|RetryExhausted { attempts, last_error }| last_error.at_attempt(attempts))?;

        let content_hash = sha256_hex(&bytes);
        let table = parse::parse_table(&bytes, source.format())
            .map_err(|message| IngestionError::Schema { source_name: name.clone(), message })?;

        let artifact = RawArtifact {
            artifact_id: artifact_id(run_id, &name, &content_hash),
            run_id,
            source: name,
            as_of,
            content_hash,
            storage_uri: source.storage_uri(),
            byte_len: bytes.len() as u64,
        };

        info!(
            rows = table.len(),
            columns = table.columns.len(),
            bytes = artifact.byte_len,
            content_hash = %artifact.content_hash,
            "Raw dataset ingested"
        );
        Ok((table, artifact))
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Deterministic id: re-ingesting the same bytes for the same run and source yields
/// the same artifact row.
pub fn artifact_id(run_id: Uuid, source_name: &str, content_hash: &str) -> String {
    let digest = sha256_hex(format!("{}|{}|{}", run_id, source_name, content_hash).as_bytes());
    digest[..32].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyFetcher {
        failures_before_success: u32,
        calls: AtomicU32,
        body: &'static str,
    }

    #[async_trait]
    impl SourceFetcher for FlakyFetcher {
        async fn fetch(&self, source: &SourceDescriptor) -> Result<Vec<u8>, IngestionError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures_before_success {
                Err(IngestionError::Network {
                    source_name: source.name(),
                    attempts: 1,
                    message: "connection reset".to_string(),
                    transient: true,
                })
            } else {
                Ok(self.body.as_bytes().to_vec())
            }
        }
    }

    fn fast_settings() -> IngestionSettings {
        IngestionSettings {
            retry: RetryPolicy { max_attempts: 4, initial_backoff_ms: 1, max_backoff_ms: 5, multiplier: 2 },
            ..IngestionSettings::default()
        }
    }

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 9, 30).unwrap()
    }

    #[tokio::test]
    async fn recovers_from_transient_failures() {
        let fetcher = Arc::new(FlakyFetcher {
            failures_before_success: 2,
            calls: AtomicU32::new(0),
            body: "loan_id,customer_id\nL1,C1\n",
        });
        let ingestor = Ingestor::with_fetcher(fetcher.clone(), &fast_settings());
        let run_id = Uuid::new_v4();

        let (table, artifact) = ingestor
            .ingest(&SourceDescriptor::file("loans.csv"), run_id, as_of())
            .await
            .unwrap();

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 3);
        assert_eq!(table.len(), 1);
        assert_eq!(artifact.content_hash, sha256_hex(b"loan_id,customer_id\nL1,C1\n"));
        assert_eq!(artifact.artifact_id, artifact_id(run_id, "loans.csv", &artifact.content_hash));
        assert_eq!(artifact.artifact_id.len(), 32);
    }

    #[tokio::test]
    async fn exhausted_retries_report_attempt_count() {
        let fetcher = Arc::new(FlakyFetcher {
            failures_before_success: u32::MAX,
            calls: AtomicU32::new(0),
            body: "",
        });
        let settings = IngestionSettings { breaker_failure_threshold: 10, ..fast_settings() };
        let ingestor = Ingestor::with_fetcher(fetcher, &settings);

        let err = ingestor
            .ingest(&SourceDescriptor::file("loans.csv"), Uuid::new_v4(), as_of())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestionError::Network { attempts: 4, .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn breaker_opens_after_repeated_failures() {
        let fetcher = Arc::new(FlakyFetcher {
            failures_before_success: u32::MAX,
            calls: AtomicU32::new(0),
            body: "",
        });
        let ingestor = Ingestor::with_fetcher(fetcher.clone(), &fast_settings());
        let source = SourceDescriptor::file("loans.csv");

        // With the default threshold the third failed attempt opens the breaker and
        // the last attempt of the same ingest is refused without a fetch.
        let err = ingestor.ingest(&source, Uuid::new_v4(), as_of()).await.unwrap_err();
        assert!(matches!(err, IngestionError::CircuitOpen { .. }), "got {err:?}");
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 3);

        let err = ingestor.ingest(&source, Uuid::new_v4(), as_of()).await.unwrap_err();
        assert_eq!(err.kind(), "circuit_open");
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unparseable_payload_is_a_schema_error() {
        let fetcher = Arc::new(FlakyFetcher {
            failures_before_success: 0,
            calls: AtomicU32::new(0),
            body: "{\"records\": 7}",
        });
        let ingestor = Ingestor::with_fetcher(fetcher, &fast_settings());
        let err = ingestor
            .ingest(&SourceDescriptor::file("loans.json"), Uuid::new_v4(), as_of())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "schema");
    }

    #[tokio::test]
    async fn reads_local_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loans.csv");
        std::fs::write(&path, "loan_id,customer_id\nL1,C1\nL2,C2\n").unwrap();

        let ingestor = Ingestor::new(&fast_settings()).unwrap();
        let (table, artifact) = ingestor
            .ingest(&SourceDescriptor::file(&path), Uuid::new_v4(), as_of())
            .await
            .unwrap();
        assert_eq!(table.len(), 2);
        assert!(artifact.storage_uri.starts_with("file://"));
    }

    #[tokio::test]
    async fn missing_file_is_not_retried() {
        let ingestor = Ingestor::new(&fast_settings()).unwrap();
        let err = ingestor
            .ingest(&SourceDescriptor::file("/nonexistent/loans.csv"), Uuid::new_v4(), as_of())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "unavailable");
    }
}
