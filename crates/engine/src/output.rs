use crate::error::PipelineError;
use analytics::ResultBundle;
use chrono::{DateTime, NaiveDate, Utc};
use core_types::{AuditLog, KpiDefinition, RawArtifact, RunStatus};
use parity::ParityReport;
use polars::prelude::*;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

pub const RESULTS_JSON: &str = "kpi_results.json";
pub const RESULTS_CSV: &str = "kpi_results.csv";
pub const AUDIT_LOG: &str = "audit_log.json";
pub const PARITY_REPORT: &str = "parity_report.json";
pub const MANIFEST: &str = "manifest.json";

/// Digest of one exported file, recorded in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileDigest {
    pub file: String,
    pub sha256: String,
    pub bytes: u64,
}

/// The last file written for a run: what was exported and how the run ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Manifest {
    pub run_id: Uuid,
    pub as_of: NaiveDate,
    pub status: RunStatus,
    pub generated_at: DateTime<Utc>,
    pub config_version: String,
    pub catalog_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canonical_hash: Option<String>,
    pub kpi_count: usize,
    pub failed_kpi_count: usize,
    pub persisted: bool,
    pub files: Vec<FileDigest>,
    pub raw_artifacts: Vec<RawArtifact>,
}

/// Writes a run's artifacts into one output directory.
pub struct OutputWriter {
    dir: PathBuf,
    written: Vec<FileDigest>,
}

impl OutputWriter {
    pub fn create(dir: &Path) -> Result<Self, PipelineError> {
        std::fs::create_dir_all(dir).map_err(|e| output_error(dir, e))?;
        Ok(Self { dir: dir.to_path_buf(), written: Vec::new() })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn written(&self) -> &[FileDigest] {
        &self.written
    }

    /// `{"run_id": ..., "timestamp": ..., "<kpi>": <number|null>, ...}`
    pub fn write_results_json(
        &mut self,
        bundle: &ResultBundle,
        timestamp: DateTime<Utc>,
    ) -> Result<(), PipelineError> {
        let mut object = serde_json::Map::new();
        object.insert("run_id".to_string(), bundle.run_id.to_string().into());
        object.insert("timestamp".to_string(), timestamp.to_rfc3339().into());
        object.insert("as_of".to_string(), bundle.as_of.to_string().into());
        for value in &bundle.values {
            let number = value.value.and_then(|v| v.to_f64());
            object.insert(value.kpi_name.clone(), serde_json::json!(number));
        }
        let bytes = to_json(&serde_json::Value::Object(object), RESULTS_JSON)?;
        self.write(RESULTS_JSON, &bytes)
    }

    /// Flat `metric_name,value,unit,date` export. Values keep their exact decimal text.
    pub fn write_results_csv(&mut self, bundle: &ResultBundle) -> Result<(), PipelineError> {
        let unit_of = |name: &str| {
            bundle
                .definitions
                .iter()
                .find(|d: &&KpiDefinition| d.kpi_name == name)
                .map(|d| d.unit.as_str())
                .unwrap_or("")
        };
        let names: Vec<&str> = bundle.values.iter().map(|v| v.kpi_name.as_str()).collect();
        let values: Vec<Option<String>> = bundle.values.iter().map(|v| v.value.map(|d| d.to_string())).collect();
        let units: Vec<&str> = names.iter().map(|n| unit_of(n)).collect();
        let dates: Vec<String> = vec![bundle.as_of.to_string(); names.len()];

        let mut frame = DataFrame::new(vec![
            Series::new("metric_name", names),
            Series::new("value", values),
            Series::new("unit", units),
            Series::new("date", dates),
        ])
        .map_err(|e| csv_error(&self.dir, e))?;

        let mut bytes = Vec::new();
        CsvWriter::new(&mut bytes)
            .include_header(true)
            .finish(&mut frame)
            .map_err(|e| csv_error(&self.dir, e))?;
        self.write(RESULTS_CSV, &bytes)
    }

    pub fn write_audit_log(&mut self, audit: &AuditLog) -> Result<(), PipelineError> {
        let bytes = to_json(audit, AUDIT_LOG)?;
        self.write(AUDIT_LOG, &bytes)
    }

    pub fn write_parity_report(&mut self, report: &ParityReport) -> Result<(), PipelineError> {
        let bytes = to_json(report, PARITY_REPORT)?;
        self.write(PARITY_REPORT, &bytes)
    }

    /// Finalizes the manifest with every file written so far and writes it last.
    pub fn write_manifest(&mut self, mut manifest: Manifest) -> Result<Manifest, PipelineError> {
        manifest.files = self.written.clone();
        let bytes = to_json(&manifest, MANIFEST)?;
        let path = self.dir.join(MANIFEST);
        std::fs::write(&path, &bytes).map_err(|e| output_error(&path, e))?;
        Ok(manifest)
    }

    fn write(&mut self, file: &str, bytes: &[u8]) -> Result<(), PipelineError> {
        let path = self.dir.join(file);
        std::fs::write(&path, bytes).map_err(|e| output_error(&path, e))?;
        let digest = FileDigest {
            file: file.to_string(),
            sha256: hex::encode(Sha256::digest(bytes)),
            bytes: bytes.len() as u64,
        };
        debug!(file, bytes = digest.bytes, sha256 = %digest.sha256, "Output file written");
        self.written.retain(|d| d.file != file);
        self.written.push(digest);
        Ok(())
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T, file: &str) -> Result<Vec<u8>, PipelineError> {
    serde_json::to_vec_pretty(value)
        .map_err(|e| PipelineError::Output { path: file.to_string(), message: e.to_string() })
}

fn output_error(path: &Path, error: std::io::Error) -> PipelineError {
    PipelineError::Output { path: path.display().to_string(), message: error.to_string() }
}

fn csv_error(dir: &Path, error: PolarsError) -> PipelineError {
    PipelineError::Output { path: dir.join(RESULTS_CSV).display().to_string(), message: error.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::{KpiContext, KpiValue, ThresholdStatus};
    use rust_decimal_macros::dec;

    fn bundle() -> ResultBundle {
        let as_of = NaiveDate::from_ymd_opt(2026, 9, 30).unwrap();
        let value = |name: &str, v| KpiValue {
            run_id: Uuid::nil(),
            as_of,
            kpi_name: name.to_string(),
            value: v,
            precision: 2,
            raw_content_hash: "raw".to_string(),
            canonical_hash: "canonical".to_string(),
            kpi_def_version: "1.0.0".to_string(),
            threshold_status: ThresholdStatus::Unknown,
            context: KpiContext::new("test"),
        };
        ResultBundle {
            run_id: Uuid::nil(),
            as_of,
            canonical_hash: "canonical".to_string(),
            values: vec![value("collection_rate_pct", Some(dec!(96.90))), value("par_30_pct", None)],
            definitions: analytics::catalog::definitions(),
            events: Vec::new(),
        }
    }

    #[test]
    fn results_are_exported_as_json_and_csv() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = OutputWriter::create(dir.path()).unwrap();
        writer.write_results_json(&bundle(), Utc::now()).unwrap();
        writer.write_results_csv(&bundle()).unwrap();

        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join(RESULTS_JSON)).unwrap()).unwrap();
        assert_eq!(json["collection_rate_pct"], serde_json::json!(96.9));
        assert!(json["par_30_pct"].is_null());
        assert_eq!(json["run_id"], Uuid::nil().to_string());

        let csv = std::fs::read_to_string(dir.path().join(RESULTS_CSV)).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "metric_name,value,unit,date");
        assert_eq!(lines[1], "collection_rate_pct,96.90,percent,2026-09-30");
        assert_eq!(lines[2], "par_30_pct,,percent,2026-09-30");
    }

    #[test]
    fn manifest_lists_digests_of_every_file_written_before_it() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = OutputWriter::create(&dir.path().join("nested")).unwrap();
        writer.write_results_json(&bundle(), Utc::now()).unwrap();
        writer.write_audit_log(&AuditLog::new()).unwrap();

        let manifest = writer
            .write_manifest(Manifest {
                run_id: Uuid::nil(),
                as_of: NaiveDate::from_ymd_opt(2026, 9, 30).unwrap(),
                status: RunStatus::Success,
                generated_at: Utc::now(),
                config_version: "2026.10".to_string(),
                catalog_version: "2026.10".to_string(),
                canonical_hash: Some("canonical".to_string()),
                kpi_count: 2,
                failed_kpi_count: 0,
                persisted: false,
                files: Vec::new(),
                raw_artifacts: Vec::new(),
            })
            .unwrap();

        let names: Vec<&str> = manifest.files.iter().map(|f| f.file.as_str()).collect();
        assert_eq!(names, vec![RESULTS_JSON, AUDIT_LOG]);
        let audit_bytes = std::fs::read(dir.path().join("nested").join(AUDIT_LOG)).unwrap();
        assert_eq!(manifest.files[1].sha256, hex::encode(Sha256::digest(&audit_bytes)));
        assert!(dir.path().join("nested").join(MANIFEST).exists());
    }
}
