use crate::DbError;
use chrono::{NaiveDate, Utc};
use core_types::{DataQualityResult, KpiDefinition, KpiValue, PipelineRun, RawArtifact, RunStatus};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;
use sqlx::{FromRow, Sqlite, Transaction};
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

/// The `DbRepository` provides a high-level, application-specific interface
/// to the audit ledger. It encapsulates all SQL queries and data access logic.
#[derive(Debug, Clone)]
pub struct DbRepository {
    pool: SqlitePool,
}

/// This struct represents a row fetched from the `pipeline_runs` table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DbPipelineRun {
    pub run_id: String,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub config_version: String,
    pub source_revision: String,
    pub status: String,
    pub canonical_hash: Option<String>,
    pub catalog_version: Option<String>,
}

/// A row from `kpi_values`. Decimals are kept as their exact text form.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DbKpiValue {
    pub run_id: String,
    pub as_of: String,
    pub kpi_name: String,
    pub kpi_def_version: String,
    pub value: Option<String>,
    pub precision: i64,
    pub raw_content_hash: String,
    pub canonical_hash: String,
    pub threshold_status: String,
    pub context: String,
}

impl DbKpiValue {
    pub fn decimal_value(&self) -> Result<Option<Decimal>, DbError> {
        self.value
            .as_deref()
            .map(Decimal::from_str)
            .transpose()
            .map_err(|e| DbError::CorruptRow { column: "value".to_string(), message: e.to_string() })
    }

    pub fn as_of_date(&self) -> Result<NaiveDate, DbError> {
        NaiveDate::parse_from_str(&self.as_of, "%Y-%m-%d")
            .map_err(|e| DbError::CorruptRow { column: "as_of".to_string(), message: e.to_string() })
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DbRawArtifact {
    pub artifact_id: String,
    pub run_id: String,
    pub source: String,
    pub as_of: String,
    pub content_hash: String,
    pub storage_uri: String,
    pub byte_len: i64,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DbDataQuality {
    pub run_id: String,
    pub completeness: f64,
    pub freshness_hours: f64,
    pub referential_integrity_pass: bool,
    pub notes: String,
}

/// Everything a successful run writes, committed as one unit.
#[derive(Debug, Clone, Copy)]
pub struct RunRecord<'a> {
    pub run: &'a PipelineRun,
    pub catalog_version: &'a str,
    pub canonical_hash: &'a str,
    pub artifacts: &'a [RawArtifact],
    pub definitions: &'a [KpiDefinition],
    pub values: &'a [KpiValue],
    pub quality: &'a DataQualityResult,
}

fn date_text(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

impl DbRepository {
    /// Creates a new `DbRepository` with a shared database connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Writes a run and everything it produced in a single transaction: either all of
    /// it becomes durable or none of it does. Re-saving the same run is a no-op for
    /// rows that already exist, so retries and reruns never duplicate values.
    ///
    /// A run the ledger already holds as `failed` or `canceled` is refused with
    /// `RunAlreadyTerminal` and nothing is written.
    pub async fn save_run_bundle(&self, record: RunRecord<'_>) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<(String,)> = sqlx::query_as("SELECT status FROM pipeline_runs WHERE run_id = ?")
            .bind(record.run.run_id.to_string())
            .fetch_optional(&mut *tx)
            .await?;
        if let Some((status,)) = existing {
            if status == RunStatus::Failed.as_str() || status == RunStatus::Canceled.as_str() {
                return Err(DbError::RunAlreadyTerminal { run_id: record.run.run_id.to_string(), status });
            }
        }

        upsert_run(&mut tx, record.run, Some(record.canonical_hash), Some(record.catalog_version)).await?;
        for artifact in record.artifacts {
            insert_artifact(&mut tx, artifact).await?;
        }
        for definition in record.definitions {
            insert_definition(&mut tx, definition).await?;
        }
        for value in record.values {
            insert_kpi_value(&mut tx, value).await?;
        }
        upsert_data_quality(&mut tx, record.quality).await?;

        tx.commit().await?;
        info!(
            run_id = %record.run.run_id,
            values = record.values.len(),
            status = %record.run.status,
            "Run committed to audit ledger"
        );
        Ok(())
    }

    /// Records just the run row, e.g. a terminal `failed`/`canceled` status.
    /// Never touches values, and never changes a run that is already terminal.
    pub async fn record_run_status(&self, run: &PipelineRun) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;
        upsert_run(&mut tx, run, None, None).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_run(&self, run_id: Uuid) -> Result<DbPipelineRun, DbError> {
        sqlx::query_as::<_, DbPipelineRun>(
            r#"
            SELECT run_id, started_at, ended_at, config_version, source_revision, status,
                   canonical_hash, catalog_version
            FROM pipeline_runs
            WHERE run_id = ?
            "#,
        )
        .bind(run_id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(DbError::NotFound)
    }

    /// Values persisted for a run, ordered by KPI name.
    pub async fn get_kpi_values_for_run(&self, run_id: Uuid) -> Result<Vec<DbKpiValue>, DbError> {
        let rows = sqlx::query_as::<_, DbKpiValue>(
            r#"
            SELECT run_id, as_of, kpi_name, kpi_def_version, value, precision,
                   raw_content_hash, canonical_hash, threshold_status, context
            FROM kpi_values
            WHERE run_id = ?
            ORDER BY kpi_name ASC
            "#,
        )
        .bind(run_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Values persisted for one `(run_id, as_of)` snapshot, ordered by KPI name.
    pub async fn get_kpi_values_as_of(&self, run_id: Uuid, as_of: NaiveDate) -> Result<Vec<DbKpiValue>, DbError> {
        let rows = sqlx::query_as::<_, DbKpiValue>(
            r#"
            SELECT run_id, as_of, kpi_name, kpi_def_version, value, precision,
                   raw_content_hash, canonical_hash, threshold_status, context
            FROM kpi_values
            WHERE run_id = ? AND as_of = ?
            ORDER BY kpi_name ASC
            "#,
        )
        .bind(run_id.to_string())
        .bind(date_text(as_of))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn count_kpi_values(&self, run_id: Uuid) -> Result<i64, DbError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM kpi_values WHERE run_id = ?")
            .bind(run_id.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn get_artifacts_for_run(&self, run_id: Uuid) -> Result<Vec<DbRawArtifact>, DbError> {
        let rows = sqlx::query_as::<_, DbRawArtifact>(
            r#"
            SELECT artifact_id, run_id, source, as_of, content_hash, storage_uri, byte_len
            FROM raw_artifacts
            WHERE run_id = ?
            ORDER BY source ASC
            "#,
        )
        .bind(run_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn get_data_quality(&self, run_id: Uuid) -> Result<DbDataQuality, DbError> {
        sqlx::query_as::<_, DbDataQuality>(
            r#"
            SELECT run_id, completeness, freshness_hours, referential_integrity_pass, notes
            FROM data_quality_results
            WHERE run_id = ?
            "#,
        )
        .bind(run_id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(DbError::NotFound)
    }

    /// Every `(kpi_name, formula_version)` the ledger has seen.
    pub async fn count_definitions(&self) -> Result<i64, DbError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM kpi_definitions")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Removes a run and, through the cascading foreign keys, its artifacts, values
    /// and data-quality row. Returns whether a run was deleted.
    pub async fn delete_run(&self, run_id: Uuid) -> Result<bool, DbError> {
        let result = sqlx::query("DELETE FROM pipeline_runs WHERE run_id = ?")
            .bind(run_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

async fn upsert_run(
    tx: &mut Transaction<'_, Sqlite>,
    run: &PipelineRun,
    canonical_hash: Option<&str>,
    catalog_version: Option<&str>,
) -> Result<(), DbError> {
    sqlx::query(
        r#"
        INSERT INTO pipeline_runs
            (run_id, started_at, ended_at, config_version, source_revision, status, canonical_hash, catalog_version)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (run_id) DO UPDATE SET
            ended_at = excluded.ended_at,
            status = excluded.status,
            canonical_hash = COALESCE(excluded.canonical_hash, pipeline_runs.canonical_hash),
            catalog_version = COALESCE(excluded.catalog_version, pipeline_runs.catalog_version)
        WHERE pipeline_runs.status = 'running'
        "#,
    )
    .bind(run.run_id.to_string())
    .bind(run.started_at.to_rfc3339())
    .bind(run.ended_at.map(|t| t.to_rfc3339()))
    .bind(&run.config_version)
    .bind(&run.source_revision)
    .bind(run.status.as_str())
    .bind(canonical_hash)
    .bind(catalog_version)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_artifact(tx: &mut Transaction<'_, Sqlite>, artifact: &RawArtifact) -> Result<(), DbError> {
    // Artifacts are immutable: the id is derived from the content, so a conflict
    // means the identical artifact is already recorded.
    sqlx::query(
        r#"
        INSERT INTO raw_artifacts (artifact_id, run_id, source, as_of, content_hash, storage_uri, byte_len)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (artifact_id) DO NOTHING
        "#,
    )
    .bind(&artifact.artifact_id)
    .bind(artifact.run_id.to_string())
    .bind(&artifact.source)
    .bind(date_text(artifact.as_of))
    .bind(&artifact.content_hash)
    .bind(&artifact.storage_uri)
    .bind(i64::try_from(artifact.byte_len).unwrap_or(i64::MAX))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_definition(tx: &mut Transaction<'_, Sqlite>, definition: &KpiDefinition) -> Result<(), DbError> {
    let source_columns = serde_json::to_string(&definition.source_columns)?;
    sqlx::query(
        r#"
        INSERT INTO kpi_definitions
            (kpi_name, formula_version, formula, aggregation_window, direction, owning_group,
             source_table, source_columns, unit, precision, warning_threshold, critical_threshold, first_seen_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (kpi_name, formula_version) DO NOTHING
        "#,
    )
    .bind(&definition.kpi_name)
    .bind(&definition.formula_version)
    .bind(&definition.formula)
    .bind(definition.window.as_str())
    .bind(definition.direction.as_str())
    .bind(definition.owning_group.as_str())
    .bind(definition.source_table.as_str())
    .bind(source_columns)
    .bind(definition.unit.as_str())
    .bind(i64::from(definition.precision))
    .bind(definition.thresholds.warning.map(|d| d.to_string()))
    .bind(definition.thresholds.critical.map(|d| d.to_string()))
    .bind(Utc::now().to_rfc3339())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_kpi_value(tx: &mut Transaction<'_, Sqlite>, value: &KpiValue) -> Result<(), DbError> {
    let context = serde_json::to_string(&value.context)?;
    let result = sqlx::query(
        r#"
        INSERT INTO kpi_values
            (run_id, as_of, kpi_name, kpi_def_version, value, precision, raw_content_hash,
             canonical_hash, threshold_status, context, recorded_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (run_id, as_of, kpi_name, kpi_def_version) DO NOTHING
        "#,
    )
    .bind(value.run_id.to_string())
    .bind(date_text(value.as_of))
    .bind(&value.kpi_name)
    .bind(&value.kpi_def_version)
    .bind(value.value.map(|v| v.to_string()))
    .bind(i64::from(value.precision))
    .bind(&value.raw_content_hash)
    .bind(&value.canonical_hash)
    .bind(value.threshold_status.as_str())
    .bind(context)
    .bind(Utc::now().to_rfc3339())
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        debug!(kpi = %value.kpi_name, run_id = %value.run_id, "KPI value already recorded; skipped");
    }
    Ok(())
}

async fn upsert_data_quality(tx: &mut Transaction<'_, Sqlite>, quality: &DataQualityResult) -> Result<(), DbError> {
    let notes = serde_json::to_string(&quality.notes)?;
    sqlx::query(
        r#"
        INSERT INTO data_quality_results
            (run_id, completeness, freshness_hours, referential_integrity_pass, notes,
             rows_received, rows_accepted, duplicates_removed, null_cells)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (run_id) DO NOTHING
        "#,
    )
    .bind(quality.run_id.to_string())
    .bind(quality.completeness)
    .bind(quality.freshness_hours)
    .bind(quality.referential_integrity_pass)
    .bind(notes)
    .bind(quality.rows_received as i64)
    .bind(quality.rows_accepted as i64)
    .bind(quality.duplicates_removed as i64)
    .bind(quality.null_cells as i64)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
