use async_trait::async_trait;
use chrono::NaiveDate;
use core_types::PipelineRun;
use database::{DbError, DbRepository, RunRecord};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use uuid::Uuid;

/// The durable side of the persist phase.
///
/// `DbRepository` is the production sink; the trait exists so the orchestrator
/// can be driven against sinks that fail on demand.
#[async_trait]
pub trait LedgerSink: Send + Sync {
    /// Upserts only the run row. Never writes values.
    async fn record_status(&self, run: &PipelineRun) -> Result<(), DbError>;

    /// Commits a run and everything it produced atomically.
    async fn save(&self, record: RunRecord<'_>) -> Result<(), DbError>;

    /// Reads back what the ledger holds for one run snapshot, keyed by KPI name.
    async fn persisted_values(
        &self,
        run_id: Uuid,
        as_of: NaiveDate,
    ) -> Result<BTreeMap<String, Option<Decimal>>, DbError>;
}

#[async_trait]
impl LedgerSink for DbRepository {
    async fn record_status(&self, run: &PipelineRun) -> Result<(), DbError> {
        self.record_run_status(run).await
    }

    async fn save(&self, record: RunRecord<'_>) -> Result<(), DbError> {
        self.save_run_bundle(record).await
    }

    async fn persisted_values(
        &self,
        run_id: Uuid,
        as_of: NaiveDate,
    ) -> Result<BTreeMap<String, Option<Decimal>>, DbError> {
        self.get_kpi_values_as_of(run_id, as_of)
            .await?
            .into_iter()
            .map(|row| Ok((row.kpi_name.clone(), row.decimal_value()?)))
            .collect()
    }
}
