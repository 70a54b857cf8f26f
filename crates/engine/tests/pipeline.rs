use async_trait::async_trait;
use chrono::NaiveDate;
use configuration::{Config, RetryPolicy};
use core_types::{EventStatus, NullReason, Phase, PipelineRun, RunStatus};
use database::{DbError, DbRepository, RunRecord};
use engine::{CancelFlag, LedgerSink, Pipeline, RunRequest};
use ingestion::{Ingestor, SourceDescriptor};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;
use uuid::Uuid;

const HEADER: &str = "loan_id,customer_id,segment,disbursement_date,disbursement_amount,interest_rate,\
origination_fee,total_receivable,days_past_due,total_eligible,cash_available";

fn as_of() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 9, 30).unwrap()
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy { max_attempts: 3, initial_backoff_ms: 1, max_backoff_ms: 2, multiplier: 2 }
}

fn config() -> Arc<Config> {
    let mut config = Config::default();
    config.ingestion.retry = fast_retry();
    config.persistence.retry = fast_retry();
    config.pipeline.max_workers = 2;
    Arc::new(config)
}

/// Two segments × twelve monthly cohorts.
fn loan_tape(receivable: impl Fn(u32) -> u32) -> String {
    let mut csv = format!("{HEADER}\n");
    for i in 1..=24u32 {
        let segment = if i <= 12 { "retail" } else { "sme" };
        let month = (i - 1) % 12 + 1;
        csv.push_str(&format!(
            "L{i:03},C{:03},{segment},2025-{month:02}-01,{},12.5,{},{},{},{},{}\n",
            i % 7,
            1000 + 100 * i,
            10 + i,
            receivable(i),
            (i * 7) % 120,
            1000 + 10 * i,
            950 + 9 * i,
        ));
    }
    csv
}

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self { dir: tempfile::tempdir().unwrap() }
    }

    fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn output(&self) -> PathBuf {
        self.dir.path().join("out")
    }

    async fn ledger(&self) -> DbRepository {
        let url = format!("sqlite://{}", self.dir.path().join("ledger.db").display());
        let pool = database::connect(&url).await.unwrap();
        database::run_migrations(&pool).await.unwrap();
        DbRepository::new(pool)
    }

    fn request(&self, tape: &Path) -> RunRequest {
        RunRequest::new(SourceDescriptor::file(tape), self.output(), as_of())
    }
}

fn pipeline(config: Arc<Config>, ledger: Option<Arc<dyn LedgerSink>>) -> Pipeline {
    let ingestor = Ingestor::new(&config.ingestion).unwrap();
    Pipeline::new(config, ingestor, ledger).unwrap()
}

#[tokio::test]
async fn clean_tape_runs_to_success_and_is_committed() {
    let ws = Workspace::new();
    let tape = ws.write("loans.csv", &loan_tape(|i| 500 + 50 * i));
    let repo = ws.ledger().await;
    let request = ws.request(&tape);

    let outcome = pipeline(config(), Some(Arc::new(repo.clone()))).run(&request, &CancelFlag::new()).await;

    assert_eq!(outcome.status, RunStatus::Success, "{:?}", outcome.errors);
    assert_eq!(outcome.phase, Phase::Parity);
    assert!(outcome.persisted);
    assert_eq!(outcome.exit_code(true), 0);
    assert_eq!(outcome.kpi_count, 12);
    assert_eq!(repo.count_kpi_values(request.run_id).await.unwrap(), 12);
    assert_eq!(repo.get_run(request.run_id).await.unwrap().status, "success");
    assert_eq!(repo.get_artifacts_for_run(request.run_id).await.unwrap().len(), 1);

    // The polars reference engine agrees with the decimal calculators.
    let parity = outcome.parity.as_ref().unwrap();
    assert_eq!(parity.mismatches, 0);
    assert_eq!(parity.reference_engine, "polars");

    let manifest = outcome.manifest.as_ref().unwrap();
    let files: Vec<&str> = manifest.files.iter().map(|f| f.file.as_str()).collect();
    assert_eq!(files, vec!["kpi_results.json", "kpi_results.csv", "audit_log.json", "parity_report.json"]);
    assert_eq!(manifest.status, RunStatus::Success);
    assert!(ws.output().join("manifest.json").exists());

    let phases: Vec<Phase> =
        outcome.audit.events().iter().filter(|e| e.kpi_name.is_none()).map(|e| e.phase).collect();
    assert_eq!(phases, vec![Phase::Ingest, Phase::Validate, Phase::Calculate, Phase::Persist, Phase::Parity]);
}

#[tokio::test]
async fn zero_receivable_nulls_par_and_still_succeeds() {
    let ws = Workspace::new();
    let tape = ws.write("loans.csv", &loan_tape(|_| 0));
    let repo = ws.ledger().await;
    let request = ws.request(&tape);

    let outcome = pipeline(config(), Some(Arc::new(repo.clone()))).run(&request, &CancelFlag::new()).await;

    assert_eq!(outcome.status, RunStatus::Success);
    let bundle = outcome.bundle.as_ref().unwrap();
    for name in ["par_30_pct", "par_60_pct", "par_90_pct"] {
        let value = bundle.value(name).unwrap();
        assert_eq!(value.value, None);
        assert_eq!(value.context.reason, Some(NullReason::ZeroDenominator));
    }
    assert_eq!(outcome.failed_kpis, 0);
    assert_eq!(outcome.parity.as_ref().unwrap().mismatches, 0);

    let stored = repo.get_kpi_values_for_run(request.run_id).await.unwrap();
    let par = stored.iter().find(|v| v.kpi_name == "par_30_pct").unwrap();
    assert_eq!(par.value, None);
    assert!(par.context.contains("zero_denominator"));
}

#[tokio::test]
async fn rerunning_the_same_run_id_does_not_duplicate_values() {
    let ws = Workspace::new();
    let tape = ws.write("loans.csv", &loan_tape(|i| 500 + 50 * i));
    let repo = ws.ledger().await;
    let request = ws.request(&tape);
    let pipeline = pipeline(config(), Some(Arc::new(repo.clone())));

    let first = pipeline.run(&request, &CancelFlag::new()).await;
    let count = repo.count_kpi_values(request.run_id).await.unwrap();
    let second = pipeline.run(&request, &CancelFlag::new()).await;

    assert_eq!(first.status, RunStatus::Success);
    assert_eq!(second.status, RunStatus::Success);
    assert_eq!(repo.count_kpi_values(request.run_id).await.unwrap(), count);
    assert_eq!(repo.count_definitions().await.unwrap(), 12);
}

#[tokio::test]
async fn missing_required_column_fails_in_validate_with_no_values() {
    let ws = Workspace::new();
    let tape: String = loan_tape(|i| 500 + 50 * i)
        .lines()
        .map(|line| {
            let mut cells: Vec<&str> = line.split(',').collect();
            cells.remove(8); // days_past_due
            cells.join(",") + "\n"
        })
        .collect();
    let tape = ws.write("loans.csv", &tape);
    let repo = ws.ledger().await;
    let request = ws.request(&tape);

    let outcome = pipeline(config(), Some(Arc::new(repo.clone()))).run(&request, &CancelFlag::new()).await;

    assert_eq!(outcome.status, RunStatus::Failed);
    assert_eq!(outcome.phase, Phase::Validate);
    assert_eq!(outcome.exit_code(false), 1);
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors[0].kind, "schema");
    assert_eq!(outcome.errors[0].columns, vec!["days_past_due".to_string()]);
    assert!(outcome.bundle.is_none());

    assert_eq!(repo.count_kpi_values(request.run_id).await.unwrap(), 0);
    assert_eq!(repo.get_run(request.run_id).await.unwrap().status, "failed");
    let manifest = outcome.manifest.as_ref().unwrap();
    assert_eq!(manifest.status, RunStatus::Failed);
    assert_eq!(manifest.kpi_count, 0);
}

#[tokio::test]
async fn missing_dataset_fails_in_ingest() {
    let ws = Workspace::new();
    let request = ws.request(&ws.dir.path().join("absent.csv"));

    let outcome = pipeline(config(), None).run(&RunRequest { dry_run: true, ..request }, &CancelFlag::new()).await;

    assert_eq!(outcome.status, RunStatus::Failed);
    assert_eq!(outcome.phase, Phase::Ingest);
    assert_eq!(outcome.errors[0].kind, "ingestion_unavailable");
}

#[tokio::test]
async fn cancellation_before_start_never_persists() {
    let ws = Workspace::new();
    let tape = ws.write("loans.csv", &loan_tape(|i| 500 + 50 * i));
    let repo = ws.ledger().await;
    let request = ws.request(&tape);
    let cancel = CancelFlag::new();
    cancel.cancel();

    let outcome = pipeline(config(), Some(Arc::new(repo.clone()))).run(&request, &cancel).await;

    assert_eq!(outcome.status, RunStatus::Canceled);
    assert_eq!(outcome.phase, Phase::Ingest);
    assert_eq!(outcome.exit_code(false), 2);
    assert!(!outcome.persisted);
    assert_eq!(repo.count_kpi_values(request.run_id).await.unwrap(), 0);
    assert_eq!(repo.get_run(request.run_id).await.unwrap().status, "canceled");
    let last = outcome.audit.events().last().unwrap();
    assert_eq!(last.status, EventStatus::Canceled);
}

#[tokio::test]
async fn replaying_a_canceled_run_id_commits_nothing() {
    let ws = Workspace::new();
    let tape = ws.write("loans.csv", &loan_tape(|i| 500 + 50 * i));
    let repo = ws.ledger().await;
    let request = ws.request(&tape);
    let pipeline = pipeline(config(), Some(Arc::new(repo.clone())));
    let cancel = CancelFlag::new();
    cancel.cancel();
    assert_eq!(pipeline.run(&request, &cancel).await.status, RunStatus::Canceled);

    let replay = pipeline.run(&request, &CancelFlag::new()).await;

    assert_eq!(replay.status, RunStatus::Failed);
    assert_eq!(replay.phase, Phase::Persist);
    assert!(!replay.persisted);
    assert_eq!(replay.errors[0].kind, "persistence");
    assert_eq!(replay.errors[0].attempt, Some(1));
    assert!(replay.errors[0].message.contains("canceled"));
    assert_eq!(repo.count_kpi_values(request.run_id).await.unwrap(), 0);
    assert_eq!(repo.get_run(request.run_id).await.unwrap().status, "canceled");
}

#[tokio::test]
async fn dry_run_writes_outputs_but_skips_the_ledger() {
    let ws = Workspace::new();
    let tape = ws.write("loans.csv", &loan_tape(|i| 500 + 50 * i));
    let repo = ws.ledger().await;
    let request = RunRequest { dry_run: true, ..ws.request(&tape) };

    let outcome = pipeline(config(), Some(Arc::new(repo.clone()))).run(&request, &CancelFlag::new()).await;

    assert_eq!(outcome.status, RunStatus::Success);
    assert!(!outcome.persisted);
    assert!(matches!(repo.get_run(request.run_id).await, Err(DbError::NotFound)));
    assert!(ws.output().join("kpi_results.json").exists());
    assert!(ws.output().join("kpi_results.csv").exists());
    assert!(!outcome.manifest.as_ref().unwrap().persisted);
}

/// A ledger that is permanently locked.
#[derive(Default)]
struct LockedLedger {
    saves: AtomicU32,
}

#[async_trait]
impl LedgerSink for LockedLedger {
    async fn record_status(&self, _run: &PipelineRun) -> Result<(), DbError> {
        Ok(())
    }

    async fn save(&self, _record: RunRecord<'_>) -> Result<(), DbError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        Err(DbError::QueryError(sqlx::Error::PoolTimedOut))
    }

    async fn persisted_values(
        &self,
        _run_id: Uuid,
        _as_of: NaiveDate,
    ) -> Result<BTreeMap<String, Option<Decimal>>, DbError> {
        Ok(BTreeMap::new())
    }
}

#[tokio::test]
async fn ledger_failure_is_retried_then_fails_the_run_keeping_values() {
    let ws = Workspace::new();
    let tape = ws.write("loans.csv", &loan_tape(|i| 500 + 50 * i));
    let ledger = Arc::new(LockedLedger::default());
    let request = ws.request(&tape);

    let outcome = pipeline(config(), Some(ledger.clone())).run(&request, &CancelFlag::new()).await;

    assert_eq!(ledger.saves.load(Ordering::SeqCst), 3);
    assert_eq!(outcome.status, RunStatus::Failed);
    assert_eq!(outcome.phase, Phase::Persist);
    assert!(!outcome.persisted);
    assert_eq!(outcome.errors[0].kind, "persistence");
    assert_eq!(outcome.errors[0].attempt, Some(3));
    // Computed, just not durable.
    assert_eq!(outcome.bundle.as_ref().unwrap().values.len(), 12);
    assert!(outcome.parity.is_none());
    assert_eq!(outcome.manifest.as_ref().unwrap().status, RunStatus::Failed);
}

#[tokio::test]
async fn parity_mismatch_is_reported_without_failing_the_run() {
    let ws = Workspace::new();
    let tape = ws.write("loans.csv", &loan_tape(|i| 500 + 50 * i));
    let reference = ws.write(
        "reference.json",
        r#"{"as_of": "2026-09-30", "values": {"collection_rate_pct": 50.0, "legacy_metric": 1.0}}"#,
    );
    let request = RunRequest { dry_run: true, reference: Some(reference), ..ws.request(&tape) };

    let outcome = pipeline(config(), None).run(&request, &CancelFlag::new()).await;

    assert_eq!(outcome.status, RunStatus::Success);
    let parity = outcome.parity.as_ref().unwrap();
    assert_eq!(parity.reference_engine, "static");
    assert_eq!(parity.compared, 1);
    assert_eq!(parity.mismatches, 1);
    assert_eq!(outcome.exit_code(false), 0);
    assert_eq!(outcome.exit_code(true), 3);

    let report: serde_json::Value =
        serde_json::from_slice(&std::fs::read(ws.output().join("parity_report.json")).unwrap()).unwrap();
    assert_eq!(report["entries"][0]["passed"], serde_json::json!(false));
}

#[tokio::test]
async fn payments_feed_the_on_time_rate() {
    let ws = Workspace::new();
    let tape = ws.write("loans.csv", &loan_tape(|i| 500 + 50 * i));
    let payments = ws.write(
        "payments.csv",
        "payment_id,loan_id,due_date,paid_date,scheduled_amount,paid_amount\n\
         P1,L001,2026-09-01,2026-08-30,100,100\n\
         P2,L002,2026-09-01,2026-09-04,100,100\n\
         P3,L003,2026-09-01,,100,0\n\
         P4,L004,2026-09-01,2026-09-01,100,100\n",
    );
    let request = RunRequest {
        dry_run: true,
        payments: Some(SourceDescriptor::file(&payments)),
        ..ws.request(&tape)
    };

    let outcome = pipeline(config(), None).run(&request, &CancelFlag::new()).await;

    assert_eq!(outcome.status, RunStatus::Success, "{:?}", outcome.errors);
    let on_time = outcome.bundle.as_ref().unwrap().value("on_time_payment_rate_pct").unwrap();
    assert_eq!(on_time.value, Some(Decimal::new(5000, 2)));
    assert_eq!(outcome.manifest.as_ref().unwrap().raw_artifacts.len(), 2);
}
