use crate::cancel::CancelFlag;
use crate::error::PipelineError;
use crate::outcome::{ParitySummary, RunError, RunOutcome};
use crate::output::{Manifest, OutputWriter};
use crate::sink::LedgerSink;
use analytics::{CATALOG_VERSION, CalculationEngine, KpiRegistry, LineageAnchors, ResultBundle};
use chrono::{NaiveDate, Utc};
use configuration::Config;
use core_types::{
    AuditEvent, AuditLog, DataQualityResult, EventStatus, KpiValue, Phase, PipelineRun, RawArtifact, RunStatus,
};
use database::{DbError, RunRecord};
use ingestion::retry::{RetryExhausted, retry_with_backoff};
use ingestion::{Ingestor, SourceDescriptor};
use parity::{
    ParityChecker, ParityReport, PolarsReferenceEngine, ReferenceEngine, StaticReferenceEngine,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::{DataQualityWarning, Validated};

/// What to run: one snapshot, one business date, one output directory.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub run_id: Uuid,
    pub as_of: NaiveDate,
    pub loans: SourceDescriptor,
    pub payments: Option<SourceDescriptor>,
    pub output_dir: PathBuf,
    /// Static reference values; the polars reference engine is used when absent.
    pub reference: Option<PathBuf>,
    /// Skip the audit ledger. Output files are still written.
    pub dry_run: bool,
}

impl RunRequest {
    pub fn new(loans: SourceDescriptor, output_dir: impl Into<PathBuf>, as_of: NaiveDate) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            as_of,
            loans,
            payments: None,
            output_dir: output_dir.into(),
            reference: None,
            dry_run: false,
        }
    }
}

/// Why `execute` stopped early.
enum Stop {
    Failed { phase: Phase, error: PipelineError, elapsed: Duration },
    Canceled(Phase),
}

impl Stop {
    fn failed(phase: Phase, started: Instant) -> impl FnOnce(PipelineError) -> Stop {
        move |error| Stop::Failed { phase, error, elapsed: started.elapsed() }
    }
}

/// Mutable state of one run, owned by the orchestrator.
struct RunContext {
    run: PipelineRun,
    audit: AuditLog,
    warnings: Vec<DataQualityWarning>,
    errors: Vec<RunError>,
    artifacts: Vec<RawArtifact>,
    canonical_hash: Option<String>,
    bundle: Option<ResultBundle>,
    persisted: bool,
    parity: Option<ParityReport>,
    last_phase: Phase,
    writer: Option<OutputWriter>,
}

/// The 4-phase orchestrator: ingest → validate → calculate → persist, followed
/// by the non-fatal parity check.
///
/// Phases run strictly in sequence. Cancellation is honoured at every phase
/// boundary before persist; once the ledger commit succeeds the run is `success`.
pub struct Pipeline {
    config: Arc<Config>,
    ingestor: Ingestor,
    registry: KpiRegistry,
    engine: CalculationEngine,
    ledger: Option<Arc<dyn LedgerSink>>,
    checker: ParityChecker,
}

impl Pipeline {
    pub fn new(
        config: Arc<Config>,
        ingestor: Ingestor,
        ledger: Option<Arc<dyn LedgerSink>>,
    ) -> Result<Self, PipelineError> {
        let registry = KpiRegistry::from_catalog()?;
        let engine = CalculationEngine::new(config.pipeline.max_workers)?;
        let checker = ParityChecker::new(config.parity.clone());
        Ok(Self { config, ingestor, registry, engine, ledger, checker })
    }

    /// Replaces the catalog registry, e.g. to run with additional calculators.
    pub fn with_registry(mut self, registry: KpiRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &KpiRegistry {
        &self.registry
    }

    /// Executes one run and reports how it ended. Never panics or returns early:
    /// every fatal error becomes a `failed` outcome.
    #[instrument(skip_all, fields(run_id = %request.run_id, as_of = %request.as_of))]
    pub async fn run(&self, request: &RunRequest, cancel: &CancelFlag) -> RunOutcome {
        let pipeline = &self.config.pipeline;
        let mut ctx = RunContext {
            run: PipelineRun::new(request.run_id, &pipeline.config_version, &pipeline.source_revision),
            audit: AuditLog::new(),
            warnings: Vec::new(),
            errors: Vec::new(),
            artifacts: Vec::new(),
            canonical_hash: None,
            bundle: None,
            persisted: false,
            parity: None,
            last_phase: Phase::Ingest,
            writer: None,
        };
        info!(dry_run = request.dry_run, workers = self.engine.workers(), "Pipeline run started");
        self.record_status(&ctx.run, request).await;

        match self.execute(request, cancel, &mut ctx).await {
            Ok(()) => {
                info!(status = %ctx.run.status, "Pipeline run finished");
            }
            Err(Stop::Failed { phase, error, elapsed }) => {
                error!(phase = %phase, error = %error, "Pipeline run failed");
                ctx.audit.push(AuditEvent::phase(phase, EventStatus::Failed, elapsed).with_detail(error.kind()));
                ctx.errors.push(RunError::from_pipeline(phase, &error));
                ctx.last_phase = phase;
                self.terminate(&mut ctx, RunStatus::Failed, request).await;
            }
            Err(Stop::Canceled(phase)) => {
                warn!(phase = %phase, "Pipeline run canceled");
                ctx.audit.push(AuditEvent::phase(phase, EventStatus::Canceled, Duration::ZERO));
                ctx.last_phase = phase;
                self.terminate(&mut ctx, RunStatus::Canceled, request).await;
            }
        }

        let manifest = self.write_closing_files(&mut ctx, request);
        let (kpi_count, failed_kpis) =
            ctx.bundle.as_ref().map(|b| (b.values.len(), b.failed_count())).unwrap_or((0, 0));

        RunOutcome {
            run_id: request.run_id,
            as_of: request.as_of,
            status: ctx.run.status,
            phase: ctx.last_phase,
            errors: ctx.errors,
            warnings: ctx.warnings,
            kpi_count,
            failed_kpis,
            persisted: ctx.persisted,
            parity: ctx.parity.as_ref().map(ParitySummary::from),
            manifest,
            bundle: ctx.bundle,
            parity_report: ctx.parity,
            audit: ctx.audit,
        }
    }

    async fn execute(&self, request: &RunRequest, cancel: &CancelFlag, ctx: &mut RunContext) -> Result<(), Stop> {
        let run_id = request.run_id;

        // --- Ingest ---
        ctx.last_phase = Phase::Ingest;
        checkpoint(cancel, Phase::Ingest)?;
        let started = Instant::now();
        let (raw_loans, loans_artifact) = self
            .ingestor
            .ingest(&request.loans, run_id, request.as_of)
            .await
            .map_err(|e| Stop::failed(Phase::Ingest, started)(e.into()))?;
        ctx.artifacts.push(loans_artifact.clone());
        let mut raw_payments = None;
        if let Some(source) = &request.payments {
            let (table, artifact) = self
                .ingestor
                .ingest(source, run_id, request.as_of)
                .await
                .map_err(|e| Stop::failed(Phase::Ingest, started)(e.into()))?;
            ctx.artifacts.push(artifact);
            raw_payments = Some(table);
        }
        ctx.audit.push(
            AuditEvent::phase(Phase::Ingest, EventStatus::Succeeded, started.elapsed())
                .with_detail(format!("{} source(s)", ctx.artifacts.len())),
        );

        // --- Validate ---
        ctx.last_phase = Phase::Validate;
        checkpoint(cancel, Phase::Validate)?;
        let started = Instant::now();
        let Validated { table, quality, warnings } = validator::transform(
            &raw_loans,
            raw_payments.as_ref(),
            run_id,
            request.as_of,
            Utc::now(),
            &self.config.validation,
        )
        .map_err(|e| Stop::failed(Phase::Validate, started)(e.into()))?;
        for warning in &warnings {
            warn!(code = warning.code.as_str(), "Data quality warning: {}", warning.message);
        }
        ctx.warnings = warnings;
        ctx.canonical_hash = Some(table.content_hash.clone());
        ctx.audit.push(
            AuditEvent::phase(Phase::Validate, EventStatus::Succeeded, started.elapsed())
                .with_detail(format!("{} warning(s)", ctx.warnings.len())),
        );

        // --- Calculate ---
        ctx.last_phase = Phase::Calculate;
        checkpoint(cancel, Phase::Calculate)?;
        let started = Instant::now();
        let anchors = LineageAnchors {
            loans_raw_hash: loans_artifact.content_hash.clone(),
            payments_raw_hash: ctx.artifacts.get(1).map(|a| a.content_hash.clone()),
        };
        let bundle = self.engine.calculate(&self.registry, &table, run_id, &anchors);
        ctx.audit.extend(bundle.events.iter().cloned());
        for value in bundle.values.iter().filter(|v| v.is_failed()) {
            let kind = value.context.error.as_deref().unwrap_or("unknown");
            let message = value.context.details.get("message").and_then(|m| m.as_str()).unwrap_or(kind);
            ctx.errors.push(RunError::kpi(&value.kpi_name, kind, message));
        }
        ctx.audit.push(
            AuditEvent::phase(Phase::Calculate, EventStatus::Succeeded, started.elapsed())
                .with_detail(format!("{} KPI(s), {} failed", bundle.values.len(), bundle.failed_count())),
        );
        ctx.bundle = Some(bundle.clone());

        // --- Persist ---
        ctx.last_phase = Phase::Persist;
        checkpoint(cancel, Phase::Persist)?;
        let started = Instant::now();
        let fail = |e| Stop::failed(Phase::Persist, started)(e);
        let mut writer = OutputWriter::create(&request.output_dir).map_err(fail)?;
        writer.write_results_json(&bundle, Utc::now()).map_err(fail)?;
        writer.write_results_csv(&bundle).map_err(fail)?;
        ctx.writer = Some(writer);

        let detail = if request.dry_run {
            ctx.run.transition(RunStatus::Success).map_err(|e| fail(e.into()))?;
            "dry run: ledger skipped".to_string()
        } else {
            self.commit(ctx, &bundle, &quality).await.map_err(fail)?;
            format!("{} value(s) committed", bundle.values.len())
        };
        ctx.audit.push(AuditEvent::phase(Phase::Persist, EventStatus::Succeeded, started.elapsed()).with_detail(detail));

        // --- Parity (non-fatal) ---
        if self.config.parity.enabled {
            ctx.last_phase = Phase::Parity;
            let started = Instant::now();
            match self.check_parity(request, ctx, &bundle, &table).await {
                Ok(report) => {
                    let status = if report.passed() { EventStatus::Succeeded } else { EventStatus::Failed };
                    ctx.audit.push(
                        AuditEvent::phase(Phase::Parity, status, started.elapsed())
                            .with_detail(format!("{} mismatch(es)", report.mismatch_count())),
                    );
                    ctx.parity = Some(report);
                }
                Err(e) => {
                    error!(error = %e, "Parity check could not run");
                    ctx.audit.push(
                        AuditEvent::phase(Phase::Parity, EventStatus::Failed, started.elapsed()).with_detail(e.kind()),
                    );
                    ctx.errors.push(RunError::from_pipeline(Phase::Parity, &e));
                }
            }
        }
        Ok(())
    }

    /// Commits the run with status `success` in one transaction, retrying transient
    /// ledger failures. The in-memory run only becomes `success` once the commit lands.
    async fn commit(
        &self,
        ctx: &mut RunContext,
        bundle: &ResultBundle,
        quality: &DataQualityResult,
    ) -> Result<(), PipelineError> {
        let sink = self
            .ledger
            .as_ref()
            .ok_or_else(|| PipelineError::Configuration("no audit ledger configured".to_string()))?;
        let canonical_hash = ctx.canonical_hash.clone().unwrap_or_default();

        let mut committed = ctx.run.clone();
        committed.transition(RunStatus::Success)?;
        let record = RunRecord {
            run: &committed,
            catalog_version: CATALOG_VERSION,
            canonical_hash: &canonical_hash,
            artifacts: &ctx.artifacts,
            definitions: &bundle.definitions,
            values: &bundle.values,
            quality,
        };

        retry_with_backoff(&self.config.persistence.retry, "persist", DbError::is_transient, |_| sink.save(record))
            .await
            .map_err(|RetryExhausted { attempts, last_error }| PipelineError::Persistence {
                attempts,
                source: last_error,
            })?;

        ctx.run = committed;
        ctx.persisted = true;
        Ok(())
    }

    /// Compares the values as the ledger holds them (or as computed, on a dry run)
    /// against the reference engine.
    async fn check_parity(
        &self,
        request: &RunRequest,
        ctx: &RunContext,
        bundle: &ResultBundle,
        table: &core_types::CanonicalTable,
    ) -> Result<ParityReport, PipelineError> {
        let primary: Vec<KpiValue> = match (&self.ledger, ctx.persisted) {
            (Some(sink), true) => {
                let stored = sink
                    .persisted_values(request.run_id, request.as_of)
                    .await
                    .map_err(|source| PipelineError::Persistence { attempts: 1, source })?;
                bundle
                    .values
                    .iter()
                    .map(|v| KpiValue { value: stored.get(&v.kpi_name).copied().flatten(), ..v.clone() })
                    .collect()
            }
            _ => bundle.values.clone(),
        };

        let reference: Box<dyn ReferenceEngine> = match &request.reference {
            Some(path) => Box::new(StaticReferenceEngine::from_path(path)?),
            None => Box::new(PolarsReferenceEngine::evaluate(table)?),
        };
        Ok(self.checker.check_parity(request.run_id, request.as_of, &primary, reference.as_ref())?)
    }

    async fn terminate(&self, ctx: &mut RunContext, status: RunStatus, request: &RunRequest) {
        if let Err(e) = ctx.run.transition(status) {
            warn!(error = %e, "Run already terminal");
            return;
        }
        self.record_status(&ctx.run, request).await;
    }

    /// Best effort: the final commit upserts the run row anyway, and a failed or
    /// canceled run must still end even when the ledger is down.
    async fn record_status(&self, run: &PipelineRun, request: &RunRequest) {
        if request.dry_run {
            return;
        }
        if let Some(sink) = &self.ledger {
            if let Err(e) = sink.record_status(run).await {
                warn!(status = %run.status, error = %e, "Could not record run status in the ledger");
            }
        }
    }

    /// Writes the audit log, the parity report and, last, the manifest.
    fn write_closing_files(&self, ctx: &mut RunContext, request: &RunRequest) -> Option<Manifest> {
        let mut writer = match ctx.writer.take() {
            Some(writer) => writer,
            None => match OutputWriter::create(&request.output_dir) {
                Ok(writer) => writer,
                Err(e) => {
                    warn!(error = %e, "Could not create the output directory");
                    return None;
                }
            },
        };

        let mut result = writer.write_audit_log(&ctx.audit);
        if let (true, Some(report)) = (result.is_ok(), &ctx.parity) {
            result = writer.write_parity_report(report);
        }
        let manifest = result.and_then(|()| {
            writer.write_manifest(Manifest {
                run_id: request.run_id,
                as_of: request.as_of,
                status: ctx.run.status,
                generated_at: Utc::now(),
                config_version: self.config.pipeline.config_version.clone(),
                catalog_version: CATALOG_VERSION.to_string(),
                canonical_hash: ctx.canonical_hash.clone(),
                kpi_count: ctx.bundle.as_ref().map_or(0, |b| b.values.len()),
                failed_kpi_count: ctx.bundle.as_ref().map_or(0, |b| b.failed_count()),
                persisted: ctx.persisted,
                files: Vec::new(),
                raw_artifacts: ctx.artifacts.clone(),
            })
        });

        match manifest {
            Ok(manifest) => {
                info!(dir = %writer.dir().display(), files = manifest.files.len(), "Run outputs written");
                Some(manifest)
            }
            Err(e) => {
                error!(error = %e, "Failed to write run outputs");
                ctx.errors.push(RunError::from_pipeline(Phase::Persist, &e));
                None
            }
        }
    }
}

fn checkpoint(cancel: &CancelFlag, phase: Phase) -> Result<(), Stop> {
    if cancel.is_canceled() {
        return Err(Stop::Canceled(phase));
    }
    Ok(())
}
