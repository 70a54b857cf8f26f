use crate::error::{AnalyticsError, KpiComputationError};
use crate::registry::KpiRegistry;
use crate::KpiCalculator;
use chrono::NaiveDate;
use core_types::{
    AuditEvent, CanonicalTable, EventStatus, KpiContext, KpiDefinition, KpiValue, SourceTable,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

/// Raw-input hashes a run's values are stamped with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageAnchors {
    pub loans_raw_hash: String,
    pub payments_raw_hash: Option<String>,
}

impl LineageAnchors {
    /// Without a payment source, payment KPIs point at the loan tape: it is the
    /// only raw input the run had.
    fn raw_hash_for(&self, table: SourceTable) -> &str {
        match table {
            SourceTable::Loans => &self.loans_raw_hash,
            SourceTable::Payments => self.payments_raw_hash.as_deref().unwrap_or(&self.loans_raw_hash),
        }
    }
}

/// Everything the calculate phase produced for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultBundle {
    pub run_id: Uuid,
    pub as_of: NaiveDate,
    pub canonical_hash: String,
    /// One value per registered KPI, in registry order.
    pub values: Vec<KpiValue>,
    pub definitions: Vec<KpiDefinition>,
    /// Per-KPI audit events, in registry order.
    pub events: Vec<AuditEvent>,
}

impl ResultBundle {
    pub fn failed_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_failed()).count()
    }

    pub fn value(&self, kpi_name: &str) -> Option<&KpiValue> {
        self.values.iter().find(|v| v.kpi_name == kpi_name)
    }
}

struct Computed {
    value: KpiValue,
    event: AuditEvent,
}

/// Runs every registered calculator over the canonical table on a dedicated
/// rayon pool. A calculator that errors or panics yields a failed value and
/// never affects the others.
pub struct CalculationEngine {
    pool: rayon::ThreadPool,
}

impl CalculationEngine {
    /// `max_workers = 0` lets rayon size the pool to the machine.
    pub fn new(max_workers: usize) -> Result<Self, AnalyticsError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(max_workers)
            .thread_name(|i| format!("kpi-worker-{}", i))
            .build()
            .map_err(|e| AnalyticsError::ThreadPool(e.to_string()))?;
        Ok(Self { pool })
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn calculate(
        &self,
        registry: &KpiRegistry,
        table: &CanonicalTable,
        run_id: Uuid,
        anchors: &LineageAnchors,
    ) -> ResultBundle {
        // Each worker folds into its own map; the maps are merged by KPI name so the
        // outcome never depends on scheduling.
        let mut merged: BTreeMap<String, Computed> = self.pool.install(|| {
            registry
                .calculators()
                .par_iter()
                .fold(BTreeMap::new, |mut acc, calculator| {
                    let computed = run_one(calculator.as_ref(), table, run_id, anchors);
                    acc.insert(computed.value.kpi_name.clone(), computed);
                    acc
                })
                .reduce(BTreeMap::new, |mut a, b| {
                    a.extend(b);
                    a
                })
        });

        let mut values = Vec::with_capacity(registry.len());
        let mut events = Vec::with_capacity(registry.len());
        for calculator in registry.calculators() {
            if let Some(computed) = merged.remove(&calculator.describe().kpi_name) {
                values.push(computed.value);
                events.push(computed.event);
            }
        }

        ResultBundle {
            run_id,
            as_of: table.as_of,
            canonical_hash: table.content_hash.clone(),
            values,
            definitions: registry.definitions(),
            events,
        }
    }
}

fn run_one(
    calculator: &dyn KpiCalculator,
    table: &CanonicalTable,
    run_id: Uuid,
    anchors: &LineageAnchors,
) -> Computed {
    let definition = calculator.describe();
    let started = Instant::now();

    let result = catch_unwind(AssertUnwindSafe(|| calculator.compute(table))).unwrap_or_else(|payload| {
        Err(KpiComputationError::Panicked {
            kpi: definition.kpi_name.clone(),
            message: panic_message(payload.as_ref()),
        })
    });
    let elapsed = started.elapsed();

    let (value, context, event) = match result {
        Ok(output) => {
            let value = output.value.map(|v| v.round_dp(definition.precision));
            debug!(kpi = %definition.kpi_name, value = ?value, "KPI computed");
            let detail = output.context.reason.map(|r| r.as_str());
            (value, output.context, kpi_event(&definition.kpi_name, EventStatus::Succeeded, elapsed, detail))
        }
        Err(e) => {
            warn!(kpi = %definition.kpi_name, error = %e, "KPI calculation failed");
            let mut context = KpiContext::new(definition.formula.clone());
            context.error = Some(e.kind().to_string());
            context.insert_detail("message", e.to_string());
            let event = kpi_event(&definition.kpi_name, EventStatus::Failed, elapsed, Some(e.kind()));
            (None, context, event)
        }
    };

    Computed {
        value: KpiValue {
            run_id,
            as_of: table.as_of,
            kpi_name: definition.kpi_name.clone(),
            value,
            precision: definition.precision,
            raw_content_hash: anchors.raw_hash_for(definition.source_table).to_string(),
            canonical_hash: table.content_hash.clone(),
            kpi_def_version: definition.formula_version.clone(),
            threshold_status: definition.classify(value),
            context,
        },
        event,
    }
}

fn kpi_event(kpi_name: &str, status: EventStatus, elapsed: Duration, detail: Option<&str>) -> AuditEvent {
    let event = AuditEvent::kpi(kpi_name, status, elapsed);
    match detail {
        Some(detail) => event.with_detail(detail),
        None => event,
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
