use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::enums::{EventStatus, Phase};

/// One entry of a run's audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub phase: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kpi_name: Option<String>,
    pub status: EventStatus,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl AuditEvent {
    pub fn phase(phase: Phase, status: EventStatus, duration: Duration) -> Self {
        Self {
            phase,
            kpi_name: None,
            status,
            duration_ms: duration.as_millis() as u64,
            detail: None,
        }
    }

    pub fn kpi(kpi_name: &str, status: EventStatus, duration: Duration) -> Self {
        Self {
            phase: Phase::Calculate,
            kpi_name: Some(kpi_name.to_string()),
            status,
            duration_ms: duration.as_millis() as u64,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// The ordered event log of a run. Append-only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditLog {
    events: Vec<AuditEvent>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: AuditEvent) {
        self.events.push(event);
    }

    pub fn extend(&mut self, events: impl IntoIterator<Item = AuditEvent>) {
        self.events.extend(events);
    }

    pub fn events(&self) -> &[AuditEvent] {
        &self.events
    }
}
