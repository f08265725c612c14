//! Incident report, emitted at shutdown or on demand

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::Path;

use super::history::IncidentHistory;
use crate::domain::{FailureType, HealthSummary, RecoveryRecord};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IncidentReport {
    pub generated_at: DateTime<Utc>,
    pub ticks: u64,
    pub total_failures: usize,
    pub resolved_failures: usize,
    /// `None` when no failure was recorded
    pub resolution_rate: Option<f64>,
    pub failure_types: BTreeMap<FailureType, usize>,
    pub recent_recoveries: Vec<RecoveryRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_health: Option<HealthSummary>,
}

impl IncidentReport {
    /// Snapshot the retained history
    pub async fn build(
        history: &IncidentHistory,
        recent_limit: usize,
        ticks: u64,
        last_health: Option<HealthSummary>,
    ) -> Self {
        let failures = history.failures().await;
        let recent_recoveries = history.recent_recoveries(recent_limit).await;

        let total_failures = failures.len();
        let resolved_failures = failures.iter().filter(|f| f.is_resolved()).count();
        let mut failure_types = BTreeMap::new();
        for failure in &failures {
            *failure_types.entry(failure.failure_type()).or_insert(0) += 1;
        }
        let resolution_rate = (total_failures > 0)
            .then(|| resolved_failures as f64 / total_failures as f64 * 100.0);

        Self {
            generated_at: Utc::now(),
            ticks,
            total_failures,
            resolved_failures,
            resolution_rate,
            failure_types,
            recent_recoveries,
            last_health,
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Incident report ({})", self.generated_at.format("%Y-%m-%d %H:%M:%S UTC"));
        let _ = writeln!(out, "  ticks:            {}", self.ticks);
        if let Some(health) = &self.last_health {
            let _ = writeln!(out, "  last health:      {health}");
        }
        let _ = writeln!(out, "  total failures:   {}", self.total_failures);
        let _ = writeln!(out, "  resolved:         {}", self.resolved_failures);
        match self.resolution_rate {
            Some(rate) => {
                let _ = writeln!(out, "  resolution rate:  {rate:.1}%");
            }
            None => {
                let _ = writeln!(out, "  resolution rate:  n/a");
            }
        }

        if !self.failure_types.is_empty() {
            let _ = writeln!(out, "Failures by type:");
            for (failure_type, count) in &self.failure_types {
                let _ = writeln!(out, "  {:<18} {count}", failure_type.as_str());
            }
        }

        if !self.recent_recoveries.is_empty() {
            let _ = writeln!(out, "Recent recoveries:");
            for record in &self.recent_recoveries {
                let outcome = if record.success { "ok" } else { "failed" };
                let _ = writeln!(
                    out,
                    "  {} {:<14} {:<6} {}",
                    record.timestamp.format("%H:%M:%S"),
                    record.failure_type.as_str(),
                    outcome,
                    record.failure_id
                );
                if let Some(error) = &record.error {
                    let _ = writeln!(out, "    error: {error}");
                }
            }
        }
        out
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}
