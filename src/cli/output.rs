//! Output formatting for one-shot `medic` commands.
//!
//! Supports two modes: human-readable tables (default) and JSON (--json).

use serde::Serialize;
use tabled::{Table, Tabled};

use crate::domain::{FailureEvent, HealthCheckResult};

/// Output mode for command results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Table,
    Json,
}

impl OutputMode {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            OutputMode::Json
        } else {
            OutputMode::Table
        }
    }
}

/// Print a vec of Tabled + Serialize items in the chosen mode.
pub fn print_items<T: Tabled + Serialize>(items: &[T], mode: OutputMode) -> anyhow::Result<()> {
    match mode {
        OutputMode::Table => {
            if items.is_empty() {
                println!("(no results)");
            } else {
                let table = Table::new(items).to_string();
                println!("{table}");
            }
        }
        OutputMode::Json => {
            let json = serde_json::to_string_pretty(items)?;
            println!("{json}");
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Tabled, Serialize)]
pub struct HealthRow {
    #[tabled(rename = "Service")]
    pub service: String,
    #[tabled(rename = "Status")]
    pub status: String,
    #[tabled(rename = "Latency")]
    pub latency: String,
    #[tabled(rename = "Error")]
    pub error: String,
}

impl From<&HealthCheckResult> for HealthRow {
    fn from(result: &HealthCheckResult) -> Self {
        Self {
            service: result.service_name.clone(),
            status: result.status.to_string(),
            latency: format!("{:.3}s", result.response_time),
            error: result.error_message.clone().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Tabled, Serialize)]
pub struct FailureRow {
    #[tabled(rename = "Type")]
    pub failure_type: String,
    #[tabled(rename = "Severity")]
    pub severity: String,
    #[tabled(rename = "Services")]
    pub services: String,
    #[tabled(rename = "Description")]
    pub description: String,
}

impl From<&FailureEvent> for FailureRow {
    fn from(event: &FailureEvent) -> Self {
        Self {
            failure_type: event.failure_type().to_string(),
            severity: event.severity().to_string(),
            services: event
                .affected_services()
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(", "),
            description: event.description().to_string(),
        }
    }
}

/// Print health results; JSON mode emits the full results
pub fn print_health(results: &[HealthCheckResult], mode: OutputMode) -> anyhow::Result<()> {
    match mode {
        OutputMode::Table => {
            let rows: Vec<HealthRow> = results.iter().map(HealthRow::from).collect();
            print_items(&rows, mode)
        }
        OutputMode::Json => {
            println!("{}", serde_json::to_string_pretty(results)?);
            Ok(())
        }
    }
}

/// Print detected failures; JSON mode emits the full events
pub fn print_failures(events: &[FailureEvent], mode: OutputMode) -> anyhow::Result<()> {
    match mode {
        OutputMode::Table => {
            let rows: Vec<FailureRow> = events.iter().map(FailureRow::from).collect();
            print_items(&rows, mode)
        }
        OutputMode::Json => {
            println!("{}", serde_json::to_string_pretty(events)?);
            Ok(())
        }
    }
}
