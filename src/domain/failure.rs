use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Failure taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    ServiceDown,
    HighCpu,
    HighMemory,
    DiskFull,
    NetworkError,
    DatabaseError,
    ApplicationError,
    Unknown,
}

impl FailureType {
    pub const ALL: [FailureType; 8] = [
        FailureType::ServiceDown,
        FailureType::HighCpu,
        FailureType::HighMemory,
        FailureType::DiskFull,
        FailureType::NetworkError,
        FailureType::DatabaseError,
        FailureType::ApplicationError,
        FailureType::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureType::ServiceDown => "service_down",
            FailureType::HighCpu => "high_cpu",
            FailureType::HighMemory => "high_memory",
            FailureType::DiskFull => "disk_full",
            FailureType::NetworkError => "network_error",
            FailureType::DatabaseError => "database_error",
            FailureType::ApplicationError => "application_error",
            FailureType::Unknown => "unknown",
        }
    }

    /// Short prefix used in event ids
    fn id_prefix(&self) -> &'static str {
        match self {
            FailureType::ServiceDown => "service",
            FailureType::HighCpu => "cpu",
            FailureType::HighMemory => "memory",
            FailureType::DiskFull => "disk",
            FailureType::NetworkError => "network",
            FailureType::DatabaseError => "db",
            FailureType::ApplicationError => "app",
            FailureType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FailureType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        FailureType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| format!("unknown failure type: {s}"))
    }
}

/// Severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One detected abnormal condition.
///
/// Created by the detector. Only the recovery engine mutates it afterwards:
/// resolution steps are append-only and `resolution_time` is written once,
/// when the event first becomes resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureEvent {
    id: String,
    timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    failure_type: FailureType,
    severity: Severity,
    description: String,
    symptoms: Vec<String>,
    affected_services: BTreeSet<String>,
    root_cause: Option<String>,
    resolution_steps: Vec<String>,
    resolved: bool,
    resolution_time: Option<DateTime<Utc>>,
}

impl FailureEvent {
    pub fn new(failure_type: FailureType, severity: Severity, description: impl Into<String>) -> Self {
        let timestamp = Utc::now();
        let suffix = Uuid::new_v4().simple().to_string();
        let id = format!(
            "{}-{}-{}",
            failure_type.id_prefix(),
            timestamp.format("%Y%m%dT%H%M%S%3f"),
            &suffix[..8]
        );

        Self {
            id,
            timestamp,
            failure_type,
            severity,
            description: description.into(),
            symptoms: Vec::new(),
            affected_services: BTreeSet::new(),
            root_cause: None,
            resolution_steps: Vec::new(),
            resolved: false,
            resolution_time: None,
        }
    }

    pub fn with_symptom(mut self, symptom: impl Into<String>) -> Self {
        self.symptoms.push(symptom.into());
        self
    }

    pub fn affecting(mut self, service: impl Into<String>) -> Self {
        self.affected_services.insert(service.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn failure_type(&self) -> FailureType {
        self.failure_type
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn symptoms(&self) -> &[String] {
        &self.symptoms
    }

    pub fn affected_services(&self) -> &BTreeSet<String> {
        &self.affected_services
    }

    /// First affected service in name order
    pub fn primary_service(&self) -> Option<&str> {
        self.affected_services.iter().next().map(String::as_str)
    }

    pub fn root_cause(&self) -> Option<&str> {
        self.root_cause.as_deref()
    }

    /// Record a diagnosis
    pub fn set_root_cause(&mut self, cause: impl Into<String>) {
        self.root_cause = Some(cause.into());
    }

    pub fn resolution_steps(&self) -> &[String] {
        &self.resolution_steps
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    pub fn resolution_time(&self) -> Option<DateTime<Utc>> {
        self.resolution_time
    }

    pub(crate) fn append_resolution_steps<I>(&mut self, steps: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.resolution_steps.extend(steps);
    }

    /// Returns false if the event was already resolved
    pub(crate) fn mark_resolved(&mut self, at: DateTime<Utc>) -> bool {
        if self.resolved {
            return false;
        }
        self.resolved = true;
        self.resolution_time = Some(at);
        true
    }

    /// Copy recovery bookkeeping from a working copy of the same event
    pub(crate) fn absorb_outcome(&mut self, other: &FailureEvent) {
        debug_assert_eq!(self.id, other.id);
        if other.resolution_steps.len() > self.resolution_steps.len()
            && other.resolution_steps.starts_with(&self.resolution_steps)
        {
            let new_steps = other.resolution_steps[self.resolution_steps.len()..].to_vec();
            self.resolution_steps.extend(new_steps);
        }
        if let Some(at) = other.resolution_time {
            if other.resolved {
                self.mark_resolved(at);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn test_failure_type_round_trip_names() {
        for t in FailureType::ALL {
            assert_eq!(t.as_str().parse::<FailureType>().unwrap(), t);
        }
        assert_eq!("disk-full".parse::<FailureType>().unwrap(), FailureType::DiskFull);
        assert!("meltdown".parse::<FailureType>().is_err());
    }

    #[test]
    fn test_event_ids_are_unique_within_a_tick() {
        let a = FailureEvent::new(FailureType::HighCpu, Severity::Medium, "cpu");
        let b = FailureEvent::new(FailureType::HighCpu, Severity::Medium, "cpu");
        assert_ne!(a.id(), b.id());
        assert!(a.id().starts_with("cpu-"));
    }

    #[test]
    fn test_resolution_time_set_once() {
        let mut event = FailureEvent::new(FailureType::DiskFull, Severity::Critical, "disk");
        let first = Utc::now();
        assert!(event.mark_resolved(first));
        assert!(!event.mark_resolved(first + chrono::Duration::seconds(5)));
        assert_eq!(event.resolution_time(), Some(first));
    }

    #[test]
    fn test_absorb_outcome_appends_new_steps_only() {
        let mut stored = FailureEvent::new(FailureType::HighMemory, Severity::High, "mem");
        let mut working = stored.clone();
        working.append_resolution_steps(vec!["clear system caches".to_string()]);
        working.mark_resolved(Utc::now());

        stored.absorb_outcome(&working);
        stored.absorb_outcome(&working);

        assert_eq!(stored.resolution_steps(), working.resolution_steps());
        assert!(stored.is_resolved());
        assert_eq!(stored.resolution_time(), working.resolution_time());
    }

    #[test]
    fn test_serializes_type_field() {
        let event = FailureEvent::new(FailureType::ServiceDown, Severity::Critical, "down")
            .affecting("redis");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "service_down");
        assert_eq!(json["severity"], "critical");
        assert_eq!(json["affected_services"][0], "redis");
    }
}
