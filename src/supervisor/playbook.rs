//! Troubleshooting Playbook
//!
//! Static knowledge table keyed by failure type, and the troubleshooting
//! guide built from it for every failure left unresolved.

use serde::Serialize;
use std::fmt::{self, Write};

use crate::domain::{FailureEvent, FailureType, Severity};

/// What an operator should know about one failure type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Knowledge {
    pub possible_causes: &'static [&'static str],
    pub diagnostic_steps: &'static [&'static str],
    pub preventive_measures: &'static [&'static str],
}

const FALLBACK: Knowledge = Knowledge {
    possible_causes: &["Unknown cause"],
    diagnostic_steps: &["Contact technical support"],
    preventive_measures: &["Build out comprehensive monitoring"],
};

/// Knowledge for a failure type; types without an entry get a generic fallback
pub fn knowledge_for(failure_type: FailureType) -> Knowledge {
    match failure_type {
        FailureType::HighCpu => Knowledge {
            possible_causes: &[
                "A CPU-intensive process misbehaving",
                "An infinite loop or deadlock",
                "Overall system load too high",
                "Malware infection",
            ],
            diagnostic_steps: &[
                "Inspect per-process CPU usage with top/htop",
                "Look for unexpected processes",
                "Capture stack traces of the busiest process",
                "Review the system load history",
                "Consider adding CPU capacity or optimising the code",
            ],
            preventive_measures: &[
                "Monitor CPU usage continuously",
                "Profile and optimise hot code paths",
                "Alert on sustained CPU usage",
                "Allocate system resources deliberately",
            ],
        },
        FailureType::HighMemory => Knowledge {
            possible_causes: &[
                "A memory leak",
                "Large data processing jobs",
                "Caches growing without bound",
                "A process growing abnormally",
            ],
            diagnostic_steps: &[
                "Check memory usage with free and ps",
                "Find the processes holding the most memory",
                "Analyse the suspect process for leaks",
                "Clear unnecessary caches",
                "Restart the services using the most memory",
            ],
            preventive_measures: &[
                "Review memory usage regularly",
                "Fix memory leaks promptly",
                "Alert on a memory usage threshold",
                "Tune memory usage strategies",
            ],
        },
        FailureType::DiskFull => Knowledge {
            possible_causes: &[
                "Log files too large",
                "Temporary files piling up",
                "Database growth",
                "Backups taking space",
            ],
            diagnostic_steps: &[
                "Check filesystem usage with df",
                "Find the largest files and directories with du",
                "Clean up log files",
                "Delete temporary files",
                "Consider expanding the disk",
            ],
            preventive_measures: &[
                "Monitor free disk space",
                "Clean up log files on a schedule",
                "Rotate logs",
                "Plan disk capacity ahead",
            ],
        },
        FailureType::ServiceDown => Knowledge {
            possible_causes: &[
                "The process crashed",
                "A configuration error",
                "A dependency is down",
                "Resource exhaustion",
            ],
            diagnostic_steps: &[
                "Check the service status",
                "Read the service logs",
                "Check the configuration files",
                "Verify the services it depends on",
                "Try restarting the service",
            ],
            preventive_measures: &[
                "Run health checks",
                "Monitor the service",
                "Configure automatic restarts",
                "Track service dependencies",
            ],
        },
        FailureType::NetworkError => Knowledge {
            possible_causes: &[
                "Faulty network hardware",
                "DNS resolution problems",
                "Firewall blocking traffic",
                "Insufficient bandwidth",
            ],
            diagnostic_steps: &[
                "Check network connectivity",
                "Test DNS resolution",
                "Review firewall rules",
                "Verify the network configuration",
                "Contact the network administrator",
            ],
            preventive_measures: &[
                "Monitor network health",
                "Provide network redundancy",
                "Inspect network devices regularly",
                "Keep a network incident runbook",
            ],
        },
        FailureType::DatabaseError | FailureType::ApplicationError | FailureType::Unknown => {
            FALLBACK
        }
    }
}

/// Why a guide was emitted instead of (or after) automatic recovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GuideReason {
    BelowRecoveryThreshold,
    RecoveryFailed,
    NoStrategy,
    RecoverySuppressed,
    DryRun,
}

impl GuideReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuideReason::BelowRecoveryThreshold => "below_recovery_threshold",
            GuideReason::RecoveryFailed => "recovery_failed",
            GuideReason::NoStrategy => "no_strategy",
            GuideReason::RecoverySuppressed => "recovery_suppressed",
            GuideReason::DryRun => "dry_run",
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            GuideReason::BelowRecoveryThreshold => "severity below the automatic recovery threshold",
            GuideReason::RecoveryFailed => "automatic recovery did not resolve the failure",
            GuideReason::NoStrategy => "no recovery strategy registered for this failure type",
            GuideReason::RecoverySuppressed => "too many recent recovery attempts, recovery skipped",
            GuideReason::DryRun => "dry run, no remediation attempted",
        }
    }
}

impl fmt::Display for GuideReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TroubleshootingGuide {
    pub failure_id: String,
    pub failure_type: FailureType,
    pub severity: Severity,
    pub description: String,
    pub reason: GuideReason,
    pub symptoms: Vec<String>,
    /// Recovery steps already tried, in order
    pub attempted_steps: Vec<String>,
    pub possible_causes: Vec<String>,
    pub diagnostic_steps: Vec<String>,
    pub preventive_measures: Vec<String>,
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl TroubleshootingGuide {
    pub fn for_event(event: &FailureEvent, reason: GuideReason) -> Self {
        let knowledge = knowledge_for(event.failure_type());
        Self {
            failure_id: event.id().to_string(),
            failure_type: event.failure_type(),
            severity: event.severity(),
            description: event.description().to_string(),
            reason,
            symptoms: event.symptoms().to_vec(),
            attempted_steps: event.resolution_steps().to_vec(),
            possible_causes: owned(knowledge.possible_causes),
            diagnostic_steps: owned(knowledge.diagnostic_steps),
            preventive_measures: owned(knowledge.preventive_measures),
        }
    }

    /// Human-readable rendering
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Troubleshooting guide: {}", self.description);
        let _ = writeln!(
            out,
            "  [{}] {} ({}) - {}",
            self.severity,
            self.failure_type,
            self.failure_id,
            self.reason.describe()
        );

        let _ = writeln!(out, "Symptoms:");
        for symptom in &self.symptoms {
            let _ = writeln!(out, "  - {symptom}");
        }

        if !self.attempted_steps.is_empty() {
            let _ = writeln!(out, "Already attempted:");
            for step in &self.attempted_steps {
                let _ = writeln!(out, "  - {step}");
            }
        }

        let _ = writeln!(out, "Possible causes:");
        for cause in &self.possible_causes {
            let _ = writeln!(out, "  - {cause}");
        }

        let _ = writeln!(out, "Diagnostic steps:");
        for (i, step) in self.diagnostic_steps.iter().enumerate() {
            let _ = writeln!(out, "  {}. {step}", i + 1);
        }

        let _ = writeln!(out, "Preventive measures:");
        for measure in &self.preventive_measures {
            let _ = writeln!(out, "  - {measure}");
        }
        out
    }
}
