//! Supervisor Layer for Failure Detection and Self-Healing
//!
//! This module provides the monitoring and recovery pipeline:
//! - Health checker for HTTP/TCP liveness probes
//! - Failure detector with independent detection rules
//! - Recovery engine with one strategy per failure type
//! - Incident history, playbook guides and the final report
//! - Orchestrator driving it all on a fixed tick

pub mod detector;
pub mod health_checker;
pub mod history;
pub mod orchestrator;
pub mod playbook;
pub mod recovery;
pub mod report;

pub use detector::{DetectionRule, FailureDetector};
pub use health_checker::HealthChecker;
pub use history::IncidentHistory;
pub use orchestrator::{TickSummary, Troubleshooter};
pub use playbook::{knowledge_for, GuideReason, Knowledge, TroubleshootingGuide};
pub use recovery::{RecoveryEngine, RecoveryStrategy};
pub use report::IncidentReport;
