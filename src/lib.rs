pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod supervisor;

pub use config::AppConfig;
pub use domain::{
    FailureEvent, FailureType, HealthCheckResult, HealthStatus, MonitorState, RecoveryRecord,
    Severity,
};
pub use error::{MedicError, Result};
pub use metrics::{MetricsProvider, ScriptedMetrics, SystemMetrics};
pub use supervisor::{
    FailureDetector, HealthChecker, IncidentHistory, IncidentReport, RecoveryEngine, Troubleshooter,
};
