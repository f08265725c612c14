//! Failure Detector
//!
//! A fixed set of independent detection rules. Each rule yields at most one
//! event per pass; a rule that cannot read its metric is logged and skipped
//! so the rest of the pass still runs.

use async_trait::async_trait;
use futures_util::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use super::health_checker::HealthChecker;
use crate::config::{DetectionConfig, ServiceCheck};
use crate::domain::{FailureEvent, FailureType, HealthStatus, Severity};
use crate::error::Result;
use crate::metrics::MetricsProvider;

/// One independent detection rule
#[async_trait]
pub trait DetectionRule: Send + Sync {
    fn name(&self) -> &str;

    /// `Ok(None)` when the condition does not hold
    async fn evaluate(&self) -> Result<Option<FailureEvent>>;
}

pub struct CpuRule {
    metrics: Arc<dyn MetricsProvider>,
    threshold: f64,
    high_above: f64,
}

impl CpuRule {
    pub fn new(metrics: Arc<dyn MetricsProvider>, threshold: f64, high_above: f64) -> Self {
        Self {
            metrics,
            threshold,
            high_above,
        }
    }
}

#[async_trait]
impl DetectionRule for CpuRule {
    fn name(&self) -> &str {
        "cpu"
    }

    async fn evaluate(&self) -> Result<Option<FailureEvent>> {
        let cpu = self.metrics.cpu_percent().await?;
        if cpu <= self.threshold {
            return Ok(None);
        }

        let severity = if cpu > self.high_above {
            Severity::High
        } else {
            Severity::Medium
        };
        let event = FailureEvent::new(
            FailureType::HighCpu,
            severity,
            format!("CPU usage too high: {cpu:.1}%"),
        )
        .with_symptom(format!("CPU usage at {cpu:.1}%"))
        .with_symptom("system response slows down")
        .with_symptom("application performance degraded")
        .affecting("system");
        Ok(Some(event))
    }
}

pub struct MemoryRule {
    metrics: Arc<dyn MetricsProvider>,
    threshold: f64,
    critical_above: f64,
}

impl MemoryRule {
    pub fn new(metrics: Arc<dyn MetricsProvider>, threshold: f64, critical_above: f64) -> Self {
        Self {
            metrics,
            threshold,
            critical_above,
        }
    }
}

#[async_trait]
impl DetectionRule for MemoryRule {
    fn name(&self) -> &str {
        "memory"
    }

    async fn evaluate(&self) -> Result<Option<FailureEvent>> {
        let memory = self.metrics.memory_usage().await?;
        if memory.percent <= self.threshold {
            return Ok(None);
        }

        let severity = if memory.percent > self.critical_above {
            Severity::Critical
        } else {
            Severity::High
        };
        let event = FailureEvent::new(
            FailureType::HighMemory,
            severity,
            format!("Memory usage too high: {:.1}%", memory.percent),
        )
        .with_symptom(format!("memory usage at {:.1}%", memory.percent))
        .with_symptom(format!("available memory: {:.2}GB", memory.available_gib()))
        .with_symptom("system may start swapping")
        .affecting("system");
        Ok(Some(event))
    }
}

pub struct DiskRule {
    metrics: Arc<dyn MetricsProvider>,
    path: PathBuf,
    threshold: f64,
    severity: Severity,
}

impl DiskRule {
    pub fn new(
        metrics: Arc<dyn MetricsProvider>,
        path: PathBuf,
        threshold: f64,
        severity: Severity,
    ) -> Self {
        Self {
            metrics,
            path,
            threshold,
            severity,
        }
    }
}

#[async_trait]
impl DetectionRule for DiskRule {
    fn name(&self) -> &str {
        "disk"
    }

    async fn evaluate(&self) -> Result<Option<FailureEvent>> {
        let disk = self.metrics.disk_usage(&self.path).await?;
        if disk.percent <= self.threshold {
            return Ok(None);
        }

        let event = FailureEvent::new(
            FailureType::DiskFull,
            self.severity,
            format!(
                "Disk space low on {}: {:.1}% used",
                self.path.display(),
                disk.percent
            ),
        )
        .with_symptom(format!("disk usage at {:.1}%", disk.percent))
        .with_symptom(format!("free space: {:.2}GB", disk.free_gib()))
        .with_symptom("files may fail to write")
        .affecting("system")
        .affecting("database")
        .affecting("logs");
        Ok(Some(event))
    }
}

pub struct NetworkErrorRule {
    metrics: Arc<dyn MetricsProvider>,
    threshold: f64,
    severity: Severity,
}

impl NetworkErrorRule {
    pub fn new(metrics: Arc<dyn MetricsProvider>, threshold: f64, severity: Severity) -> Self {
        Self {
            metrics,
            threshold,
            severity,
        }
    }
}

#[async_trait]
impl DetectionRule for NetworkErrorRule {
    fn name(&self) -> &str {
        "network"
    }

    async fn evaluate(&self) -> Result<Option<FailureEvent>> {
        let counters = self.metrics.net_io_counters().await?;
        let Some(rate) = counters.error_rate_percent() else {
            debug!("no network traffic yet, skipping error rate");
            return Ok(None);
        };
        if rate <= self.threshold {
            return Ok(None);
        }

        let event = FailureEvent::new(
            FailureType::NetworkError,
            self.severity,
            format!("Network error rate too high: {rate:.2}%"),
        )
        .with_symptom(format!(
            "network errors: {}",
            counters.errin.saturating_add(counters.errout)
        ))
        .with_symptom(format!("dropped packets: {}", counters.total_drops()))
        .with_symptom("network connections unstable")
        .affecting("network");
        Ok(Some(event))
    }
}

/// Flags one registered service as down when its liveness probe fails
pub struct ServiceLivenessRule {
    rule_name: String,
    service: String,
    check: ServiceCheck,
    checker: Arc<HealthChecker>,
}

impl ServiceLivenessRule {
    pub fn new(service: &str, check: ServiceCheck, checker: Arc<HealthChecker>) -> Self {
        Self {
            rule_name: format!("service:{service}"),
            service: service.to_string(),
            check,
            checker,
        }
    }
}

#[async_trait]
impl DetectionRule for ServiceLivenessRule {
    fn name(&self) -> &str {
        &self.rule_name
    }

    async fn evaluate(&self) -> Result<Option<FailureEvent>> {
        let result = self.checker.check_one(&self.service, &self.check).await;
        if result.status == HealthStatus::Healthy {
            return Ok(None);
        }

        let error = result
            .error_message
            .clone()
            .unwrap_or_else(|| "no response".to_string());
        let event = FailureEvent::new(
            FailureType::ServiceDown,
            Severity::Critical,
            format!("Service {} is not responding", self.service),
        )
        .with_symptom(format!("health check {}: {error}", result.status))
        .with_symptom(format!("probe took {:.2}s", result.response_time))
        .with_symptom("service unavailable to clients")
        .affecting(self.service.as_str());
        Ok(Some(event))
    }
}

pub struct FailureDetector {
    rules: Vec<Box<dyn DetectionRule>>,
}

impl FailureDetector {
    pub fn new(rules: Vec<Box<dyn DetectionRule>>) -> Self {
        Self { rules }
    }

    /// Resource rules plus one liveness rule per registered service
    pub fn standard(
        metrics: Arc<dyn MetricsProvider>,
        config: &DetectionConfig,
        checker: Arc<HealthChecker>,
    ) -> Self {
        let mut rules: Vec<Box<dyn DetectionRule>> = vec![
            Box::new(CpuRule::new(
                metrics.clone(),
                config.cpu_percent,
                config.cpu_high_above,
            )),
            Box::new(MemoryRule::new(
                metrics.clone(),
                config.memory_percent,
                config.memory_critical_above,
            )),
            Box::new(DiskRule::new(
                metrics.clone(),
                config.disk_path.clone(),
                config.disk_percent,
                config.disk_severity,
            )),
            Box::new(NetworkErrorRule::new(
                metrics,
                config.network_error_rate_percent,
                config.network_severity,
            )),
        ];

        for (name, service) in checker.services() {
            rules.push(Box::new(ServiceLivenessRule::new(
                name,
                service.check.clone(),
                checker.clone(),
            )));
        }

        Self { rules }
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Run every rule concurrently. Events come back in rule order.
    pub async fn detect_failures(&self) -> Vec<FailureEvent> {
        let outcomes = join_all(self.rules.iter().map(|rule| rule.evaluate())).await;

        let mut events = Vec::new();
        for (rule, outcome) in self.rules.iter().zip(outcomes) {
            match outcome {
                Ok(Some(event)) => {
                    warn!(
                        rule = rule.name(),
                        failure_id = event.id(),
                        severity = %event.severity(),
                        "{}",
                        event.description()
                    );
                    events.push(event);
                }
                Ok(None) => {}
                Err(e) => warn!(rule = rule.name(), "detection rule skipped: {}", e),
            }
        }
        events
    }
}
