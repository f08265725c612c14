use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::command::run_checked;
use super::RecoveryStrategy;
use crate::config::{RecoveryConfig, ServiceConfig};
use crate::domain::FailureEvent;
use crate::error::{MedicError, Result};
use crate::supervisor::health_checker::HealthChecker;

const NAME: &str = "service_down";

/// Restart the affected service, re-probe liveness
pub struct ServiceRestartStrategy {
    checker: Arc<HealthChecker>,
    default_command: Option<Vec<String>>,
    settle: Duration,
    command_timeout: Duration,
}

impl ServiceRestartStrategy {
    pub fn new(checker: Arc<HealthChecker>, config: &RecoveryConfig) -> Self {
        Self {
            checker,
            default_command: config.restart_command.clone(),
            settle: config.restart_settle(),
            command_timeout: config.command_timeout(),
        }
    }

    /// Per-service command, else the default template with `{service}` filled in
    pub fn restart_command(&self, service: &str, config: &ServiceConfig) -> Result<Vec<String>> {
        if let Some(command) = &config.restart_command {
            return Ok(command.clone());
        }
        self.default_command
            .as_ref()
            .map(|template| {
                template
                    .iter()
                    .map(|arg| arg.replace("{service}", service))
                    .collect()
            })
            .ok_or_else(|| {
                MedicError::strategy(NAME, format!("no restart command configured for {service}"))
            })
    }
}

#[async_trait]
impl RecoveryStrategy for ServiceRestartStrategy {
    fn name(&self) -> &str {
        NAME
    }

    fn steps(&self) -> Vec<String> {
        vec![
            "check service status".to_string(),
            "restart service".to_string(),
            "verify service recovery".to_string(),
        ]
    }

    async fn execute(&self, event: &FailureEvent) -> Result<bool> {
        let service = event
            .primary_service()
            .ok_or_else(|| MedicError::strategy(NAME, "event names no service"))?;
        let config = self
            .checker
            .service(service)
            .ok_or_else(|| MedicError::UnknownService(service.to_string()))?;

        let before = self.checker.check_one(service, &config.check).await;
        if before.is_healthy() {
            info!("{} answered before restart", service);
            return Ok(true);
        }

        let argv = self.restart_command(service, config)?;
        run_checked(&argv, self.command_timeout).await?;
        info!("restarted {}, waiting {:?} before re-probe", service, self.settle);
        tokio::time::sleep(self.settle).await;

        let after = self.checker.check_one(service, &config.check).await;
        Ok(after.is_healthy())
    }
}
