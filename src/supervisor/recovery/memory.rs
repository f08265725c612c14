use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::command::run_checked;
use super::RecoveryStrategy;
use crate::config::RecoveryConfig;
use crate::domain::FailureEvent;
use crate::error::Result;
use crate::metrics::MetricsProvider;

/// Run the configured cache cleanup commands, re-check memory usage
pub struct MemoryStrategy {
    metrics: Arc<dyn MetricsProvider>,
    threshold: f64,
    cleanup_commands: Vec<Vec<String>>,
    command_timeout: Duration,
}

impl MemoryStrategy {
    pub fn new(metrics: Arc<dyn MetricsProvider>, threshold: f64, config: &RecoveryConfig) -> Self {
        Self {
            metrics,
            threshold,
            cleanup_commands: config.memory_cleanup_commands.clone(),
            command_timeout: config.command_timeout(),
        }
    }
}

#[async_trait]
impl RecoveryStrategy for MemoryStrategy {
    fn name(&self) -> &str {
        "high_memory"
    }

    fn steps(&self) -> Vec<String> {
        vec![
            "clear system caches".to_string(),
            "re-check memory usage".to_string(),
        ]
    }

    async fn execute(&self, _event: &FailureEvent) -> Result<bool> {
        for argv in &self.cleanup_commands {
            match run_checked(argv, self.command_timeout).await {
                Ok(_) => info!("cache cleanup `{}` done", argv.join(" ")),
                // A failed cleanup command still lets the re-check decide
                Err(e) => warn!("{}", e),
            }
        }

        let memory = self.metrics.memory_usage().await?;
        info!(
            "memory usage after cleanup: {:.1}% ({:.2}GB available)",
            memory.percent,
            memory.available_gib()
        );
        Ok(memory.percent <= self.threshold)
    }
}
