use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use super::RecoveryStrategy;
use crate::domain::FailureEvent;
use crate::error::Result;
use crate::metrics::MetricsProvider;

/// Re-enumerate interfaces, re-check the error rate
pub struct NetworkStrategy {
    metrics: Arc<dyn MetricsProvider>,
    threshold: f64,
}

impl NetworkStrategy {
    pub fn new(metrics: Arc<dyn MetricsProvider>, threshold: f64) -> Self {
        Self { metrics, threshold }
    }
}

#[async_trait]
impl RecoveryStrategy for NetworkStrategy {
    fn name(&self) -> &str {
        "network_error"
    }

    fn steps(&self) -> Vec<String> {
        vec![
            "check network interface status".to_string(),
            "re-enumerate network interfaces".to_string(),
            "verify network error rate".to_string(),
        ]
    }

    async fn execute(&self, _event: &FailureEvent) -> Result<bool> {
        match self.metrics.network_interfaces().await {
            Ok(interfaces) => {
                for interface in &interfaces {
                    match interface.is_up {
                        Some(true) => info!("interface {} is up", interface.name),
                        Some(false) => warn!("interface {} is down", interface.name),
                        None => info!("interface {} link state unknown", interface.name),
                    }
                }
            }
            Err(e) => warn!("could not enumerate interfaces: {}", e),
        }

        let counters = self.metrics.net_io_counters().await?;
        match counters.error_rate_percent() {
            Some(rate) => {
                info!("network error rate now {:.2}%", rate);
                Ok(rate <= self.threshold)
            }
            None => Ok(true),
        }
    }
}
