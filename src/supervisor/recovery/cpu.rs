use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::command::run_checked;
use super::RecoveryStrategy;
use crate::config::{CpuMitigation, RecoveryConfig};
use crate::domain::FailureEvent;
use crate::error::{MedicError, Result};
use crate::metrics::{MetricsProvider, ProcessInfo};

const NAME: &str = "high_cpu";

/// Find the top CPU consumer, mitigate it, re-check CPU usage
pub struct CpuStrategy {
    metrics: Arc<dyn MetricsProvider>,
    threshold: f64,
    mitigation: CpuMitigation,
    top_process_count: usize,
    min_process_cpu_percent: f64,
    command_timeout: Duration,
}

impl CpuStrategy {
    pub fn new(metrics: Arc<dyn MetricsProvider>, threshold: f64, config: &RecoveryConfig) -> Self {
        Self {
            metrics,
            threshold,
            mitigation: config.cpu_mitigation,
            top_process_count: config.top_process_count.max(1),
            min_process_cpu_percent: config.min_process_cpu_percent,
            command_timeout: config.command_timeout(),
        }
    }

    /// Highest consumer above the floor, never this process
    fn pick_culprit<'a>(&self, processes: &'a [ProcessInfo]) -> Option<&'a ProcessInfo> {
        let own_pid = std::process::id();
        processes
            .iter()
            .filter(|p| p.pid != own_pid && p.cpu_percent >= self.min_process_cpu_percent)
            .max_by(|a, b| a.cpu_percent.total_cmp(&b.cpu_percent))
    }

    async fn mitigate(&self, process: &ProcessInfo) -> Result<()> {
        match self.mitigation {
            CpuMitigation::LogOnly => {
                info!(
                    "top CPU consumer: {} (pid {}) at {:.1}%",
                    process.name, process.pid, process.cpu_percent
                );
                Ok(())
            }
            CpuMitigation::Renice => {
                let argv: Vec<String> = ["renice", "-n", "10", "-p"]
                    .iter()
                    .map(|s| s.to_string())
                    .chain(std::iter::once(process.pid.to_string()))
                    .collect();
                run_checked(&argv, self.command_timeout).await?;
                info!("reniced {} (pid {})", process.name, process.pid);
                Ok(())
            }
            CpuMitigation::Terminate => {
                terminate(process.pid)?;
                warn!("sent SIGTERM to {} (pid {})", process.name, process.pid);
                Ok(())
            }
        }
    }
}

#[cfg(unix)]
fn terminate(pid: u32) -> Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|_| MedicError::strategy(NAME, format!("pid {pid} out of range")))?;
    kill(Pid::from_raw(raw), Signal::SIGTERM)
        .map_err(|e| MedicError::strategy(NAME, format!("SIGTERM to pid {pid} failed: {e}")))
}

#[cfg(not(unix))]
fn terminate(pid: u32) -> Result<()> {
    Err(MedicError::strategy(
        NAME,
        format!("cannot terminate pid {pid}: signals are not supported on this platform"),
    ))
}

#[async_trait]
impl RecoveryStrategy for CpuStrategy {
    fn name(&self) -> &str {
        NAME
    }

    fn steps(&self) -> Vec<String> {
        vec![
            "identify high CPU processes".to_string(),
            "mitigate top CPU consumer".to_string(),
            "re-check CPU usage".to_string(),
        ]
    }

    async fn execute(&self, _event: &FailureEvent) -> Result<bool> {
        let processes = match self.metrics.top_processes_by_cpu(self.top_process_count).await {
            Ok(processes) => processes,
            Err(e) => {
                warn!("could not list processes: {}", e);
                Vec::new()
            }
        };
        for process in &processes {
            info!(
                "  pid {:>7}  {:>5.1}%  {}",
                process.pid, process.cpu_percent, process.name
            );
        }

        match self.pick_culprit(&processes) {
            Some(culprit) => {
                if let Err(e) = self.mitigate(culprit).await {
                    warn!("CPU mitigation failed: {}", e);
                }
            }
            None => info!(
                "no single process above {:.1}% CPU",
                self.min_process_cpu_percent
            ),
        }

        let cpu = self.metrics.cpu_percent().await?;
        info!("CPU usage after mitigation: {:.1}%", cpu);
        Ok(cpu <= self.threshold)
    }
}
