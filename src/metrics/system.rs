//! Live host metrics backed by `sysinfo`

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use sysinfo::{Disks, Networks, System, MINIMUM_CPU_UPDATE_INTERVAL};
use tracing::debug;

use super::{DiskUsage, InterfaceStatus, MemoryUsage, MetricsProvider, NetCounters, ProcessInfo};
use crate::error::{MedicError, Result};

/// Metrics provider reading the local host.
///
/// Every sysinfo refresh and `/proc` or `/sys` read runs on the blocking pool.
pub struct SystemMetrics {
    system: Arc<Mutex<System>>,
}

impl SystemMetrics {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_memory();
        Self {
            system: Arc::new(Mutex::new(system)),
        }
    }

    /// Run `f` against the shared `System` on the blocking pool
    async fn with_system<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut System) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let system = self.system.clone();
        blocking(move || {
            let mut guard = lock(&system)?;
            f(&mut guard)
        })
        .await
    }
}

impl Default for SystemMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn lock(system: &Mutex<System>) -> Result<MutexGuard<'_, System>> {
    system
        .lock()
        .map_err(|_| MedicError::MetricUnavailable("system metrics lock poisoned".to_string()))
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| MedicError::MetricUnavailable(format!("metrics task failed: {e}")))?
}

#[async_trait]
impl MetricsProvider for SystemMetrics {
    async fn cpu_percent(&self) -> Result<f64> {
        // Usage is a delta between two refreshes
        self.with_system(|system| {
            system.refresh_cpu();
            Ok(())
        })
        .await?;
        tokio::time::sleep(MINIMUM_CPU_UPDATE_INTERVAL).await;

        self.with_system(|system| {
            system.refresh_cpu();
            if system.cpus().is_empty() {
                return Err(MedicError::MetricUnavailable("no CPUs reported".to_string()));
            }
            Ok(system.global_cpu_info().cpu_usage() as f64)
        })
        .await
    }

    async fn memory_usage(&self) -> Result<MemoryUsage> {
        self.with_system(|system| {
            system.refresh_memory();

            let total = system.total_memory();
            if total == 0 {
                return Err(MedicError::MetricUnavailable(
                    "total memory reported as 0".to_string(),
                ));
            }
            let available = system.available_memory().min(total);

            Ok(MemoryUsage {
                percent: (total - available) as f64 / total as f64 * 100.0,
                available_bytes: available,
            })
        })
        .await
    }

    async fn disk_usage(&self, path: &Path) -> Result<DiskUsage> {
        let path = path.to_path_buf();
        blocking(move || read_disk_usage(&path)).await
    }

    async fn net_io_counters(&self) -> Result<NetCounters> {
        blocking(|| {
            if let Some(counters) = read_proc_net_dev() {
                return Ok(counters);
            }

            // sysinfo has no drop counters
            let networks = Networks::new_with_refreshed_list();
            let counters = networks
                .list()
                .values()
                .fold(NetCounters::default(), |mut acc, data| {
                    acc.errin += data.total_errors_on_received();
                    acc.errout += data.total_errors_on_transmitted();
                    acc.packets_recv += data.total_packets_received();
                    acc.packets_sent += data.total_packets_transmitted();
                    acc
                });
            Ok(counters)
        })
        .await
    }

    async fn top_processes_by_cpu(&self, n: usize) -> Result<Vec<ProcessInfo>> {
        self.with_system(|system| {
            system.refresh_processes();
            Ok(())
        })
        .await?;
        tokio::time::sleep(MINIMUM_CPU_UPDATE_INTERVAL).await;

        self.with_system(move |system| {
            system.refresh_processes();

            let mut processes: Vec<ProcessInfo> = system
                .processes()
                .iter()
                .map(|(pid, process)| ProcessInfo {
                    pid: pid.as_u32(),
                    name: process.name().to_string(),
                    cpu_percent: process.cpu_usage() as f64,
                })
                .collect();

            processes.sort_by(|a, b| b.cpu_percent.total_cmp(&a.cpu_percent));
            processes.truncate(n);
            Ok(processes)
        })
        .await
    }

    async fn network_interfaces(&self) -> Result<Vec<InterfaceStatus>> {
        let interfaces = blocking(|| {
            let networks = Networks::new_with_refreshed_list();
            let mut interfaces: Vec<InterfaceStatus> = networks
                .list()
                .keys()
                .map(|name| InterfaceStatus {
                    is_up: read_operstate(name),
                    name: name.clone(),
                })
                .collect();
            interfaces.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(interfaces)
        })
        .await?;
        debug!("enumerated {} network interfaces", interfaces.len());
        Ok(interfaces)
    }
}

fn read_disk_usage(path: &Path) -> Result<DiskUsage> {
    let target = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let disks = Disks::new_with_refreshed_list();

    // Deepest mount point containing the path
    let disk = disks
        .list()
        .iter()
        .filter(|d| target.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().components().count())
        .ok_or_else(|| {
            MedicError::MetricUnavailable(format!("no disk mounted at {}", target.display()))
        })?;

    let total = disk.total_space();
    if total == 0 {
        return Err(MedicError::MetricUnavailable(format!(
            "disk at {} reports zero capacity",
            disk.mount_point().display()
        )));
    }
    let free = disk.available_space().min(total);

    Ok(DiskUsage {
        percent: (total - free) as f64 / total as f64 * 100.0,
        free_bytes: free,
    })
}

fn read_proc_net_dev() -> Option<NetCounters> {
    if !cfg!(target_os = "linux") {
        return None;
    }
    let content = std::fs::read_to_string("/proc/net/dev").ok()?;
    parse_proc_net_dev(&content)
}

/// Sum the counters of every interface except loopback
pub(crate) fn parse_proc_net_dev(content: &str) -> Option<NetCounters> {
    let mut counters = NetCounters::default();
    let mut seen = false;

    for line in content.lines().skip(2) {
        let Some((name, stats)) = line.split_once(':') else {
            continue;
        };
        if name.trim() == "lo" {
            continue;
        }
        let fields: Vec<u64> = stats
            .split_whitespace()
            .filter_map(|f| f.parse().ok())
            .collect();
        // rx: bytes packets errs drop fifo frame compressed multicast
        // tx: bytes packets errs drop ...
        if fields.len() < 12 {
            continue;
        }
        counters.packets_recv += fields[1];
        counters.errin += fields[2];
        counters.dropin += fields[3];
        counters.packets_sent += fields[9];
        counters.errout += fields[10];
        counters.dropout += fields[11];
        seen = true;
    }

    seen.then_some(counters)
}

fn read_operstate(interface: &str) -> Option<bool> {
    let path = PathBuf::from("/sys/class/net").join(interface).join("operstate");
    let state = std::fs::read_to_string(path).ok()?;
    match state.trim() {
        "up" => Some(true),
        "down" | "lowerlayerdown" | "notpresent" => Some(false),
        _ => None,
    }
}
