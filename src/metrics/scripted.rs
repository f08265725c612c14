//! Deterministic metrics provider.
//!
//! Each metric is a queue of readings. A read consumes the front reading
//! while more than one is queued and repeats the last one afterwards, so a
//! script like `cpu: [92, 78]` reads 92 during detection and 78 on every
//! later re-measure.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::{DiskUsage, InterfaceStatus, MemoryUsage, MetricsProvider, NetCounters, ProcessInfo};
use crate::error::{MedicError, Result};

#[derive(Debug, Clone)]
enum Reading<T> {
    Value(T),
    Unavailable(String),
}

#[derive(Debug, Default)]
struct Script {
    cpu: VecDeque<Reading<f64>>,
    memory: VecDeque<Reading<MemoryUsage>>,
    disk: VecDeque<Reading<DiskUsage>>,
    net: VecDeque<Reading<NetCounters>>,
    processes: Vec<ProcessInfo>,
    interfaces: Vec<InterfaceStatus>,
    cpu_reads: usize,
}

fn next_reading<T: Clone>(queue: &mut VecDeque<Reading<T>>, metric: &str) -> Result<T> {
    let reading = if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    };

    match reading {
        Some(Reading::Value(v)) => Ok(v),
        Some(Reading::Unavailable(reason)) => Err(MedicError::MetricUnavailable(reason)),
        None => Err(MedicError::MetricUnavailable(format!("no {metric} reading scripted"))),
    }
}

/// Metrics provider replaying scripted readings
#[derive(Debug, Default)]
pub struct ScriptedMetrics {
    script: Mutex<Script>,
}

impl ScriptedMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        // A poisoned script only means a test thread panicked mid-push
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn with_cpu(self, percent: f64) -> Self {
        self.push_cpu(percent);
        self
    }

    pub fn with_memory(self, percent: f64, available_bytes: u64) -> Self {
        self.push_memory(percent, available_bytes);
        self
    }

    pub fn with_disk(self, percent: f64, free_bytes: u64) -> Self {
        self.push_disk(percent, free_bytes);
        self
    }

    pub fn with_net(self, counters: NetCounters) -> Self {
        self.push_net(counters);
        self
    }

    pub fn with_processes(self, processes: Vec<ProcessInfo>) -> Self {
        self.script().processes = processes;
        self
    }

    pub fn with_interfaces(self, interfaces: Vec<InterfaceStatus>) -> Self {
        self.script().interfaces = interfaces;
        self
    }

    pub fn push_cpu(&self, percent: f64) {
        self.script().cpu.push_back(Reading::Value(percent));
    }

    pub fn push_memory(&self, percent: f64, available_bytes: u64) {
        self.script().memory.push_back(Reading::Value(MemoryUsage {
            percent,
            available_bytes,
        }));
    }

    pub fn push_disk(&self, percent: f64, free_bytes: u64) {
        self.script()
            .disk
            .push_back(Reading::Value(DiskUsage { percent, free_bytes }));
    }

    pub fn push_net(&self, counters: NetCounters) {
        self.script().net.push_back(Reading::Value(counters));
    }

    /// Make the next CPU read fail
    pub fn fail_cpu(&self, reason: &str) {
        self.script()
            .cpu
            .push_back(Reading::Unavailable(reason.to_string()));
    }

    pub fn fail_memory(&self, reason: &str) {
        self.script()
            .memory
            .push_back(Reading::Unavailable(reason.to_string()));
    }

    pub fn fail_disk(&self, reason: &str) {
        self.script()
            .disk
            .push_back(Reading::Unavailable(reason.to_string()));
    }

    pub fn fail_net(&self, reason: &str) {
        self.script()
            .net
            .push_back(Reading::Unavailable(reason.to_string()));
    }

    /// Number of CPU readings served so far
    pub fn cpu_reads(&self) -> usize {
        self.script().cpu_reads
    }
}

#[async_trait]
impl MetricsProvider for ScriptedMetrics {
    async fn cpu_percent(&self) -> Result<f64> {
        let mut script = self.script();
        script.cpu_reads += 1;
        next_reading(&mut script.cpu, "cpu")
    }

    async fn memory_usage(&self) -> Result<MemoryUsage> {
        next_reading(&mut self.script().memory, "memory")
    }

    async fn disk_usage(&self, _path: &Path) -> Result<DiskUsage> {
        next_reading(&mut self.script().disk, "disk")
    }

    async fn net_io_counters(&self) -> Result<NetCounters> {
        next_reading(&mut self.script().net, "network")
    }

    async fn top_processes_by_cpu(&self, n: usize) -> Result<Vec<ProcessInfo>> {
        let mut processes = self.script().processes.clone();
        processes.sort_by(|a, b| b.cpu_percent.total_cmp(&a.cpu_percent));
        processes.truncate(n);
        Ok(processes)
    }

    async fn network_interfaces(&self) -> Result<Vec<InterfaceStatus>> {
        Ok(self.script().interfaces.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_last_reading_repeats() {
        let metrics = ScriptedMetrics::new().with_cpu(92.0).with_cpu(78.0);
        assert_eq!(metrics.cpu_percent().await.unwrap(), 92.0);
        assert_eq!(metrics.cpu_percent().await.unwrap(), 78.0);
        assert_eq!(metrics.cpu_percent().await.unwrap(), 78.0);
        assert_eq!(metrics.cpu_reads(), 3);
    }

    #[tokio::test]
    async fn test_unscripted_metric_is_unavailable() {
        let metrics = ScriptedMetrics::new();
        let err = metrics.memory_usage().await.unwrap_err();
        assert!(matches!(err, MedicError::MetricUnavailable(_)));
    }

    #[tokio::test]
    async fn test_failure_then_recovery() {
        let metrics = ScriptedMetrics::new();
        metrics.fail_disk("statvfs failed");
        metrics.push_disk(50.0, 1024);
        assert!(metrics.disk_usage(Path::new("/")).await.is_err());
        assert_eq!(metrics.disk_usage(Path::new("/")).await.unwrap().percent, 50.0);
    }
}
