//! Metrics Provider contract
//!
//! Point-in-time host resource readings consumed by detection rules and by
//! recovery strategies when they re-measure.

pub mod scripted;
pub mod system;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;

pub use scripted::ScriptedMetrics;
pub use system::SystemMetrics;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemoryUsage {
    pub percent: f64,
    pub available_bytes: u64,
}

impl MemoryUsage {
    pub fn available_gib(&self) -> f64 {
        self.available_bytes as f64 / GIB
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiskUsage {
    pub percent: f64,
    pub free_bytes: u64,
}

impl DiskUsage {
    pub fn free_gib(&self) -> f64 {
        self.free_bytes as f64 / GIB
    }
}

/// Cumulative interface counters, summed over all interfaces
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetCounters {
    pub errin: u64,
    pub errout: u64,
    pub dropin: u64,
    pub dropout: u64,
    pub packets_sent: u64,
    pub packets_recv: u64,
}

impl NetCounters {
    pub fn total_packets(&self) -> u64 {
        self.packets_sent.saturating_add(self.packets_recv)
    }

    pub fn total_drops(&self) -> u64 {
        self.dropin.saturating_add(self.dropout)
    }

    pub fn total_errors(&self) -> u64 {
        self.errin
            .saturating_add(self.errout)
            .saturating_add(self.total_drops())
    }

    /// Errors and drops as a percentage of packets; `None` before any traffic
    pub fn error_rate_percent(&self) -> Option<f64> {
        let packets = self.total_packets();
        if packets == 0 {
            return None;
        }
        Some(self.total_errors() as f64 / packets as f64 * 100.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub cpu_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceStatus {
    pub name: String,
    /// `None` when the platform does not expose link state
    pub is_up: Option<bool>,
}

/// Source of host resource readings.
///
/// Every method may fail with `MetricUnavailable`; callers treat that as
/// "no reading" rather than a fatal error.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetricsProvider: Send + Sync {
    async fn cpu_percent(&self) -> Result<f64>;

    async fn memory_usage(&self) -> Result<MemoryUsage>;

    async fn disk_usage(&self, path: &Path) -> Result<DiskUsage>;

    async fn net_io_counters(&self) -> Result<NetCounters>;

    /// Highest CPU consumers first
    async fn top_processes_by_cpu(&self, n: usize) -> Result<Vec<ProcessInfo>>;

    async fn network_interfaces(&self) -> Result<Vec<InterfaceStatus>>;
}
