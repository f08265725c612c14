//! Bounded incident history
//!
//! Two FIFO ring buffers: detected failure events and recovery records.
//! When full, the oldest entry is evicted.

use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, VecDeque};
use tokio::sync::RwLock;
use tracing::debug;

use crate::domain::{FailureEvent, FailureType, RecoveryRecord};
use crate::error::{MedicError, Result};

pub struct IncidentHistory {
    failures: RwLock<VecDeque<FailureEvent>>,
    recoveries: RwLock<VecDeque<RecoveryRecord>>,
    failure_capacity: usize,
    recovery_capacity: usize,
}

impl IncidentHistory {
    pub fn new(failure_capacity: usize, recovery_capacity: usize) -> Self {
        let failure_capacity = failure_capacity.max(1);
        let recovery_capacity = recovery_capacity.max(1);
        Self {
            failures: RwLock::new(VecDeque::with_capacity(failure_capacity)),
            recoveries: RwLock::new(VecDeque::with_capacity(recovery_capacity)),
            failure_capacity,
            recovery_capacity,
        }
    }

    /// Append a detected event, evicting the oldest when full
    pub async fn record_failure(&self, event: FailureEvent) {
        let mut failures = self.failures.write().await;
        if failures.len() >= self.failure_capacity {
            if let Some(evicted) = failures.pop_front() {
                debug!("failure history full, evicting {}", evicted.id());
            }
        }
        failures.push_back(event);
    }

    /// Sync the stored event with the recovery outcome and append a record.
    ///
    /// Every record references a retained event: when the event is no longer
    /// in the failure ring nothing is appended and `UnknownFailure` is returned.
    pub async fn record_recovery(
        &self,
        event: &FailureEvent,
        success: bool,
        error: Option<String>,
    ) -> Result<RecoveryRecord> {
        // Lock order: failures, then recoveries
        let mut failures = self.failures.write().await;
        let Some(stored) = failures.iter_mut().rev().find(|f| f.id() == event.id()) else {
            return Err(MedicError::UnknownFailure(event.id().to_string()));
        };
        stored.absorb_outcome(event);

        let record = RecoveryRecord::from_event(event, success, error);
        let mut recoveries = self.recoveries.write().await;
        if recoveries.len() >= self.recovery_capacity {
            recoveries.pop_front();
        }
        recoveries.push_back(record.clone());
        Ok(record)
    }

    /// All retained failure events, oldest first
    pub async fn failures(&self) -> Vec<FailureEvent> {
        self.failures.read().await.iter().cloned().collect()
    }

    pub async fn failure(&self, id: &str) -> Option<FailureEvent> {
        self.failures
            .read()
            .await
            .iter()
            .rev()
            .find(|f| f.id() == id)
            .cloned()
    }

    pub async fn contains_failure(&self, id: &str) -> bool {
        self.failures.read().await.iter().any(|f| f.id() == id)
    }

    /// The most recent `limit` recovery records, oldest first
    pub async fn recent_recoveries(&self, limit: usize) -> Vec<RecoveryRecord> {
        let recoveries = self.recoveries.read().await;
        let skip = recoveries.len().saturating_sub(limit);
        recoveries.iter().skip(skip).cloned().collect()
    }

    /// Recovery attempts for the same failure type and service set since `since`
    pub async fn recent_attempts(
        &self,
        failure_type: FailureType,
        services: &BTreeSet<String>,
        since: DateTime<Utc>,
    ) -> usize {
        self.recoveries
            .read()
            .await
            .iter()
            .filter(|r| {
                r.failure_type == failure_type
                    && &r.affected_services == services
                    && r.timestamp >= since
            })
            .count()
    }

    pub async fn len_failures(&self) -> usize {
        self.failures.read().await.len()
    }

    pub async fn len_recoveries(&self) -> usize {
        self.recoveries.read().await.len()
    }
}
