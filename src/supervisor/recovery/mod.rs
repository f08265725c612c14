//! Recovery Engine
//!
//! Dispatch table from failure type to remediation strategy. The engine
//! appends a strategy's steps to the event before running it, runs it on its
//! own task under a timeout (a panic or timeout is a failed attempt), and
//! records every attempt in the incident history. It never retries.
//!
//! Attempts touching the same service are serialized through per-service
//! locks, always taken in service name order.

pub mod command;
pub mod cpu;
pub mod disk;
pub mod memory;
pub mod network;
pub mod service;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::health_checker::HealthChecker;
use super::history::IncidentHistory;
use crate::config::AppConfig;
use crate::domain::{FailureEvent, FailureType};
use crate::error::{MedicError, Result};
use crate::metrics::MetricsProvider;

pub use cpu::CpuStrategy;
pub use disk::{CleanupSummary, DiskCleanupPlan, DiskStrategy};
pub use memory::MemoryStrategy;
pub use network::NetworkStrategy;
pub use service::ServiceRestartStrategy;

/// A stateless remediation procedure for one failure type
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Named steps, appended to the event before `execute` runs
    fn steps(&self) -> Vec<String>;

    /// Remediate, re-measure, and report whether the triggering condition
    /// no longer holds
    async fn execute(&self, event: &FailureEvent) -> Result<bool>;
}

pub struct RecoveryEngine {
    strategies: HashMap<FailureType, Arc<dyn RecoveryStrategy>>,
    history: Arc<IncidentHistory>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    strategy_timeout: Duration,
}

impl RecoveryEngine {
    /// Engine with an empty dispatch table
    pub fn new(history: Arc<IncidentHistory>, strategy_timeout: Duration) -> Self {
        Self {
            strategies: HashMap::new(),
            history,
            locks: DashMap::new(),
            strategy_timeout,
        }
    }

    /// Engine with the built-in cpu, memory, disk, service and network strategies
    pub fn standard(
        config: &AppConfig,
        metrics: Arc<dyn MetricsProvider>,
        checker: Arc<HealthChecker>,
        history: Arc<IncidentHistory>,
    ) -> Self {
        let detection = &config.detection;
        let recovery = &config.recovery;

        Self::new(history, recovery.strategy_timeout())
            .with_strategy(
                FailureType::HighCpu,
                Arc::new(CpuStrategy::new(
                    metrics.clone(),
                    detection.cpu_percent,
                    recovery,
                )),
            )
            .with_strategy(
                FailureType::HighMemory,
                Arc::new(MemoryStrategy::new(
                    metrics.clone(),
                    detection.memory_percent,
                    recovery,
                )),
            )
            .with_strategy(
                FailureType::DiskFull,
                Arc::new(DiskStrategy::new(
                    metrics.clone(),
                    detection.disk_path.clone(),
                    detection.disk_percent,
                    DiskCleanupPlan::from_config(recovery),
                )),
            )
            .with_strategy(
                FailureType::ServiceDown,
                Arc::new(ServiceRestartStrategy::new(checker, recovery)),
            )
            .with_strategy(
                FailureType::NetworkError,
                Arc::new(NetworkStrategy::new(
                    metrics,
                    detection.network_error_rate_percent,
                )),
            )
    }

    pub fn register(&mut self, failure_type: FailureType, strategy: Arc<dyn RecoveryStrategy>) {
        debug!("registered {} strategy for {}", strategy.name(), failure_type);
        self.strategies.insert(failure_type, strategy);
    }

    pub fn with_strategy(
        mut self,
        failure_type: FailureType,
        strategy: Arc<dyn RecoveryStrategy>,
    ) -> Self {
        self.register(failure_type, strategy);
        self
    }

    pub fn has_strategy(&self, failure_type: FailureType) -> bool {
        self.strategies.contains_key(&failure_type)
    }

    pub fn history(&self) -> &Arc<IncidentHistory> {
        &self.history
    }

    pub async fn attempt_recovery(&self, event: &mut FailureEvent) -> bool {
        self.attempt_recovery_with(event, &CancellationToken::new())
            .await
    }

    /// Run the strategy registered for the event's type.
    ///
    /// Returns true iff the event is resolved afterwards. An already resolved
    /// event returns true without a new record; an unmapped type or an event
    /// missing from the incident history returns false without touching the
    /// event. A cancelled attempt is recorded as a failure.
    pub async fn attempt_recovery_with(
        &self,
        event: &mut FailureEvent,
        cancel: &CancellationToken,
    ) -> bool {
        if event.is_resolved() {
            debug!(failure_id = event.id(), "already resolved, skipping recovery");
            return true;
        }

        let Some(strategy) = self.strategies.get(&event.failure_type()).cloned() else {
            warn!(
                failure_id = event.id(),
                "no strategy registered for {}",
                event.failure_type()
            );
            return false;
        };

        if !self.history.contains_failure(event.id()).await {
            warn!(
                failure_id = event.id(),
                "{} is not in the incident history, skipping recovery",
                event.failure_type()
            );
            return false;
        }

        let services = event.affected_services().clone();
        let guards = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            guards = self.lock_services(&services) => Some(guards),
        };
        let Some(_guards) = guards else {
            return self
                .conclude(event, false, Some("cancelled before start".to_string()))
                .await;
        };

        info!(
            failure_id = event.id(),
            strategy = strategy.name(),
            "attempting recovery of {}",
            event.failure_type()
        );
        event.append_resolution_steps(strategy.steps());

        let (success, error) = self.execute(strategy, event, cancel).await;
        self.conclude(event, success, error).await
    }

    async fn execute(
        &self,
        strategy: Arc<dyn RecoveryStrategy>,
        event: &FailureEvent,
        cancel: &CancellationToken,
    ) -> (bool, Option<String>) {
        let name = strategy.name().to_string();
        let snapshot = event.clone();
        let handle = tokio::spawn(async move { strategy.execute(&snapshot).await });
        let abort = handle.abort_handle();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                abort.abort();
                (false, Some("cancelled".to_string()))
            }
            joined = tokio::time::timeout(self.strategy_timeout, handle) => match joined {
                Ok(Ok(Ok(resolved))) => (resolved, None),
                Ok(Ok(Err(e))) => (false, Some(e.to_string())),
                Ok(Err(e)) if e.is_panic() => (false, Some(format!("strategy {name} panicked"))),
                Ok(Err(e)) => (false, Some(e.to_string())),
                Err(_) => {
                    abort.abort();
                    let err = MedicError::Timeout(self.strategy_timeout);
                    (false, Some(format!("strategy {name}: {err}")))
                }
            },
        }
    }

    async fn conclude(&self, event: &mut FailureEvent, success: bool, error: Option<String>) -> bool {
        if success {
            event.mark_resolved(Utc::now());
            info!(failure_id = event.id(), "recovered {}", event.failure_type());
        } else {
            warn!(
                failure_id = event.id(),
                "recovery of {} failed: {}",
                event.failure_type(),
                error.as_deref().unwrap_or("condition still present")
            );
        }

        if let Err(e) = self.history.record_recovery(event, success, error).await {
            warn!(failure_id = event.id(), "recovery outcome not recorded: {}", e);
        }
        success
    }

    async fn lock_services(&self, services: &BTreeSet<String>) -> Vec<OwnedMutexGuard<()>> {
        let mut guards = Vec::with_capacity(services.len());
        for service in services {
            let lock = self
                .locks
                .entry(service.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone();
            guards.push(lock.lock_owned().await);
        }
        guards
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Severity;

    fn history() -> Arc<IncidentHistory> {
        Arc::new(IncidentHistory::new(100, 100))
    }

    fn mock_strategy<F>(outcome: F) -> Arc<dyn RecoveryStrategy>
    where
        F: Fn(&FailureEvent) -> Result<bool> + Send + Sync + 'static,
    {
        let mut strategy = MockRecoveryStrategy::new();
        strategy.expect_name().return_const("mock".to_string());
        strategy
            .expect_steps()
            .returning(|| vec!["step one".to_string(), "step two".to_string()]);
        strategy.expect_execute().returning(move |e| outcome(e));
        Arc::new(strategy)
    }

    async fn recorded(history: &IncidentHistory, event: FailureEvent) -> FailureEvent {
        history.record_failure(event.clone()).await;
        event
    }

    #[tokio::test]
    async fn test_success_marks_resolved_and_records() {
        let history = history();
        let engine = RecoveryEngine::new(history.clone(), Duration::from_secs(5))
            .with_strategy(FailureType::HighCpu, mock_strategy(|_| Ok(true)));
        let mut event = recorded(
            &history,
            FailureEvent::new(FailureType::HighCpu, Severity::High, "cpu").affecting("system"),
        )
        .await;

        assert!(engine.attempt_recovery(&mut event).await);
        assert!(event.is_resolved());
        assert!(event.resolution_time().is_some());
        assert_eq!(event.resolution_steps(), ["step one", "step two"]);

        let records = history.recent_recoveries(10).await;
        assert_eq!(records.len(), 1);
        assert!(records[0].success);
        assert!(history.failure(event.id()).await.unwrap().is_resolved());
    }

    #[tokio::test]
    async fn test_strategy_error_keeps_steps_and_records_failure() {
        let history = history();
        let engine = RecoveryEngine::new(history.clone(), Duration::from_secs(5)).with_strategy(
            FailureType::HighCpu,
            mock_strategy(|_| Err(MedicError::strategy("mock", "boom"))),
        );
        let mut event =
            recorded(&history, FailureEvent::new(FailureType::HighCpu, Severity::High, "cpu")).await;

        assert!(!engine.attempt_recovery(&mut event).await);
        assert!(!event.is_resolved());
        assert_eq!(event.resolution_steps().len(), 2);

        let records = history.recent_recoveries(10).await;
        assert!(!records[0].success);
        assert!(records[0].error.as_deref().unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn test_panicking_strategy_is_a_failed_attempt() {
        let history = history();
        let engine = RecoveryEngine::new(history.clone(), Duration::from_secs(5)).with_strategy(
            FailureType::DiskFull,
            mock_strategy(|_| panic!("strategy bug")),
        );
        let mut event = recorded(
            &history,
            FailureEvent::new(FailureType::DiskFull, Severity::Critical, "disk"),
        )
        .await;

        assert!(!engine.attempt_recovery(&mut event).await);
        let records = history.recent_recoveries(10).await;
        assert_eq!(records.len(), 1);
        assert!(records[0].error.as_deref().unwrap().contains("panicked"));
    }

    #[tokio::test]
    async fn test_unmapped_type_is_untouched() {
        let history = history();
        let engine = RecoveryEngine::new(history.clone(), Duration::from_secs(5));
        let mut event = recorded(
            &history,
            FailureEvent::new(FailureType::Unknown, Severity::Critical, "???"),
        )
        .await;
        let before = event.clone();

        assert!(!engine.attempt_recovery(&mut event).await);
        assert_eq!(event, before);
        assert_eq!(history.len_recoveries().await, 0);
    }

    #[tokio::test]
    async fn test_already_resolved_is_not_recorded_again() {
        let history = history();
        let engine = RecoveryEngine::new(history.clone(), Duration::from_secs(5))
            .with_strategy(FailureType::HighCpu, mock_strategy(|_| Ok(true)));
        let mut event =
            recorded(&history, FailureEvent::new(FailureType::HighCpu, Severity::High, "cpu")).await;

        assert!(engine.attempt_recovery(&mut event).await);
        assert!(engine.attempt_recovery(&mut event).await);
        assert_eq!(history.len_recoveries().await, 1);
        assert_eq!(event.resolution_steps().len(), 2);
    }

    #[tokio::test]
    async fn test_unrecorded_event_is_not_recovered() {
        let history = history();
        let engine = RecoveryEngine::new(history.clone(), Duration::from_secs(5))
            .with_strategy(FailureType::HighCpu, mock_strategy(|_| Ok(true)));
        let mut event = FailureEvent::new(FailureType::HighCpu, Severity::High, "cpu");
        let before = event.clone();

        assert!(!engine.attempt_recovery(&mut event).await);
        assert_eq!(event, before);
        assert_eq!(history.len_recoveries().await, 0);
        assert_eq!(history.len_failures().await, 0);
    }

    #[tokio::test]
    async fn test_evicted_event_leaves_no_record() {
        let history = Arc::new(IncidentHistory::new(1, 10));
        let engine = RecoveryEngine::new(history.clone(), Duration::from_secs(5))
            .with_strategy(FailureType::HighCpu, mock_strategy(|_| Ok(true)));
        let mut evicted =
            recorded(&history, FailureEvent::new(FailureType::HighCpu, Severity::High, "first")).await;
        let mut kept =
            recorded(&history, FailureEvent::new(FailureType::HighCpu, Severity::High, "second")).await;

        assert!(!engine.attempt_recovery(&mut evicted).await);
        assert!(evicted.resolution_steps().is_empty());
        assert!(engine.attempt_recovery(&mut kept).await);

        let records = history.recent_recoveries(10).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].failure_id, kept.id());
    }

    struct SlowStrategy(Duration);

    #[async_trait]
    impl RecoveryStrategy for SlowStrategy {
        fn name(&self) -> &str {
            "slow"
        }

        fn steps(&self) -> Vec<String> {
            vec!["wait".to_string()]
        }

        async fn execute(&self, _event: &FailureEvent) -> Result<bool> {
            tokio::time::sleep(self.0).await;
            Ok(true)
        }
    }

    #[tokio::test]
    async fn test_timeout_is_a_failed_attempt() {
        let history = history();
        let engine = RecoveryEngine::new(history.clone(), Duration::from_millis(50)).with_strategy(
            FailureType::NetworkError,
            Arc::new(SlowStrategy(Duration::from_secs(10))),
        );
        let mut event = recorded(
            &history,
            FailureEvent::new(FailureType::NetworkError, Severity::High, "net"),
        )
        .await;

        assert!(!engine.attempt_recovery(&mut event).await);
        let records = history.recent_recoveries(1).await;
        assert_eq!(
            records[0].error.as_deref(),
            Some("strategy slow: Operation timed out after 50ms")
        );
        assert_eq!(records[0].steps, vec!["wait".to_string()]);
    }

    #[tokio::test]
    async fn test_cancellation_is_recorded_as_failure() {
        let history = history();
        let engine = RecoveryEngine::new(history.clone(), Duration::from_secs(30)).with_strategy(
            FailureType::NetworkError,
            Arc::new(SlowStrategy(Duration::from_secs(10))),
        );
        let mut event = recorded(
            &history,
            FailureEvent::new(FailureType::NetworkError, Severity::High, "net"),
        )
        .await;

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        assert!(!engine.attempt_recovery_with(&mut event, &cancel).await);
        assert!(started.elapsed() < Duration::from_secs(5));

        let records = history.recent_recoveries(1).await;
        assert_eq!(records.len(), 1);
        assert!(!records[0].success);
        assert_eq!(records[0].error.as_deref(), Some("cancelled"));
    }
}
