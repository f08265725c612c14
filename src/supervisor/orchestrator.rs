//! Troubleshooting Orchestrator
//!
//! The control loop. Each tick probes services and runs detection
//! concurrently, records new failures, recovers the ones that qualify, and
//! emits a troubleshooting guide for everything left unresolved. At shutdown
//! it emits the incident report.

use chrono::Utc;
use futures_util::future::join_all;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::detector::FailureDetector;
use super::health_checker::HealthChecker;
use super::history::IncidentHistory;
use super::playbook::{GuideReason, TroubleshootingGuide};
use super::recovery::RecoveryEngine;
use super::report::IncidentReport;
use crate::config::{AppConfig, MonitorConfig};
use crate::domain::{FailureEvent, HealthCheckResult, HealthSummary, MonitorState};
use crate::error::{MedicError, Result};
use crate::metrics::MetricsProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    Recover,
    Guide(GuideReason),
}

/// Everything one tick observed and did
#[derive(Debug, Clone)]
pub struct TickSummary {
    pub tick: u64,
    pub health: HealthSummary,
    pub health_results: Vec<HealthCheckResult>,
    /// New failures, with their state after recovery
    pub failures: Vec<FailureEvent>,
    pub recovery_attempts: usize,
    pub recovered: usize,
    pub guides: Vec<TroubleshootingGuide>,
}

impl TickSummary {
    pub fn unresolved(&self) -> usize {
        self.failures.iter().filter(|f| !f.is_resolved()).count()
    }
}

impl fmt::Display for TickSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tick {}: {}, {} new failures, {} recovery attempts, {} recovered, {} unresolved",
            self.tick,
            self.health,
            self.failures.len(),
            self.recovery_attempts,
            self.recovered,
            self.unresolved()
        )
    }
}

pub struct Troubleshooter {
    monitor: MonitorConfig,
    checker: Arc<HealthChecker>,
    detector: FailureDetector,
    engine: RecoveryEngine,
    history: Arc<IncidentHistory>,
    state_tx: watch::Sender<MonitorState>,
    ticks: AtomicU64,
    last_health: RwLock<Option<HealthSummary>>,
}

impl Troubleshooter {
    pub fn new(
        monitor: MonitorConfig,
        checker: Arc<HealthChecker>,
        detector: FailureDetector,
        engine: RecoveryEngine,
        history: Arc<IncidentHistory>,
    ) -> Self {
        let (state_tx, _) = watch::channel(MonitorState::Idle);
        Self {
            monitor,
            checker,
            detector,
            engine,
            history,
            state_tx,
            ticks: AtomicU64::new(0),
            last_health: RwLock::new(None),
        }
    }

    /// Wire the standard detector and recovery engine from configuration
    pub fn from_config(config: &AppConfig, metrics: Arc<dyn MetricsProvider>) -> Result<Self> {
        let history = Arc::new(IncidentHistory::new(
            config.history.failure_capacity,
            config.history.recovery_capacity,
        ));
        let checker = Arc::new(HealthChecker::new(config.services.clone())?);
        let detector = FailureDetector::standard(metrics.clone(), &config.detection, checker.clone());
        let engine = RecoveryEngine::standard(config, metrics, checker.clone(), history.clone());

        Ok(Self::new(
            config.monitor.clone(),
            checker,
            detector,
            engine,
            history,
        ))
    }

    pub fn state(&self) -> MonitorState {
        *self.state_tx.borrow()
    }

    pub fn state_receiver(&self) -> watch::Receiver<MonitorState> {
        self.state_tx.subscribe()
    }

    pub fn history(&self) -> &Arc<IncidentHistory> {
        &self.history
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    fn transition(&self, next: MonitorState) {
        let current = self.state();
        if current == next {
            return;
        }
        if current.can_transition_to(next) {
            debug!("state {} -> {}", current, next);
            self.state_tx.send_replace(next);
        } else {
            warn!("ignoring invalid state transition {} -> {}", current, next);
        }
    }

    async fn decide(&self, event: &FailureEvent) -> Decision {
        if event.severity() < self.monitor.auto_recover_min_severity {
            return Decision::Guide(GuideReason::BelowRecoveryThreshold);
        }
        if self.monitor.dry_run {
            return Decision::Guide(GuideReason::DryRun);
        }

        let since = Utc::now() - self.monitor.attempt_window();
        let recent = self
            .history
            .recent_attempts(event.failure_type(), event.affected_services(), since)
            .await;
        if recent >= self.monitor.max_attempts_per_window as usize {
            warn!(
                failure_id = event.id(),
                "{} recovery attempts for {} in the last {}s, not recovering",
                recent,
                event.failure_type(),
                self.monitor.attempt_window_secs
            );
            return Decision::Guide(GuideReason::RecoverySuppressed);
        }
        Decision::Recover
    }

    /// One pass: check, evaluate, recover, report
    pub async fn tick(&self, cancel: &CancellationToken) -> Result<TickSummary> {
        let tick = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
        self.transition(MonitorState::Checking);

        let observed = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            pair = async {
                tokio::join!(self.checker.check_all(), self.detector.detect_failures())
            } => Some(pair),
        };
        let Some((health_results, mut failures)) = observed else {
            return Err(MedicError::Cancelled);
        };

        let health = HealthSummary::from_results(&health_results);
        *self.last_health.write().await = Some(health);

        self.transition(MonitorState::Evaluating);
        let mut decisions = Vec::with_capacity(failures.len());
        for event in &failures {
            self.history.record_failure(event.clone()).await;
            decisions.push(self.decide(event).await);
        }

        let recovery_attempts = decisions
            .iter()
            .filter(|d| **d == Decision::Recover)
            .count();
        let mut recovered = 0;
        if recovery_attempts > 0 {
            self.transition(MonitorState::Recovering);
            let attempts = failures
                .iter_mut()
                .zip(&decisions)
                .filter(|(_, decision)| **decision == Decision::Recover)
                .map(|(event, _)| self.engine.attempt_recovery_with(event, cancel));
            recovered = join_all(attempts).await.into_iter().filter(|ok| *ok).count();
        }

        self.transition(MonitorState::Reporting);
        let guides: Vec<TroubleshootingGuide> = failures
            .iter()
            .zip(&decisions)
            .filter_map(|(event, decision)| {
                let reason = match decision {
                    Decision::Guide(reason) => *reason,
                    Decision::Recover if event.is_resolved() => return None,
                    Decision::Recover if !self.engine.has_strategy(event.failure_type()) => {
                        GuideReason::NoStrategy
                    }
                    Decision::Recover => GuideReason::RecoveryFailed,
                };
                Some(TroubleshootingGuide::for_event(event, reason))
            })
            .collect();
        for guide in &guides {
            info!(failure_id = %guide.failure_id, "\n{}", guide.render());
        }

        let summary = TickSummary {
            tick,
            health,
            health_results,
            failures,
            recovery_attempts,
            recovered,
            guides,
        };
        info!("{}", summary);

        self.transition(MonitorState::Idle);
        Ok(summary)
    }

    /// Tick on the configured interval until cancelled or the configured
    /// duration elapses, then emit the final report
    pub async fn run(&self, cancel: CancellationToken) -> IncidentReport {
        let mut interval = tokio::time::interval(self.monitor.interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let deadline = self.monitor.duration().map(|d| Instant::now() + d);
        let until_deadline = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(until_deadline);

        info!(
            "troubleshooter started: {} services, interval {:?}{}",
            self.checker.services().len(),
            self.monitor.interval(),
            if self.monitor.dry_run { ", dry run" } else { "" }
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("cancellation requested, stopping");
                    break;
                }
                _ = &mut until_deadline => {
                    info!("monitoring duration elapsed, stopping");
                    break;
                }
                _ = interval.tick() => {
                    match self.tick(&cancel).await {
                        Ok(_) => {}
                        Err(MedicError::Cancelled) => {
                            info!("tick cancelled, stopping");
                            break;
                        }
                        Err(e) => error!("tick failed: {}", e),
                    }
                }
            }
        }

        // A cancelled tick leaves the loop mid-cycle; Stopped is still reachable
        if self.state().can_transition_to(MonitorState::Reporting) {
            self.transition(MonitorState::Reporting);
        }
        let report = self.report().await;
        info!("\n{}", report.render());
        if let Some(path) = &self.monitor.report_path {
            match report.write_to(path) {
                Ok(()) => info!("report written to {}", path.display()),
                Err(e) => error!("failed to write report to {}: {}", path.display(), e),
            }
        }
        self.transition(MonitorState::Stopped);
        report
    }

    pub async fn report(&self) -> IncidentReport {
        let last_health = *self.last_health.read().await;
        IncidentReport::build(
            &self.history,
            self.monitor.report_recent_recoveries,
            self.ticks(),
            last_health,
        )
        .await
    }
}
