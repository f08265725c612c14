//! End-to-end scenarios for detection, recovery and guidance.

use async_trait::async_trait;
use medic::config::{AppConfig, ServiceCheck, ServiceConfig};
use medic::domain::{FailureEvent, FailureType, HealthStatus, MonitorState, Severity};
use medic::error::Result;
use medic::metrics::{MetricsProvider, ScriptedMetrics};
use medic::supervisor::detector::CpuRule;
use medic::supervisor::{
    FailureDetector, GuideReason, HealthChecker, IncidentHistory, RecoveryEngine, RecoveryStrategy,
    Troubleshooter,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Config that never touches the real host
fn sandboxed_config(temp_dir: &std::path::Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.recovery.temp_dirs = vec![temp_dir.to_path_buf()];
    config.recovery.log_dirs = Vec::new();
    config.recovery.backup_dirs = Vec::new();
    config.recovery.memory_cleanup_commands = Vec::new();
    config.recovery.restart_settle_secs = 0;
    config
}

fn no_services() -> Arc<HealthChecker> {
    Arc::new(HealthChecker::new(BTreeMap::new()).unwrap())
}

#[tokio::test]
async fn test_high_cpu_is_detected_and_recovered() {
    let scratch = tempfile::tempdir().unwrap();
    let config = sandboxed_config(scratch.path());

    let scripted = Arc::new(ScriptedMetrics::new().with_cpu(92.0));
    scripted.push_cpu(78.0);
    let metrics: Arc<dyn MetricsProvider> = scripted.clone();

    let detector = FailureDetector::new(vec![Box::new(CpuRule::new(metrics.clone(), 85.0, 95.0))]);
    let mut failures = detector.detect_failures().await;
    assert_eq!(failures.len(), 1);
    let mut event = failures.remove(0);
    assert_eq!(event.failure_type(), FailureType::HighCpu);
    assert_eq!(event.severity(), Severity::Medium);

    let history = Arc::new(IncidentHistory::new(100, 100));
    history.record_failure(event.clone()).await;
    let engine = RecoveryEngine::standard(&config, metrics, no_services(), history.clone());

    assert!(engine.attempt_recovery(&mut event).await);
    assert!(event.is_resolved());
    assert!(event.resolution_time().is_some());
    assert_eq!(
        event.resolution_steps(),
        [
            "identify high CPU processes",
            "mitigate top CPU consumer",
            "re-check CPU usage",
        ]
    );

    let records = history.recent_recoveries(10).await;
    assert_eq!(records.len(), 1);
    assert!(records[0].success);
    assert_eq!(records[0].failure_id, event.id());

    let stored = history.failure(event.id()).await.unwrap();
    assert!(stored.is_resolved());
}

#[tokio::test]
async fn test_refused_tcp_service_is_unhealthy() {
    // Bind then drop to get a port nothing listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let checker = HealthChecker::new(BTreeMap::from([(
        "cache".to_string(),
        ServiceConfig::from(ServiceCheck::tcp("127.0.0.1", port, 2.0)),
    )]))
    .unwrap();

    let result = checker.check_service("cache").await.unwrap();
    assert_eq!(result.status, HealthStatus::Unhealthy);
    let error = result.error_message.unwrap();
    assert!(error.contains("connect"), "{error}");
    assert!(result.response_time < 2.0);
}

#[tokio::test]
async fn test_unrecovered_disk_gets_guide_with_attempted_steps() {
    let scratch = tempfile::tempdir().unwrap();
    let config = sandboxed_config(scratch.path());
    let metrics: Arc<dyn MetricsProvider> =
        Arc::new(ScriptedMetrics::new().with_disk(97.0, 512 * 1024 * 1024));

    let troubleshooter = Troubleshooter::from_config(&config, metrics).unwrap();
    let summary = troubleshooter.tick(&CancellationToken::new()).await.unwrap();

    assert_eq!(summary.failures.len(), 1);
    let event = &summary.failures[0];
    assert_eq!(event.failure_type(), FailureType::DiskFull);
    assert_eq!(event.severity(), Severity::Critical);
    assert!(!event.is_resolved());
    assert_eq!(summary.recovery_attempts, 1);
    assert_eq!(summary.recovered, 0);

    assert_eq!(summary.guides.len(), 1);
    let guide = &summary.guides[0];
    assert_eq!(guide.reason, GuideReason::RecoveryFailed);
    assert_eq!(
        guide.attempted_steps,
        ["clean temp files", "compress logs", "delete expired backups"]
    );
    assert!(!guide.possible_causes.is_empty());
    assert_eq!(troubleshooter.state(), MonitorState::Idle);

    let report = troubleshooter.report().await;
    assert_eq!(report.total_failures, 1);
    assert_eq!(report.resolved_failures, 0);
    assert_eq!(report.recent_recoveries.len(), 1);
    assert!(!report.recent_recoveries[0].success);
}

#[tokio::test]
async fn test_unknown_failure_has_no_strategy() {
    let scratch = tempfile::tempdir().unwrap();
    let config = sandboxed_config(scratch.path());
    let history = Arc::new(IncidentHistory::new(10, 10));
    let engine = RecoveryEngine::standard(
        &config,
        Arc::new(ScriptedMetrics::new()),
        no_services(),
        history.clone(),
    );

    let mut event = FailureEvent::new(FailureType::Unknown, Severity::High, "something odd");
    history.record_failure(event.clone()).await;

    assert!(!engine.attempt_recovery(&mut event).await);
    assert!(event.resolution_steps().is_empty());
    assert!(!event.is_resolved());
    assert_eq!(history.len_recoveries().await, 0);
}

/// Tracks how many executions overlap
struct OverlapCounter {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    runs: AtomicUsize,
}

#[async_trait]
impl RecoveryStrategy for OverlapCounter {
    fn name(&self) -> &str {
        "overlap_counter"
    }

    fn steps(&self) -> Vec<String> {
        vec!["restart service".to_string()]
    }

    async fn execute(&self, _event: &FailureEvent) -> Result<bool> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.runs.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(true)
    }
}

#[tokio::test]
async fn test_recoveries_on_one_service_never_overlap() {
    let counter = Arc::new(OverlapCounter {
        in_flight: AtomicUsize::new(0),
        max_in_flight: AtomicUsize::new(0),
        runs: AtomicUsize::new(0),
    });
    let history = Arc::new(IncidentHistory::new(10, 10));
    let engine = Arc::new(
        RecoveryEngine::new(history.clone(), Duration::from_secs(5))
            .with_strategy(FailureType::ServiceDown, counter.clone()),
    );

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let engine = engine.clone();
            let history = history.clone();
            tokio::spawn(async move {
                let mut event =
                    FailureEvent::new(FailureType::ServiceDown, Severity::Critical, format!("down {i}"))
                        .affecting("api");
                history.record_failure(event.clone()).await;
                engine.attempt_recovery(&mut event).await
            })
        })
        .collect();
    for handle in handles {
        assert!(handle.await.unwrap());
    }

    assert_eq!(counter.runs.load(Ordering::SeqCst), 4);
    assert_eq!(counter.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(history.len_recoveries().await, 4);
    for record in history.recent_recoveries(10).await {
        assert!(history.contains_failure(&record.failure_id).await);
    }
}

#[tokio::test]
async fn test_resolved_event_is_not_redispatched() {
    let counter = Arc::new(OverlapCounter {
        in_flight: AtomicUsize::new(0),
        max_in_flight: AtomicUsize::new(0),
        runs: AtomicUsize::new(0),
    });
    let history = Arc::new(IncidentHistory::new(10, 10));
    let engine = RecoveryEngine::new(history.clone(), Duration::from_secs(5))
        .with_strategy(FailureType::ServiceDown, counter.clone());

    let mut event =
        FailureEvent::new(FailureType::ServiceDown, Severity::Critical, "down").affecting("api");
    history.record_failure(event.clone()).await;
    assert!(engine.attempt_recovery(&mut event).await);
    let resolved_at = event.resolution_time();

    assert!(engine.attempt_recovery(&mut event).await);
    assert_eq!(counter.runs.load(Ordering::SeqCst), 1);
    assert_eq!(event.resolution_steps().len(), 1);
    assert_eq!(event.resolution_time(), resolved_at);
    assert_eq!(history.len_recoveries().await, 1);
}

#[tokio::test]
async fn test_check_all_is_bounded_by_slowest_service() {
    // Accepts connections and never answers
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let services: BTreeMap<String, ServiceConfig> = (0..3)
        .map(|i| {
            (
                format!("svc-{i}"),
                ServiceConfig::from(ServiceCheck::http(&format!("http://127.0.0.1:{port}/health"), 1.0)),
            )
        })
        .collect();
    let checker = HealthChecker::new(services).unwrap();

    let started = Instant::now();
    let results = checker.check_all().await;
    let elapsed = started.elapsed();

    assert_eq!(results.len(), 3);
    assert!(elapsed < Duration::from_millis(2500), "took {elapsed:?}");
    for result in &results {
        assert_eq!(result.status, HealthStatus::Unhealthy);
        assert!(result.error_message.as_deref().unwrap().contains("timed out"));
    }
    let names: Vec<_> = results.iter().map(|r| r.service_name.as_str()).collect();
    assert_eq!(names, ["svc-0", "svc-1", "svc-2"]);
}

#[tokio::test]
async fn test_recovery_of_unrecorded_event_leaves_no_record() {
    let scratch = tempfile::tempdir().unwrap();
    let config = sandboxed_config(scratch.path());
    let scripted = Arc::new(ScriptedMetrics::new().with_cpu(78.0));
    let history = Arc::new(IncidentHistory::new(10, 10));
    let engine = RecoveryEngine::standard(&config, scripted, no_services(), history.clone());

    let mut event = FailureEvent::new(FailureType::HighCpu, Severity::High, "cpu at 92%");
    assert!(!engine.attempt_recovery(&mut event).await);
    assert!(!event.is_resolved());
    assert!(event.resolution_steps().is_empty());
    assert!(history.recent_recoveries(10).await.is_empty());
    assert_eq!(history.len_failures().await, 0);
}

#[tokio::test]
async fn test_tick_larger_than_failure_ring_keeps_records_consistent() {
    let scratch = tempfile::tempdir().unwrap();
    let mut config = sandboxed_config(scratch.path());
    config.history.failure_capacity = 1;
    config.monitor.auto_recover_min_severity = Severity::Medium;
    config.detection.cpu_high_above = 99.0;
    let metrics: Arc<dyn MetricsProvider> = Arc::new(
        ScriptedMetrics::new()
            .with_cpu(92.0)
            .with_disk(97.0, 512 * 1024 * 1024),
    );

    let troubleshooter = Troubleshooter::from_config(&config, metrics).unwrap();
    let summary = troubleshooter.tick(&CancellationToken::new()).await.unwrap();
    assert_eq!(summary.failures.len(), 2);

    let history = troubleshooter.history();
    assert_eq!(history.len_failures().await, 1);
    for record in history.recent_recoveries(10).await {
        assert!(history.contains_failure(&record.failure_id).await);
    }
    assert_eq!(history.len_recoveries().await, 1);
    assert_eq!(summary.recovered, 0);
}

#[tokio::test]
async fn test_history_evicts_oldest_first() {
    let history = IncidentHistory::new(3, 3);
    let mut ids = Vec::new();
    for i in 0..5 {
        let event = FailureEvent::new(FailureType::HighMemory, Severity::High, format!("spike {i}"));
        ids.push(event.id().to_string());
        history.record_failure(event).await;
    }

    let kept: Vec<String> = history
        .failures()
        .await
        .iter()
        .map(|f| f.id().to_string())
        .collect();
    assert_eq!(kept, ids[2..]);
    assert!(!history.contains_failure(&ids[0]).await);
}

#[tokio::test]
async fn test_default_config_file_loads() {
    let config = AppConfig::load_from(concat!(env!("CARGO_MANIFEST_DIR"), "/config")).unwrap();
    assert!(config.validate().is_ok());
    assert_eq!(config.services.len(), 4);
    assert_eq!(
        config.services["database"].check,
        ServiceCheck::tcp("localhost", 5432, 3.0)
    );
    assert_eq!(config.monitor.max_attempts_per_window, 3);
}
