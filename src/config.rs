use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::Severity;
use crate::error::Result;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    /// Service registry, loaded once at startup
    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Control loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Seconds between ticks
    pub interval_secs: u64,
    /// Stop after this many seconds (runs until cancelled when unset)
    pub duration_secs: Option<u64>,
    /// Lowest severity that triggers automatic recovery
    pub auto_recover_min_severity: Severity,
    /// Detect and guide only, never remediate
    pub dry_run: bool,
    /// Recovery attempts allowed per failure type and service set inside the window
    pub max_attempts_per_window: u32,
    pub attempt_window_secs: u64,
    /// Number of recovery records listed in the final report
    pub report_recent_recoveries: usize,
    /// Where to write the final report as JSON
    pub report_path: Option<PathBuf>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            duration_secs: None,
            auto_recover_min_severity: Severity::High,
            dry_run: false,
            max_attempts_per_window: 3,
            attempt_window_secs: 300,
            report_recent_recoveries: 5,
            report_path: None,
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration_secs.map(Duration::from_secs)
    }

    pub fn attempt_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.attempt_window_secs as i64)
    }
}

/// Detection thresholds and severity breakpoints.
///
/// A rule fires when a reading is strictly above its threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
    /// (errors + drops) / packets, in percent
    pub network_error_rate_percent: f64,
    /// Filesystem watched by the disk rule
    pub disk_path: PathBuf,
    /// CPU above this is `high`, otherwise `medium`
    pub cpu_high_above: f64,
    /// Memory above this is `critical`, otherwise `high`
    pub memory_critical_above: f64,
    pub disk_severity: Severity,
    pub network_severity: Severity,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            cpu_percent: 85.0,
            memory_percent: 90.0,
            disk_percent: 95.0,
            network_error_rate_percent: 1.0,
            disk_path: PathBuf::from("/"),
            cpu_high_above: 95.0,
            memory_critical_above: 98.0,
            disk_severity: Severity::Critical,
            network_severity: Severity::Medium,
        }
    }
}

/// What the CPU strategy does to the top consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CpuMitigation {
    /// Identify and log only
    #[default]
    LogOnly,
    /// Lower the process priority with `renice`
    Renice,
    /// Send SIGTERM (Unix only)
    Terminate,
}

/// Recovery strategy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Upper bound on a single strategy execution
    pub strategy_timeout_secs: u64,
    /// Upper bound on each external command
    pub command_timeout_secs: u64,
    pub cpu_mitigation: CpuMitigation,
    pub top_process_count: usize,
    /// Processes below this CPU% are never picked as the culprit
    pub min_process_cpu_percent: f64,
    /// Commands run by the memory strategy, in order
    pub memory_cleanup_commands: Vec<Vec<String>>,
    /// Files older than this are eligible for temp purge and log compression
    pub retention_days: u64,
    pub backup_retention_days: u64,
    pub temp_dirs: Vec<PathBuf>,
    pub log_dirs: Vec<PathBuf>,
    pub backup_dirs: Vec<PathBuf>,
    /// Default restart command; `{service}` is replaced by the service name
    pub restart_command: Option<Vec<String>>,
    /// Wait between a restart and the liveness re-probe
    pub restart_settle_secs: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            strategy_timeout_secs: 120,
            command_timeout_secs: 30,
            cpu_mitigation: CpuMitigation::LogOnly,
            top_process_count: 5,
            min_process_cpu_percent: 10.0,
            memory_cleanup_commands: vec![vec!["sync".to_string()]],
            retention_days: 7,
            backup_retention_days: 30,
            temp_dirs: vec![PathBuf::from("/tmp"), PathBuf::from("/var/tmp")],
            log_dirs: Vec::new(),
            backup_dirs: Vec::new(),
            restart_command: None,
            restart_settle_secs: 2,
        }
    }
}

impl RecoveryConfig {
    pub fn strategy_timeout(&self) -> Duration {
        Duration::from_secs(self.strategy_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_days * 24 * 60 * 60)
    }

    pub fn backup_retention(&self) -> Duration {
        Duration::from_secs(self.backup_retention_days * 24 * 60 * 60)
    }

    pub fn restart_settle(&self) -> Duration {
        Duration::from_secs(self.restart_settle_secs)
    }
}

/// Ring buffer capacities
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub failure_capacity: usize,
    pub recovery_capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            failure_capacity: 1000,
            recovery_capacity: 100,
        }
    }
}

/// How a service is probed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ServiceCheck {
    Http {
        url: String,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: f64,
    },
    Tcp {
        host: String,
        port: u16,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: f64,
    },
}

/// Upper bound on a single probe timeout
pub const MAX_PROBE_TIMEOUT_SECS: f64 = 3600.0;

fn default_timeout_secs() -> f64 {
    5.0
}

impl ServiceCheck {
    pub fn http(url: &str, timeout_secs: f64) -> Self {
        ServiceCheck::Http {
            url: url.to_string(),
            timeout_secs,
        }
    }

    pub fn tcp(host: &str, port: u16, timeout_secs: f64) -> Self {
        ServiceCheck::Tcp {
            host: host.to_string(),
            port,
            timeout_secs,
        }
    }

    pub fn timeout_secs(&self) -> f64 {
        match self {
            ServiceCheck::Http { timeout_secs, .. } | ServiceCheck::Tcp { timeout_secs, .. } => {
                *timeout_secs
            }
        }
    }

    /// Probe timeout, clamped to `MAX_PROBE_TIMEOUT_SECS`; NaN and negatives become zero
    pub fn timeout(&self) -> Duration {
        let secs = self.timeout_secs().max(0.0).min(MAX_PROBE_TIMEOUT_SECS);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServiceCheck::Http { .. } => "http",
            ServiceCheck::Tcp { .. } => "tcp",
        }
    }

    /// URL or host:port
    pub fn target(&self) -> String {
        match self {
            ServiceCheck::Http { url, .. } => url.clone(),
            ServiceCheck::Tcp { host, port, .. } => format!("{host}:{port}"),
        }
    }
}

/// One service registry entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(flatten)]
    pub check: ServiceCheck,
    /// Overrides `recovery.restart_command` for this service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_command: Option<Vec<String>>,
}

impl From<ServiceCheck> for ServiceConfig {
    fn from(check: ServiceCheck) -> Self {
        Self {
            check,
            restart_command: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Enable JSON formatted logs
    pub json: bool,
    /// Write a daily rotated log file here
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            dir: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> std::result::Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> std::result::Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("MEDIC_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (MEDIC_MONITOR__INTERVAL_SECS, etc.)
            .add_source(
                Environment::with_prefix("MEDIC")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate configuration values
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.monitor.interval_secs == 0 {
            errors.push("monitor.interval_secs must be positive".to_string());
        }

        if self.monitor.max_attempts_per_window == 0 {
            errors.push("monitor.max_attempts_per_window must be positive".to_string());
        }

        let percents = [
            ("detection.cpu_percent", self.detection.cpu_percent),
            ("detection.memory_percent", self.detection.memory_percent),
            ("detection.disk_percent", self.detection.disk_percent),
            ("detection.cpu_high_above", self.detection.cpu_high_above),
            ("detection.memory_critical_above", self.detection.memory_critical_above),
        ];
        for (name, value) in percents {
            if !(0.0..=100.0).contains(&value) {
                errors.push(format!("{name} must be between 0 and 100 (got {value})"));
            }
        }

        if self.detection.network_error_rate_percent < 0.0 {
            errors.push("detection.network_error_rate_percent must not be negative".to_string());
        }

        if self.detection.cpu_high_above < self.detection.cpu_percent {
            errors.push("detection.cpu_high_above should not be below detection.cpu_percent".to_string());
        }

        if self.detection.memory_critical_above < self.detection.memory_percent {
            errors.push(
                "detection.memory_critical_above should not be below detection.memory_percent"
                    .to_string(),
            );
        }

        if self.history.failure_capacity == 0 || self.history.recovery_capacity == 0 {
            errors.push("history capacities must be positive".to_string());
        }

        if self.recovery.strategy_timeout_secs == 0 {
            errors.push("recovery.strategy_timeout_secs must be positive".to_string());
        }

        for cmd in &self.recovery.memory_cleanup_commands {
            if cmd.is_empty() {
                errors.push("recovery.memory_cleanup_commands contains an empty command".to_string());
            }
        }

        if matches!(&self.recovery.restart_command, Some(cmd) if cmd.is_empty()) {
            errors.push("recovery.restart_command must not be empty".to_string());
        }

        for (name, service) in &self.services {
            let timeout_secs = service.check.timeout_secs();
            if !timeout_secs.is_finite() || timeout_secs > MAX_PROBE_TIMEOUT_SECS {
                errors.push(format!(
                    "services.{name}: timeout_secs must be at most {MAX_PROBE_TIMEOUT_SECS} (got {timeout_secs})"
                ));
            } else if service.check.timeout().is_zero() {
                errors.push(format!("services.{name}: timeout_secs must be positive"));
            }
            match &service.check {
                ServiceCheck::Http { url, .. } => {
                    if reqwest::Url::parse(url).is_err() {
                        errors.push(format!("services.{name}: invalid url {url}"));
                    }
                }
                ServiceCheck::Tcp { host, port, .. } => {
                    if host.is_empty() || *port == 0 {
                        errors.push(format!("services.{name}: host and port are required"));
                    }
                }
            }
            if matches!(&service.restart_command, Some(cmd) if cmd.is_empty()) {
                errors.push(format!("services.{name}: restart_command must not be empty"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.monitor.interval_secs, 10);
        assert_eq!(config.detection.cpu_percent, 85.0);
        assert_eq!(config.detection.memory_percent, 90.0);
        assert_eq!(config.detection.disk_percent, 95.0);
        assert_eq!(config.detection.network_error_rate_percent, 1.0);
        assert_eq!(config.history.failure_capacity, 1000);
        assert_eq!(config.history.recovery_capacity, 100);
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let mut config = AppConfig::default();
        config.monitor.interval_secs = 0;
        config.detection.cpu_percent = 120.0;
        config.history.recovery_capacity = 0;
        config.services.insert(
            "web".to_string(),
            ServiceCheck::http("not a url", 3.0).into(),
        );

        let errors = config.validate().unwrap_err();
        assert!(errors.len() >= 4, "{errors:?}");
        assert!(errors.iter().any(|e| e.contains("services.web")));
    }

    #[test]
    fn test_validate_reports_out_of_range_timeouts() {
        let mut config = AppConfig::default();
        config
            .services
            .insert("db".to_string(), ServiceCheck::tcp("localhost", 5432, 1e20).into());
        config.services.insert(
            "web".to_string(),
            ServiceCheck::http("http://localhost/health", f64::INFINITY).into(),
        );
        config
            .services
            .insert("cache".to_string(), ServiceCheck::tcp("localhost", 6379, f64::NAN).into());

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3, "{errors:?}");
        assert!(errors.iter().any(|e| e.starts_with("services.db: timeout_secs must be at most")));
        assert!(errors.iter().any(|e| e.starts_with("services.web: timeout_secs must be at most")));
        assert!(errors.iter().any(|e| e.starts_with("services.cache:")));
    }

    #[test]
    fn test_timeout_is_clamped() {
        let max = Duration::from_secs_f64(MAX_PROBE_TIMEOUT_SECS);
        assert_eq!(ServiceCheck::tcp("localhost", 1, 1e20).timeout(), max);
        assert_eq!(ServiceCheck::tcp("localhost", 1, f64::INFINITY).timeout(), max);
        assert_eq!(ServiceCheck::tcp("localhost", 1, f64::NAN).timeout(), Duration::ZERO);
        assert_eq!(ServiceCheck::tcp("localhost", 1, -2.0).timeout(), Duration::ZERO);
        assert_eq!(
            ServiceCheck::tcp("localhost", 1, 2.5).timeout(),
            Duration::from_millis(2500)
        );
    }

    #[test]
    fn test_load_services_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("default.toml"),
            r#"
[monitor]
interval_secs = 5
auto_recover_min_severity = "critical"

[detection]
cpu_percent = 80.0

[services.web-server]
kind = "http"
url = "http://localhost:8000/health"
timeout_secs = 5

[services.redis]
kind = "tcp"
host = "localhost"
port = 6379
timeout_secs = 2
restart_command = ["systemctl", "restart", "redis"]
"#,
        )
        .unwrap();

        let config = AppConfig::load_from(dir.path()).unwrap();
        assert_eq!(config.monitor.interval_secs, 5);
        assert_eq!(config.monitor.auto_recover_min_severity, Severity::Critical);
        assert_eq!(config.detection.cpu_percent, 80.0);
        assert_eq!(config.detection.memory_percent, 90.0);
        assert_eq!(config.services.len(), 2);
        assert_eq!(
            config.services["web-server"].check,
            ServiceCheck::http("http://localhost:8000/health", 5.0)
        );
        let redis = &config.services["redis"];
        assert_eq!(redis.check, ServiceCheck::tcp("localhost", 6379, 2.0));
        assert_eq!(redis.restart_command.as_ref().unwrap()[0], "systemctl");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_to_toml_contains_sections() {
        let toml = AppConfig::default().to_toml().unwrap();
        assert!(toml.contains("[monitor]"));
        assert!(toml.contains("[detection]"));
        assert!(toml.contains("cpu_percent = 85.0"));
    }
}
