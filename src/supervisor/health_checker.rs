//! Health Checker
//!
//! Protocol-specific liveness probes against the service registry. Each probe
//! is bounded by its own timeout and `check_all` runs every probe
//! concurrently, so one hanging service never delays the others.

use futures_util::future::join_all;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tokio::net::{lookup_host, TcpStream};
use tracing::{debug, warn};

use crate::config::{ServiceCheck, ServiceConfig};
use crate::domain::{HealthCheckResult, HealthStatus};
use crate::error::{MedicError, Result};

/// Outcome of a probe before latency is attached
struct Probe {
    status: HealthStatus,
    error: Option<String>,
    details: Vec<(&'static str, Value)>,
}

impl Probe {
    fn healthy() -> Self {
        Self {
            status: HealthStatus::Healthy,
            error: None,
            details: Vec::new(),
        }
    }

    fn failed(status: HealthStatus, error: impl Into<String>) -> Self {
        Self {
            status,
            error: Some(error.into()),
            details: Vec::new(),
        }
    }

    fn detail(mut self, key: &'static str, value: impl Into<Value>) -> Self {
        self.details.push((key, value.into()));
        self
    }
}

pub struct HealthChecker {
    services: BTreeMap<String, ServiceConfig>,
    client: reqwest::Client,
}

impl HealthChecker {
    pub fn new(services: BTreeMap<String, ServiceConfig>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("medic/", env!("CARGO_PKG_VERSION")))
            // Every probe opens a fresh connection
            .pool_max_idle_per_host(0)
            .build()?;

        Ok(Self { services, client })
    }

    pub fn services(&self) -> &BTreeMap<String, ServiceConfig> {
        &self.services
    }

    pub fn service(&self, name: &str) -> Option<&ServiceConfig> {
        self.services.get(name)
    }

    /// Probe every registered service concurrently, results in name order
    pub async fn check_all(&self) -> Vec<HealthCheckResult> {
        let probes = self
            .services
            .iter()
            .map(|(name, service)| self.check_one(name, &service.check));
        join_all(probes).await
    }

    /// Probe a registered service by name
    pub async fn check_service(&self, name: &str) -> Result<HealthCheckResult> {
        let service = self
            .services
            .get(name)
            .ok_or_else(|| MedicError::UnknownService(name.to_string()))?;
        Ok(self.check_one(name, &service.check).await)
    }

    /// Probe one service. Never fails: unreachable is a status, not an error.
    pub async fn check_one(&self, name: &str, check: &ServiceCheck) -> HealthCheckResult {
        let limit = check.timeout();
        let started = Instant::now();

        let probe = match tokio::time::timeout(limit, self.probe(check, limit)).await {
            Ok(probe) => probe,
            Err(_) => {
                let action = match check {
                    ServiceCheck::Http { .. } => "GET",
                    ServiceCheck::Tcp { .. } => "connect to",
                };
                Probe::failed(
                    HealthStatus::Unhealthy,
                    format!(
                        "{action} {} timed out after {:.1}s",
                        check.target(),
                        limit.as_secs_f64()
                    ),
                )
            }
        };
        let elapsed = started.elapsed();

        let mut result = HealthCheckResult::new(name, probe.status, elapsed)
            .with_detail("kind", check.kind())
            .with_detail("target", check.target());
        for (key, value) in probe.details {
            result = result.with_detail(key, value);
        }
        if let Some(error) = probe.error {
            result = result.with_error(error);
        }

        if result.is_healthy() {
            debug!(
                service = name,
                "healthy in {:.3}s",
                result.response_time
            );
        } else {
            warn!(
                service = name,
                status = %result.status,
                "health check failed: {}",
                result.error_message.as_deref().unwrap_or("no detail")
            );
        }
        result
    }

    async fn probe(&self, check: &ServiceCheck, limit: Duration) -> Probe {
        match check {
            ServiceCheck::Http { url, .. } => self.probe_http(url, limit).await,
            ServiceCheck::Tcp { host, port, .. } => probe_tcp(host, *port).await,
        }
    }

    async fn probe_http(&self, url: &str, limit: Duration) -> Probe {
        let parsed = match reqwest::Url::parse(url) {
            Ok(parsed) => parsed,
            Err(e) => return Probe::failed(HealthStatus::Unhealthy, format!("invalid url {url}: {e}")),
        };

        // Resolution failure means reachability is undetermined
        if let Some(domain) = parsed.domain() {
            let port = parsed.port_or_known_default().unwrap_or(80);
            if let Err(e) = lookup_host((domain, port)).await {
                return Probe::failed(
                    HealthStatus::Unknown,
                    format!("cannot resolve {domain}: {e}"),
                );
            }
        }

        match self.client.get(parsed).timeout(limit).send().await {
            Ok(response) => {
                let code = response.status().as_u16();
                let probe = if code == 200 {
                    Probe::healthy()
                } else {
                    Probe::failed(HealthStatus::Unhealthy, format!("HTTP {code}"))
                };
                probe.detail("status_code", code)
            }
            Err(e) if e.is_timeout() => Probe::failed(
                HealthStatus::Unhealthy,
                format!("GET {url} timed out after {:.1}s", limit.as_secs_f64()),
            ),
            Err(e) => Probe::failed(HealthStatus::Unhealthy, format!("connection error: {e}")),
        }
    }
}

async fn probe_tcp(host: &str, port: u16) -> Probe {
    let addrs: Vec<_> = match lookup_host((host, port)).await {
        Ok(addrs) => addrs.collect(),
        Err(e) => {
            return Probe::failed(HealthStatus::Unknown, format!("cannot resolve {host}: {e}"))
        }
    };
    if addrs.is_empty() {
        return Probe::failed(HealthStatus::Unknown, format!("{host} resolved to no addresses"));
    }

    match TcpStream::connect(addrs.as_slice()).await {
        Ok(_stream) => Probe::healthy().detail("host", host).detail("port", port),
        Err(e) => Probe::failed(
            HealthStatus::Unhealthy,
            format!("connect to {host}:{port} failed: {e}"),
        )
        .detail("host", host)
        .detail("port", port),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn http_server(status_line: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 2048];
                let _ = socket.read(&mut buf).await;
                let response =
                    format!("{status_line}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        port
    }

    fn checker() -> HealthChecker {
        HealthChecker::new(BTreeMap::new()).unwrap()
    }

    #[tokio::test]
    async fn test_http_200_is_healthy() {
        let port = http_server("HTTP/1.1 200 OK").await;
        let check = ServiceCheck::http(&format!("http://127.0.0.1:{port}/health"), 3.0);

        let result = checker().check_one("web", &check).await;
        assert_eq!(result.status, HealthStatus::Healthy);
        assert_eq!(result.details["status_code"], 200);
        assert!(result.error_message.is_none());
    }

    #[tokio::test]
    async fn test_http_non_200_is_unhealthy() {
        let port = http_server("HTTP/1.1 503 Service Unavailable").await;
        let check = ServiceCheck::http(&format!("http://127.0.0.1:{port}/health"), 3.0);

        let result = checker().check_one("web", &check).await;
        assert_eq!(result.status, HealthStatus::Unhealthy);
        assert_eq!(result.error_message.as_deref(), Some("HTTP 503"));
    }

    #[tokio::test]
    async fn test_tcp_open_port_is_healthy() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let check = ServiceCheck::tcp("127.0.0.1", port, 2.0);

        let result = checker().check_one("db", &check).await;
        assert!(result.is_healthy());
        assert!(result.response_time >= 0.0);
        drop(listener);
    }

    #[tokio::test]
    async fn test_tcp_hanging_connect_times_out() {
        // Non-routable address: the SYN is never answered
        let check = ServiceCheck::tcp("10.255.255.1", 81, 0.3);
        let started = Instant::now();

        let result = checker().check_one("db", &check).await;
        assert_eq!(result.status, HealthStatus::Unhealthy);
        assert!(result.error_message.unwrap().contains("connect"));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_http_unresolvable_host_is_unknown() {
        let check = ServiceCheck::http("http://medic-missing.invalid/health", 2.0);

        let result = checker().check_one("web", &check).await;
        assert_eq!(result.status, HealthStatus::Unknown);
        let error = result.error_message.unwrap();
        assert!(error.contains("cannot resolve"), "{error}");
        assert_eq!(result.details["kind"], "http");
    }

    #[tokio::test]
    async fn test_tcp_unresolvable_host_is_unknown() {
        let check = ServiceCheck::tcp("medic-missing.invalid", 80, 2.0);

        let result = checker().check_one("db", &check).await;
        assert_eq!(result.status, HealthStatus::Unknown);
        let error = result.error_message.unwrap();
        assert!(error.contains("cannot resolve"), "{error}");
        assert_eq!(result.details["target"], "medic-missing.invalid:80");
    }

    #[tokio::test]
    async fn test_check_service_rejects_unknown_name() {
        let err = checker().check_service("nope").await.unwrap_err();
        assert!(matches!(err, MedicError::UnknownService(name) if name == "nope"));
    }
}
