//! ---
//! rmon_section: "02-process-supervision"
//! rmon_subsection: "module"
//! rmon_type: "source"
//! rmon_scope: "code"
//! rmon_description: "Bounded-timeout liveness probes for supervised services."
//! rmon_version: "v0.0.0-prealpha"
//! rmon_owner: "tbd"
//! ---
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use crate::Result;

/// Why a health check did not pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeFailure {
    /// Nothing is listening; the service is down.
    ConnectionRefused,
    /// No answer inside the probe timeout; the service is overloaded or stuck.
    Timeout(Duration),
    /// The service answered with a non-success status; it is degraded.
    Status(u16),
    /// Any other transport problem.
    Transport(String),
}

impl ProbeFailure {
    /// Stable label used for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ProbeFailure::ConnectionRefused => "connection_refused",
            ProbeFailure::Timeout(_) => "timeout",
            ProbeFailure::Status(_) => "status",
            ProbeFailure::Transport(_) => "transport",
        }
    }
}

impl fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeFailure::ConnectionRefused => f.write_str("Connection refused"),
            ProbeFailure::Timeout(limit) => write!(f, "Timeout (>{}s)", limit.as_secs_f64()),
            ProbeFailure::Status(code) => write!(f, "HTTP {code}"),
            ProbeFailure::Transport(reason) => f.write_str(reason),
        }
    }
}

/// Outcome of a single probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy(ProbeFailure),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    pub fn failure(&self) -> Option<&ProbeFailure> {
        match self {
            HealthStatus::Healthy => None,
            HealthStatus::Unhealthy(failure) => Some(failure),
        }
    }

    /// Human readable status for snapshots and logs.
    pub fn describe(&self) -> String {
        match self {
            HealthStatus::Healthy => "healthy".to_owned(),
            HealthStatus::Unhealthy(failure) => failure.to_string(),
        }
    }
}

/// Liveness check against a service endpoint. Implementations never fail;
/// every problem is folded into [`HealthStatus::Unhealthy`].
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check(&self, endpoint: &str, timeout: Duration) -> HealthStatus;
}

/// HTTP GET probe. Only `200 OK` counts as healthy.
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    client: Client,
}

impl HttpHealthProbe {
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: Client::builder().build()?,
        })
    }

    /// Reuse an existing client (and its connection pool).
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn check(&self, endpoint: &str, timeout: Duration) -> HealthStatus {
        match self.client.get(endpoint).timeout(timeout).send().await {
            Ok(response) if response.status() == StatusCode::OK => HealthStatus::Healthy,
            Ok(response) => HealthStatus::Unhealthy(ProbeFailure::Status(response.status().as_u16())),
            Err(err) if err.is_timeout() => HealthStatus::Unhealthy(ProbeFailure::Timeout(timeout)),
            Err(err) if err.is_connect() => HealthStatus::Unhealthy(ProbeFailure::ConnectionRefused),
            Err(err) => HealthStatus::Unhealthy(ProbeFailure::Transport(err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::get;
    use axum::Router;
    use tokio::net::TcpListener;

    async fn serve(router: Router) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn classifies_probe_outcomes() {
        let router = Router::new()
            .route("/ok", get(|| async { "ok" }))
            .route("/degraded", get(|| async { AxumStatus::SERVICE_UNAVAILABLE }))
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    "late"
                }),
            );
        let addr = serve(router).await;
        let probe = HttpHealthProbe::new().unwrap();
        let timeout = Duration::from_millis(200);

        let ok = probe.check(&format!("http://{addr}/ok"), timeout).await;
        assert!(ok.is_healthy());

        let degraded = probe.check(&format!("http://{addr}/degraded"), timeout).await;
        assert_eq!(degraded, HealthStatus::Unhealthy(ProbeFailure::Status(503)));
        assert_eq!(degraded.describe(), "HTTP 503");

        let slow = probe.check(&format!("http://{addr}/slow"), timeout).await;
        assert_eq!(slow, HealthStatus::Unhealthy(ProbeFailure::Timeout(timeout)));
    }

    #[tokio::test]
    async fn refused_connection_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let probe = HttpHealthProbe::new().unwrap();
        let status = probe
            .check(&format!("http://{addr}/test"), Duration::from_secs(1))
            .await;
        assert_eq!(status.failure().map(ProbeFailure::label), Some("connection_refused"));
        assert_eq!(status.describe(), "Connection refused");
    }
}
