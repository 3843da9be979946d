//! ---
//! rmon_section: "07-resilience-fault-tolerance"
//! rmon_subsection: "module"
//! rmon_type: "source"
//! rmon_scope: "code"
//! rmon_description: "Client for the target's fault-injection and circuit-breaker API."
//! rmon_version: "v0.0.0-prealpha"
//! rmon_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use rmon_common::{CircuitState, TargetConfig};
use rmon_supervisor::{HealthProbe, HealthStatus, HttpHealthProbe};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{ChaosError, ChaosResult};

/// Acknowledgement returned by a successful injection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InjectAck {
    /// Raw response body, if it was JSON.
    pub body: Option<Value>,
}

/// Circuit-breaker state per service as reported by the target.
///
/// Lookups for services missing from the report yield [`CircuitState::Unknown`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CircuitStatus {
    states: HashMap<String, CircuitState>,
}

impl CircuitStatus {
    pub fn state(&self, service: &str) -> CircuitState {
        self.states.get(service).copied().unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Accepts `{svc: {"state": "OPEN"}}` as well as the flat `{svc: "OPEN"}`.
    pub fn from_json(value: &Value) -> Self {
        let Some(map) = value.as_object() else {
            return Self::default();
        };
        map.iter()
            .map(|(service, entry)| {
                let state = entry
                    .get("state")
                    .and_then(Value::as_str)
                    .or_else(|| entry.as_str())
                    .map(CircuitState::parse)
                    .unwrap_or_default();
                (service.clone(), state)
            })
            .collect()
    }
}

impl FromIterator<(String, CircuitState)> for CircuitStatus {
    fn from_iter<I: IntoIterator<Item = (String, CircuitState)>>(iter: I) -> Self {
        Self {
            states: iter.into_iter().collect(),
        }
    }
}

/// Control surface of the system under test.
#[async_trait]
pub trait ChaosControl: Send + Sync {
    /// Start a fault on `service`. Failure aborts the experiment cell.
    async fn inject(
        &self,
        service: &str,
        fault: &str,
        intensity: u32,
        duration: Duration,
    ) -> ChaosResult<InjectAck>;

    /// Stop whatever fault is active on `service`. Idempotent.
    async fn stop(&self, service: &str) -> ChaosResult<()>;

    /// Current breaker states. Never fails: transport problems yield an empty map.
    async fn status(&self) -> CircuitStatus;

    /// Liveness of the target itself.
    async fn health(&self) -> HealthStatus;
}

#[derive(Serialize)]
struct InjectRequest<'a> {
    service: &'a str,
    #[serde(rename = "type")]
    fault: &'a str,
    intensity: u32,
    duration: u64,
}

#[derive(Serialize)]
struct StopRequest<'a> {
    service: &'a str,
}

/// HTTP implementation of [`ChaosControl`].
#[derive(Debug, Clone)]
pub struct HttpChaosClient {
    client: Client,
    base_url: String,
    health_url: String,
    control_timeout: Duration,
    status_timeout: Duration,
    health_timeout: Duration,
    probe: HttpHealthProbe,
}

impl HttpChaosClient {
    pub fn new(target: &TargetConfig) -> ChaosResult<Self> {
        let client = Client::builder().build().map_err(ChaosError::Client)?;
        Ok(Self::with_client(client, target))
    }

    pub fn with_client(client: Client, target: &TargetConfig) -> Self {
        let base_url = target.base_url.trim_end_matches('/').to_owned();
        Self {
            probe: HttpHealthProbe::with_client(client.clone()),
            health_url: format!("{base_url}{}", target.health_path),
            client,
            base_url,
            control_timeout: target.control_timeout,
            status_timeout: target.status_timeout,
            health_timeout: target.health_timeout,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post<T: Serialize + Sync>(&self, path: &str, body: &T) -> ChaosResult<Option<Value>> {
        let endpoint = self.endpoint(path);
        let response = self
            .client
            .post(&endpoint)
            .timeout(self.control_timeout)
            .json(body)
            .send()
            .await
            .map_err(|source| ChaosError::Transport {
                endpoint: endpoint.clone(),
                source,
            })?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(ChaosError::Rejected {
                endpoint,
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(serde_json::from_str(&text).ok())
    }
}

#[async_trait]
impl ChaosControl for HttpChaosClient {
    async fn inject(
        &self,
        service: &str,
        fault: &str,
        intensity: u32,
        duration: Duration,
    ) -> ChaosResult<InjectAck> {
        let request = InjectRequest {
            service,
            fault,
            intensity,
            duration: duration.as_secs(),
        };
        let body = self.post("/chaos/inject", &request).await?;
        info!(
            target: "rmon::chaos",
            service,
            fault,
            intensity,
            duration_secs = request.duration,
            "fault injected",
        );
        Ok(InjectAck { body })
    }

    async fn stop(&self, service: &str) -> ChaosResult<()> {
        self.post("/chaos/stop", &StopRequest { service }).await?;
        info!(target: "rmon::chaos", service, "fault stopped");
        Ok(())
    }

    async fn status(&self) -> CircuitStatus {
        let endpoint = self.endpoint("/circuit-breaker/status");
        let response = match self
            .client
            .get(&endpoint)
            .timeout(self.status_timeout)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                debug!(target: "rmon::chaos", status = response.status().as_u16(), "circuit status rejected");
                return CircuitStatus::default();
            }
            Err(err) => {
                debug!(target: "rmon::chaos", error = %err, "circuit status unavailable");
                return CircuitStatus::default();
            }
        };
        match response.json::<Value>().await {
            Ok(value) => CircuitStatus::from_json(&value),
            Err(err) => {
                warn!(target: "rmon::chaos", error = %err, "unparseable circuit status");
                CircuitStatus::default()
            }
        }
    }

    async fn health(&self) -> HealthStatus {
        self.probe.check(&self.health_url, self.health_timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;
    use tokio::net::TcpListener;

    async fn serve(router: Router) -> TargetConfig {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        TargetConfig {
            base_url: format!("http://{addr}/"),
            ..TargetConfig::default()
        }
    }

    #[test]
    fn parses_nested_and_flat_status() {
        let status = CircuitStatus::from_json(&json!({
            "gemini": {"state": "OPEN", "failures": 4},
            "cohere": "half_open",
            "huggingface": {"failures": 0},
        }));
        assert_eq!(status.state("gemini"), CircuitState::Open);
        assert_eq!(status.state("cohere"), CircuitState::HalfOpen);
        assert_eq!(status.state("huggingface"), CircuitState::Unknown);
        assert_eq!(status.state("missing"), CircuitState::Unknown);
        assert!(CircuitStatus::from_json(&json!([1, 2])).is_empty());
    }

    #[tokio::test]
    async fn inject_posts_expected_payload() {
        let router = Router::new().route(
            "/chaos/inject",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["service"], "gemini");
                assert_eq!(body["type"], "latency");
                assert_eq!(body["intensity"], 500);
                assert_eq!(body["duration"], 300);
                Json(json!({"status": "injected"}))
            }),
        );
        let client = HttpChaosClient::new(&serve(router).await).unwrap();
        let ack = client
            .inject("gemini", "latency", 500, Duration::from_secs(300))
            .await
            .unwrap();
        assert_eq!(ack.body.unwrap()["status"], "injected");
    }

    #[tokio::test]
    async fn rejected_injection_is_an_error() {
        let router = Router::new().route(
            "/chaos/inject",
            post(|| async { (StatusCode::BAD_REQUEST, "unknown fault") }),
        );
        let client = HttpChaosClient::new(&serve(router).await).unwrap();
        let err = client
            .inject("gemini", "meteor", 1, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ChaosError::Rejected { status: 400, .. }));
    }

    #[tokio::test]
    async fn status_failure_yields_unknown() {
        let router = Router::new().route(
            "/circuit-breaker/status",
            get(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        );
        let client = HttpChaosClient::new(&serve(router).await).unwrap();
        let status = client.status().await;
        assert!(status.is_empty());
        assert_eq!(status.state("gemini"), CircuitState::Unknown);
    }
}
