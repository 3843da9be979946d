//! ---
//! rmon_section: "07-resilience-fault-tolerance"
//! rmon_subsection: "module"
//! rmon_type: "source"
//! rmon_scope: "code"
//! rmon_description: "Request endpoint client used by the load generator."
//! rmon_version: "v0.0.0-prealpha"
//! rmon_owner: "tbd"
//! ---
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use rmon_common::TargetConfig;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;

use crate::{ChaosError, ChaosResult};

/// Result of one request against the target. Never an error: failures are data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOutcome {
    pub success: bool,
    pub latency: Duration,
    pub error: Option<String>,
    pub response_size: u64,
}

impl RequestOutcome {
    pub fn ok(latency: Duration, response_size: u64) -> Self {
        Self {
            success: true,
            latency,
            error: None,
            response_size,
        }
    }

    pub fn failed(latency: Duration, error: impl Into<String>) -> Self {
        Self {
            success: false,
            latency,
            error: Some(error.into()),
            response_size: 0,
        }
    }
}

#[async_trait]
pub trait RequestSender: Send + Sync {
    async fn send(&self, service: &str, prompt: &str) -> RequestOutcome;
}

#[derive(Serialize)]
struct AiRequest<'a> {
    service: &'a str,
    prompt: &'a str,
}

/// POSTs `{service, prompt}` to the target's request endpoint.
#[derive(Debug, Clone)]
pub struct HttpTargetClient {
    client: Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpTargetClient {
    pub fn new(target: &TargetConfig) -> ChaosResult<Self> {
        let client = Client::builder().build().map_err(ChaosError::Client)?;
        Ok(Self::with_client(client, target))
    }

    pub fn with_client(client: Client, target: &TargetConfig) -> Self {
        Self {
            client,
            endpoint: format!(
                "{}{}",
                target.base_url.trim_end_matches('/'),
                target.request_path
            ),
            timeout: target.request_timeout,
        }
    }
}

#[async_trait]
impl RequestSender for HttpTargetClient {
    async fn send(&self, service: &str, prompt: &str) -> RequestOutcome {
        let started = Instant::now();
        let result = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&AiRequest { service, prompt })
            .send()
            .await;
        let response = match result {
            Ok(response) => response,
            Err(err) if err.is_timeout() => return RequestOutcome::failed(self.timeout, "Timeout"),
            Err(err) => return RequestOutcome::failed(started.elapsed(), err.to_string()),
        };

        let status = response.status();
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(err) if err.is_timeout() => return RequestOutcome::failed(self.timeout, "Timeout"),
            Err(err) => return RequestOutcome::failed(started.elapsed(), err.to_string()),
        };
        let latency = started.elapsed();
        if status == StatusCode::OK {
            return RequestOutcome::ok(latency, body.len() as u64);
        }
        RequestOutcome::failed(latency, error_message(status, &body))
    }
}

/// The target reports failures as `{"error": ...}`; fall back to the status code.
fn error_message(status: StatusCode, body: &[u8]) -> String {
    serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|value| match value.get("error") {
            Some(Value::String(message)) => Some(message.clone()),
            Some(Value::Null) | None => None,
            Some(other) => Some(other.to_string()),
        })
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;
    use tokio::net::TcpListener;

    #[test]
    fn error_body_classification() {
        assert_eq!(
            error_message(StatusCode::SERVICE_UNAVAILABLE, br#"{"error":"Circuit open"}"#),
            "Circuit open"
        );
        assert_eq!(error_message(StatusCode::BAD_GATEWAY, b"<html>"), "HTTP 502");
        assert_eq!(
            error_message(StatusCode::INTERNAL_SERVER_ERROR, br#"{"error":{"code":7}}"#),
            r#"{"code":7}"#
        );
    }

    #[tokio::test]
    async fn records_success_failure_and_timeout() {
        let router = Router::new().route(
            "/ai",
            post(|Json(body): Json<Value>| async move {
                match body["service"].as_str() {
                    Some("gemini") => (AxumStatus::OK, Json(json!({"response": "hello"}))),
                    Some("slow") => {
                        tokio::time::sleep(Duration::from_secs(2)).await;
                        (AxumStatus::OK, Json(json!({})))
                    }
                    _ => (
                        AxumStatus::SERVICE_UNAVAILABLE,
                        Json(json!({"error": "Service unavailable"})),
                    ),
                }
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        let target = TargetConfig {
            base_url: format!("http://{addr}"),
            request_timeout: Duration::from_millis(300),
            ..TargetConfig::default()
        };
        let client = HttpTargetClient::new(&target).unwrap();

        let ok = client.send("gemini", "hi").await;
        assert!(ok.success);
        assert!(ok.response_size > 0);

        let failed = client.send("cohere", "hi").await;
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("Service unavailable"));
        assert_eq!(failed.response_size, 0);

        let slow = client.send("slow", "hi").await;
        assert_eq!(slow.error.as_deref(), Some("Timeout"));
        assert_eq!(slow.latency, Duration::from_millis(300));
    }
}
