//! ---
//! rmon_section: "03-persistence-logging"
//! rmon_subsection: "module"
//! rmon_type: "source"
//! rmon_scope: "code"
//! rmon_description: "Metrics collection and export utilities."
//! rmon_version: "v0.0.0-prealpha"
//! rmon_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus::{Gauge, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Shared registry type used across components.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Encode every family in `registry` in the Prometheus text format.
pub fn render(registry: &Registry) -> Result<String> {
    TextEncoder::new()
        .encode_to_string(&registry.gather())
        .context("failed to encode metric families")
}

/// Bind synchronously so address errors surface before the task is spawned.
fn bind(addr: SocketAddr) -> Result<(TcpListener, SocketAddr)> {
    let listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {addr}"))?;
    listener
        .set_nonblocking(true)
        .context("failed to make metrics listener non-blocking")?;
    let bound = listener.local_addr().context("metrics listener has no address")?;
    let listener = TcpListener::from_std(listener).context("failed to register metrics listener")?;
    Ok((listener, bound))
}

/// Serve `registry` at `/metrics` on `addr` until [`MetricsServer::shutdown`].
///
/// Must be called from within a tokio runtime.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let (listener, bound) = bind(addr)?;
    let router = Router::new()
        .route("/metrics", get(scrape))
        .with_state(registry);

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = stop_rx.await;
            })
            .await
            .context("metrics exporter failed")
    });
    info!(address = %bound, "metrics exporter listening");

    Ok(MetricsServer {
        addr: bound,
        stop: Some(stop_tx),
        task,
    })
}

async fn scrape(State(registry): State<SharedRegistry>) -> Response {
    match render(&registry) {
        Ok(body) => (
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        )
            .into_response(),
        Err(err) => {
            error!(error = %format!("{err:#}"), "scrape failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding error").into_response()
        }
    }
}

/// Running `/metrics` exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Bound address; differs from the requested one when port 0 was used.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting scrapes and wait for in-flight ones to finish.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.task.await.context("metrics exporter task panicked")??;
        debug!(address = %self.addr, "metrics exporter stopped");
        Ok(())
    }
}

/// Run-level metrics recorded by the harness binary.
#[derive(Clone)]
pub struct HarnessMetrics {
    registry: SharedRegistry,
    runs_total: IntCounterVec,
    config_load_seconds: Histogram,
    run_seconds: Gauge,
}

impl HarnessMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let runs_total = IntCounterVec::new(
            Opts::new(
                "rmon_runs_total",
                "Harness runs started, by mode (matrix, validation, supervise)",
            ),
            &["mode"],
        )?;
        registry.register(Box::new(runs_total.clone()))?;

        let buckets = prometheus::exponential_buckets(0.001, 2.0, 16)
            .context("failed to construct histogram buckets")?;
        let config_load_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "rmon_config_load_seconds",
                "Time spent loading and validating configuration",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(config_load_seconds.clone()))?;

        let run_seconds = Gauge::with_opts(Opts::new(
            "rmon_run_seconds",
            "Wall-clock seconds elapsed in the current run",
        ))?;
        registry.register(Box::new(run_seconds.clone()))?;

        Ok(Self {
            registry,
            runs_total,
            config_load_seconds,
            run_seconds,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn inc_run(&self, mode: &str) {
        self.runs_total.with_label_values(&[mode]).inc();
    }

    pub fn observe_config_load(&self, seconds: f64) {
        self.config_load_seconds.observe(seconds);
    }

    pub fn set_run_seconds(&self, seconds: f64) {
        self.run_seconds.set(seconds);
    }
}

impl std::fmt::Debug for HarnessMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HarnessMetrics").finish_non_exhaustive()
    }
}

pub use prometheus;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exporter_serves_registered_families() {
        let registry = new_registry();
        let metrics = HarnessMetrics::new(registry.clone()).unwrap();
        metrics.inc_run("matrix");

        let server = spawn_http_server(registry, SocketAddr::from(([127, 0, 0, 1], 0))).unwrap();
        let url = format!("http://{}/metrics", server.addr());
        let body = reqwest::get(&url).await.unwrap().text().await.unwrap();
        assert!(body.contains("rmon_runs_total"));
        assert!(body.contains("mode=\"matrix\""));
        server.shutdown().await.unwrap();
    }

    #[test]
    fn render_includes_observed_values() {
        let registry = new_registry();
        let metrics = HarnessMetrics::new(registry.clone()).unwrap();
        metrics.set_run_seconds(12.5);
        let text = render(&registry).unwrap();
        assert!(text.contains("rmon_run_seconds 12.5"), "{text}");
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = new_registry();
        HarnessMetrics::new(registry.clone()).unwrap();
        assert!(HarnessMetrics::new(registry).is_err());
    }
}
