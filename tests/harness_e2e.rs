//! ---
//! rmon_section: "15-testing-qa-runbook"
//! rmon_subsection: "integration-tests"
//! rmon_type: "source"
//! rmon_scope: "test"
//! rmon_description: "End-to-end matrix runs against an in-process mock target over HTTP."
//! rmon_version: "v0.0.0-prealpha"
//! rmon_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use indexmap::IndexMap;
use parking_lot::Mutex;
use rmon_chaos::{
    ExperimentScheduler, HttpChaosClient, HttpTargetClient, LoadGenerator, SchedulerSettings,
};
use rmon_common::{ExperimentOutcome, FaultConfig, TargetConfig};
use rmon_persistence::{load_experiment_log, MetricsRecorder};
use rmon_report::{ReportGenerator, ReportInput};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Fault state per service plus call counters.
#[derive(Default)]
struct MockTarget {
    faults: Mutex<HashMap<String, (String, u64)>>,
    failures: Mutex<HashMap<String, u32>>,
    stops: Mutex<Vec<String>>,
}

async fn inject(State(target): State<Arc<MockTarget>>, Json(body): Json<Value>) -> Json<Value> {
    let service = body["service"].as_str().unwrap_or_default().to_owned();
    let fault = body["type"].as_str().unwrap_or_default().to_owned();
    let intensity = body["intensity"].as_u64().unwrap_or_default();
    target.failures.lock().remove(&service);
    target.faults.lock().insert(service, (fault, intensity));
    Json(json!({"status": "injected"}))
}

async fn stop(State(target): State<Arc<MockTarget>>, Json(body): Json<Value>) -> Json<Value> {
    let service = body["service"].as_str().unwrap_or_default().to_owned();
    target.faults.lock().remove(&service);
    target.failures.lock().remove(&service);
    target.stops.lock().push(service);
    Json(json!({"status": "stopped"}))
}

/// The breaker opens after two failures under an active fault.
async fn status(State(target): State<Arc<MockTarget>>) -> Json<Value> {
    let failures = target.failures.lock();
    let states: serde_json::Map<String, Value> = ["gemini", "cohere"]
        .into_iter()
        .map(|service| {
            let open = failures.get(service).copied().unwrap_or_default() >= 2;
            let state = if open { "OPEN" } else { "CLOSED" };
            (service.to_owned(), json!({ "state": state }))
        })
        .collect();
    Json(Value::Object(states))
}

async fn ai(
    State(target): State<Arc<MockTarget>>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let service = body["service"].as_str().unwrap_or_default().to_owned();
    let fault = target.faults.lock().get(&service).cloned();
    match fault {
        Some((kind, _)) if kind == "error" => {
            *target.failures.lock().entry(service).or_default() += 1;
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "Injected error"})),
            )
        }
        Some((kind, millis)) if kind == "latency" => {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            (StatusCode::OK, Json(json!({"response": "slow answer"})))
        }
        _ => (StatusCode::OK, Json(json!({"response": "answer"}))),
    }
}

async fn spawn_target() -> (String, Arc<MockTarget>) {
    let target = Arc::new(MockTarget::default());
    let router = Router::new()
        .route("/chaos/inject", post(inject))
        .route("/chaos/stop", post(stop))
        .route("/circuit-breaker/status", get(status))
        .route("/ai", post(ai))
        .route("/test", get(|| async { "ok" }))
        .with_state(target.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (format!("http://{addr}"), target)
}

fn faults() -> IndexMap<String, FaultConfig> {
    let mut faults = IndexMap::new();
    faults.insert("latency".to_owned(), FaultConfig::new("Network Latency", &[20]));
    faults.insert("error".to_owned(), FaultConfig::new("Error Injection", &[100]));
    faults
}

fn settings(fault_window: Duration) -> SchedulerSettings {
    SchedulerSettings {
        fault_window,
        cooldown: Duration::from_millis(30),
        normal_period: Duration::from_millis(60),
        normal_requests: 2,
        pacing_interval: Duration::from_millis(50),
        recovery_load: false,
        recovery_interval: Duration::from_millis(50),
        run_duration: Duration::from_secs(60),
        max_cycles: Some(1),
        max_injection_failures: 3,
        ready_timeout: Duration::from_secs(5),
        ready_poll: Duration::from_millis(50),
        progress_every: 5,
    }
}

fn scheduler(
    base_url: String,
    recorder: Arc<MetricsRecorder>,
    settings: SchedulerSettings,
) -> ExperimentScheduler {
    let services = vec!["gemini".to_owned(), "cohere".to_owned()];
    let config = TargetConfig {
        base_url,
        services: services.clone(),
        request_timeout: Duration::from_secs(2),
        ..TargetConfig::default()
    };
    let control = Arc::new(HttpChaosClient::new(&config).unwrap());
    let sender = Arc::new(HttpTargetClient::new(&config).unwrap());
    let load = LoadGenerator::new(sender, vec!["hello".into(), "ping".into()], 11).unwrap();
    ExperimentScheduler::new(settings, faults(), services, control, load, recorder)
}

#[tokio::test]
async fn matrix_run_records_every_cell_and_reports() {
    let (base_url, target) = spawn_target().await;
    let dir = tempfile::tempdir().unwrap();
    let recorder = Arc::new(MetricsRecorder::create(dir.path(), "e2e").unwrap());
    let mut scheduler = scheduler(
        base_url,
        recorder.clone(),
        settings(Duration::from_millis(150)),
    );

    let started = Instant::now();
    let summary = scheduler.run_matrix(&CancellationToken::new()).await.unwrap();
    assert_eq!(summary.experiments_closed, 4);
    assert_eq!(summary.experiments_aborted, 0);
    assert_eq!(target.stops.lock().len(), 4);
    recorder.flush().unwrap();

    let experiments = load_experiment_log(&recorder.paths().experiment_log).unwrap();
    assert_eq!(experiments.len(), 4);
    let cells: Vec<(String, String)> = experiments
        .iter()
        .map(|e| (e.fault.clone(), e.service.clone()))
        .collect();
    assert_eq!(
        cells,
        vec![
            ("latency".to_owned(), "gemini".to_owned()),
            ("latency".to_owned(), "cohere".to_owned()),
            ("error".to_owned(), "gemini".to_owned()),
            ("error".to_owned(), "cohere".to_owned()),
        ]
    );
    for experiment in &experiments {
        assert_eq!(
            experiment.stats.successful_requests + experiment.stats.failed_requests,
            experiment.stats.total_requests
        );
        assert!(experiment.stats.total_requests > 0);
    }
    let error_cell = &experiments[2];
    assert_eq!(error_cell.stats.successful_requests, 0);
    assert_eq!(error_cell.stats.circuit_breaker_trips, 1);
    assert!(experiments[0].stats.min_latency_ms >= 20);

    let tally = recorder.tally();
    let request_rows = fs::read_to_string(&recorder.paths().request_log)
        .unwrap()
        .lines()
        .count()
        - 1;
    assert_eq!(request_rows as u64, tally.total);
    assert_eq!(tally.load, summary.load_requests);

    let services = vec!["gemini".to_owned(), "cohere".to_owned()];
    let faults = faults();
    let recorded = recorder.experiments();
    let input = ReportInput {
        stamp: "e2e",
        experiments: &recorded,
        services: &services,
        faults: &faults,
        run_duration: started.elapsed(),
        tally,
        supervisor: None,
        data_files: vec![recorder.paths().experiment_log.clone()],
    };
    let files = ReportGenerator::new(dir.path()).generate(&input).unwrap();
    let report = fs::read_to_string(&files.report).unwrap();
    assert!(report.contains("GEMINI"));
    assert!(report.contains("COHERE"));
    assert!(report.contains("ERROR INJECTION"));
    assert!(report.contains("Impact Level: High"));
    assert!(report.contains("experiment_log_e2e.csv"));
}

#[tokio::test]
async fn cancellation_mid_cell_keeps_partial_data() {
    let (base_url, target) = spawn_target().await;
    let dir = tempfile::tempdir().unwrap();
    let recorder = Arc::new(MetricsRecorder::create(dir.path(), "cancel").unwrap());
    let mut scheduler = scheduler(base_url, recorder.clone(), settings(Duration::from_secs(5)));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(400)).await;
        trigger.cancel();
    });

    let summary = scheduler.run_matrix(&cancel).await.unwrap();
    assert!(summary.cancelled);
    assert_eq!(summary.experiments_aborted, 1);
    assert_eq!(*target.stops.lock(), vec!["gemini".to_owned()]);

    let experiments = recorder.experiments();
    assert_eq!(experiments.len(), 1);
    let aborted = &experiments[0];
    assert_eq!(aborted.outcome, ExperimentOutcome::Aborted);
    assert!(aborted.stats.total_requests >= 3, "{:?}", aborted.stats);
    assert_eq!(recorder.tally().experiment, aborted.stats.total_requests);

    let services = vec!["gemini".to_owned()];
    let faults = faults();
    let input = ReportInput {
        stamp: "cancel",
        experiments: &experiments,
        services: &services,
        faults: &faults,
        run_duration: Duration::from_millis(400),
        tally: recorder.tally(),
        supervisor: None,
        data_files: Vec::new(),
    };
    let files = ReportGenerator::new(dir.path()).generate(&input).unwrap();
    let comparison = fs::read_to_string(files.comparison).unwrap();
    assert_eq!(comparison.lines().count(), 2, "{comparison}");
}
