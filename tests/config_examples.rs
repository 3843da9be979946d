//! ---
//! rmon_section: "15-testing-qa-runbook"
//! rmon_subsection: "integration-tests"
//! rmon_type: "source"
//! rmon_scope: "test"
//! rmon_description: "Checks the shipped example configuration against the loader."
//! rmon_version: "v0.0.0-prealpha"
//! rmon_owner: "tbd"
//! ---
use std::fs;
use std::path::Path;
use std::time::Duration;

use rmon_chaos::SchedulerSettings;
use rmon_common::HarnessConfig;

fn read(path: &str) -> String {
    let manifest_dir = env!("CARGO_MANIFEST_DIR");
    let full = Path::new(manifest_dir).join("..").join(path);
    fs::read_to_string(&full)
        .unwrap_or_else(|err| panic!("failed to read {}: {}", full.display(), err))
}

#[test]
fn example_config_parses_and_validates() {
    let config: HarnessConfig = read("configs/rmon.example.toml").parse().unwrap();
    assert_eq!(config.target.services, vec!["gemini", "cohere", "huggingface"]);
    assert_eq!(config.supervisor.max_restarts, 3);
    assert_eq!(config.experiment.fault_window, Duration::from_secs(300));
    assert_eq!(config.suite.scenarios.len(), 3);

    let backend = &config.services["backend"];
    assert_eq!(backend.command.program, "node");
    assert_eq!(backend.port, Some(3000));
}

#[test]
fn example_config_matches_built_in_catalogue() {
    let config: HarnessConfig = read("configs/rmon.example.toml").parse().unwrap();
    let defaults = HarnessConfig::default();
    assert_eq!(config.experiment.faults, defaults.experiment.faults);
    assert_eq!(
        config.experiment.pacing_interval(),
        defaults.experiment.pacing_interval()
    );
}

#[test]
fn scheduler_takes_readiness_and_progress_cadence_from_config() {
    let mut config: HarnessConfig = read("configs/rmon.example.toml").parse().unwrap();
    let settings = SchedulerSettings::from_config(&config);
    assert_eq!(settings.ready_poll, Duration::from_secs(2));
    assert_eq!(settings.progress_every, 5);

    config.experiment.ready_poll = Duration::from_millis(250);
    config.experiment.progress_every = 0;
    let settings = SchedulerSettings::from_config(&config);
    assert_eq!(settings.ready_poll, Duration::from_millis(250));
    assert_eq!(settings.progress_every, 0);
}

#[test]
fn duplicate_service_ports_are_rejected() {
    let raw = r#"
        [services.a]
        program = "sleep"
        health_url = "http://127.0.0.1:4000/health"
        port = 4000

        [services.b]
        program = "sleep"
        health_url = "http://127.0.0.1:4000/health"
        port = 4000
    "#;
    let err = raw.parse::<HarnessConfig>().unwrap_err();
    assert!(format!("{err:#}").contains("reuses port 4000"), "{err:#}");
}
