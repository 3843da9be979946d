//! ---
//! rmon_section: "01-core-functionality"
//! rmon_subsection: "module"
//! rmon_type: "source"
//! rmon_scope: "code"
//! rmon_description: "Harness configuration model and loader."
//! rmon_version: "v0.0.0-prealpha"
//! rmon_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_base_url() -> String {
    "http://localhost:3000".to_owned()
}

fn default_target_services() -> Vec<String> {
    ["gemini", "cohere", "huggingface"]
        .into_iter()
        .map(str::to_owned)
        .collect()
}

fn default_request_path() -> String {
    "/ai".to_owned()
}

fn default_health_path() -> String {
    "/test".to_owned()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_control_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_status_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_ready_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_check_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_supervisor_health_timeout() -> Duration {
    Duration::from_secs(15)
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_max_restarts() -> u32 {
    3
}

fn default_termination_grace() -> Duration {
    Duration::from_secs(5)
}

fn default_startup_grace() -> Duration {
    Duration::from_secs(10)
}

fn default_crash_history() -> usize {
    10
}

fn default_status_report_every() -> u32 {
    12
}

fn default_true() -> bool {
    true
}

fn default_service_host() -> String {
    "127.0.0.1".to_owned()
}

fn default_duration_hours() -> f64 {
    24.0
}

fn default_requests_per_cycle() -> u32 {
    10
}

fn default_fault_window() -> Duration {
    Duration::from_secs(300)
}

fn default_cooldown() -> Duration {
    Duration::from_secs(180)
}

fn default_min_request_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_normal_requests() -> u32 {
    20
}

fn default_recovery_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_max_injection_failures() -> u32 {
    5
}

fn default_ready_poll() -> Duration {
    Duration::from_secs(2)
}

fn default_progress_every() -> u64 {
    5
}

fn default_prompts() -> Vec<String> {
    [
        "What is artificial intelligence?",
        "Explain quantum computing briefly",
        "How does machine learning work?",
        "What are neural networks?",
        "Describe cloud computing",
        "What is blockchain technology?",
        "Explain data science",
        "What is cybersecurity?",
        "How does 5G work?",
        "What is the Internet of Things?",
    ]
    .into_iter()
    .map(str::to_owned)
    .collect()
}

fn default_seed() -> u64 {
    0xC4A05u64
}

fn default_suite_window() -> Duration {
    Duration::from_secs(180)
}

fn default_suite_cooldown() -> Duration {
    Duration::from_secs(30)
}

fn default_normal_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_high_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_round_robin_interval() -> Duration {
    Duration::from_secs(3)
}

fn default_bursts() -> u32 {
    3
}

fn default_burst_size() -> usize {
    10
}

fn default_inter_burst_delay() -> Duration {
    Duration::from_secs(10)
}

fn default_output_directory() -> PathBuf {
    PathBuf::from("chaos-test-results")
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9898))
}

/// Default fault catalogue, in the order the matrix enumerates it.
pub fn default_fault_catalogue() -> IndexMap<String, FaultConfig> {
    let mut faults = IndexMap::new();
    faults.insert(
        "latency".to_owned(),
        FaultConfig::new("Network Latency", &[100, 500, 1000, 2000, 5000]),
    );
    faults.insert(
        "error".to_owned(),
        FaultConfig::new("Error Injection", &[25, 50, 75, 100]),
    );
    faults.insert(
        "timeout".to_owned(),
        FaultConfig::new("Timeout Simulation", &[1000, 3000, 5000, 10000]),
    );
    faults.insert(
        "throttle".to_owned(),
        FaultConfig::new("Rate Limiting", &[50, 75, 90, 100]),
    );
    faults
}

/// Primary configuration object for the harness.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HarnessConfig {
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub services: IndexMap<String, ServiceConfig>,
    #[serde(default)]
    pub experiment: ExperimentConfig,
    #[serde(default)]
    pub load: LoadConfig,
    #[serde(default)]
    pub suite: SuiteConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where a [`HarnessConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: HarnessConfig,
    /// `None` when built-in defaults were used.
    pub source: Option<PathBuf>,
}

impl HarnessConfig {
    pub const ENV_CONFIG_PATH: &'static str = "RMON_CONFIG";

    /// Load configuration from the first existing candidate, respecting `RMON_CONFIG`.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    /// Like [`HarnessConfig::load_with_source`] but falls back to built-in defaults
    /// when neither the environment nor any candidate names a file.
    pub fn load_or_default<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedConfig> {
        let env_set = std::env::var(Self::ENV_CONFIG_PATH)
            .map(|value| !value.trim().is_empty())
            .unwrap_or(false);
        if env_set || candidates.iter().any(|c| c.as_ref().exists()) {
            return Self::load_with_source(candidates);
        }
        let config = HarnessConfig::default();
        config.validate()?;
        Ok(LoadedConfig {
            config,
            source: None,
        })
    }

    /// Load exactly `path`, ignoring `RMON_CONFIG`.
    pub fn load_file(path: &Path) -> Result<LoadedConfig> {
        Ok(LoadedConfig {
            config: Self::from_path(path)?,
            source: Some(path.to_path_buf()),
        })
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse::<HarnessConfig>()
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Total wall-clock budget for a matrix run.
    pub fn run_duration(&self) -> Duration {
        Duration::from_secs_f64(self.experiment.duration_hours.max(0.0) * 3600.0)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.target.validate()?;
        self.supervisor.validate()?;
        self.experiment.validate()?;
        if self.load.prompts.is_empty() {
            bail!("load.prompts must contain at least one prompt");
        }
        self.suite.validate(&self.target.services)?;

        let mut ports = HashSet::new();
        for (name, service) in &self.services {
            service.validate(name)?;
            if let Some(port) = service.port {
                if !ports.insert(port) {
                    bail!("service '{}' reuses port {} of another service", name, port);
                }
            }
        }
        Ok(())
    }
}

impl std::str::FromStr for HarnessConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: HarnessConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Network coordinates and timeouts for the system under test.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Services the target fronts, in matrix order.
    #[serde(default = "default_target_services")]
    pub services: Vec<String>,
    #[serde(default = "default_request_path")]
    pub request_path: String,
    #[serde(default = "default_health_path")]
    pub health_path: String,
    #[serde(default = "default_request_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub request_timeout: Duration,
    #[serde(default = "default_control_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub control_timeout: Duration,
    #[serde(default = "default_status_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub status_timeout: Duration,
    #[serde(default = "default_status_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub health_timeout: Duration,
    /// How long the scheduler waits for the target to become ready.
    #[serde(default = "default_ready_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub ready_timeout: Duration,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            services: default_target_services(),
            request_path: default_request_path(),
            health_path: default_health_path(),
            request_timeout: default_request_timeout(),
            control_timeout: default_control_timeout(),
            status_timeout: default_status_timeout(),
            health_timeout: default_status_timeout(),
            ready_timeout: default_ready_timeout(),
        }
    }
}

impl TargetConfig {
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            bail!("target.base_url must not be empty");
        }
        if self.services.is_empty() {
            bail!("target.services must name at least one service");
        }
        let mut seen = HashSet::new();
        for service in &self.services {
            if !seen.insert(service.as_str()) {
                bail!("target.services lists '{}' more than once", service);
            }
        }
        if self.request_timeout.is_zero() || self.control_timeout.is_zero() {
            bail!("target timeouts must be positive");
        }
        Ok(())
    }
}

/// Policy for the process supervisor tick loop.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_check_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub check_interval: Duration,
    #[serde(default = "default_supervisor_health_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub health_timeout: Duration,
    /// Consecutive failed health checks before a forced restart.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Restarts allowed per service before it is declared FATAL.
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    #[serde(default = "default_termination_grace")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub termination_grace: Duration,
    /// Health failures of a freshly started service are not counted during this window.
    #[serde(default = "default_startup_grace")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub startup_grace: Duration,
    #[serde(default = "default_crash_history")]
    pub crash_history: usize,
    /// Emit a status report every N ticks; zero disables it.
    #[serde(default = "default_status_report_every")]
    pub status_report_every: u32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval: default_check_interval(),
            health_timeout: default_supervisor_health_timeout(),
            failure_threshold: default_failure_threshold(),
            max_restarts: default_max_restarts(),
            termination_grace: default_termination_grace(),
            startup_grace: default_startup_grace(),
            crash_history: default_crash_history(),
            status_report_every: default_status_report_every(),
        }
    }
}

impl SupervisorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.check_interval.is_zero() {
            bail!("supervisor.check_interval must be positive");
        }
        if self.failure_threshold == 0 {
            bail!("supervisor.failure_threshold must be at least 1");
        }
        if self.max_restarts == 0 {
            bail!("supervisor.max_restarts must be at least 1");
        }
        if self.health_timeout.is_zero() {
            bail!("supervisor.health_timeout must be positive");
        }
        Ok(())
    }
}

/// How to launch a supervised process.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CommandConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub env: IndexMap<String, String>,
    /// Capture stdout/stderr for crash diagnostics instead of inheriting them.
    #[serde(default = "default_true")]
    pub capture_output: bool,
}

impl CommandConfig {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|arg| (*arg).to_owned()).collect(),
            working_dir: None,
            env: IndexMap::new(),
            capture_output: true,
        }
    }
}

/// A dependent service kept alive by the supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(flatten)]
    pub command: CommandConfig,
    pub health_url: String,
    #[serde(default = "default_service_host")]
    pub host: String,
    /// Port the service binds; used to detect an externally running instance.
    #[serde(default)]
    pub port: Option<u16>,
}

impl ServiceConfig {
    pub fn new(command: CommandConfig, health_url: impl Into<String>) -> Self {
        Self {
            command,
            health_url: health_url.into(),
            host: default_service_host(),
            port: None,
        }
    }

    pub fn validate(&self, name: &str) -> Result<()> {
        if self.command.program.trim().is_empty() {
            bail!("service '{}' must declare a program", name);
        }
        if self.health_url.trim().is_empty() {
            bail!("service '{}' must declare a health_url", name);
        }
        Ok(())
    }
}

/// One fault type of the experiment matrix.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FaultConfig {
    pub label: String,
    pub intensities: Vec<u32>,
}

impl FaultConfig {
    pub fn new(label: impl Into<String>, intensities: &[u32]) -> Self {
        Self {
            label: label.into(),
            intensities: intensities.to_vec(),
        }
    }
}

/// Parameters of the fault-injection matrix.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    #[serde(default = "default_duration_hours")]
    pub duration_hours: f64,
    #[serde(default = "default_requests_per_cycle")]
    pub requests_per_cycle: u32,
    #[serde(default = "default_fault_window")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub fault_window: Duration,
    #[serde(default = "default_cooldown")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub cooldown: Duration,
    #[serde(default = "default_cooldown")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub normal_period: Duration,
    /// Requests spread over each normal period.
    #[serde(default = "default_normal_requests")]
    pub normal_requests: u32,
    #[serde(default = "default_min_request_delay")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub min_request_delay: Duration,
    /// Run light steady load during the recovery window.
    #[serde(default)]
    pub recovery_load: bool,
    #[serde(default = "default_recovery_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub recovery_interval: Duration,
    #[serde(default = "default_max_injection_failures")]
    pub max_consecutive_injection_failures: u32,
    /// Delay between target health checks while waiting for readiness.
    #[serde(default = "default_ready_poll")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub ready_poll: Duration,
    /// Log experiment progress every N requests; 0 disables progress lines.
    /// Circuit state itself is polled once per request, so its cadence is
    /// the pacing interval.
    #[serde(default = "default_progress_every")]
    pub progress_every: u64,
    /// Stop after this many passes over the matrix even if time remains.
    #[serde(default)]
    pub max_cycles: Option<u32>,
    #[serde(default = "default_fault_catalogue")]
    pub faults: IndexMap<String, FaultConfig>,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            duration_hours: default_duration_hours(),
            requests_per_cycle: default_requests_per_cycle(),
            fault_window: default_fault_window(),
            cooldown: default_cooldown(),
            normal_period: default_cooldown(),
            normal_requests: default_normal_requests(),
            min_request_delay: default_min_request_delay(),
            recovery_load: false,
            recovery_interval: default_recovery_interval(),
            max_consecutive_injection_failures: default_max_injection_failures(),
            ready_poll: default_ready_poll(),
            progress_every: default_progress_every(),
            max_cycles: None,
            faults: default_fault_catalogue(),
        }
    }
}

impl ExperimentConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.duration_hours.is_finite() || self.duration_hours <= 0.0 {
            bail!("experiment.duration_hours must be a positive number");
        }
        if self.requests_per_cycle == 0 {
            bail!("experiment.requests_per_cycle must be at least 1");
        }
        if self.fault_window.is_zero() {
            bail!("experiment.fault_window must be positive");
        }
        if self.normal_requests == 0 {
            bail!("experiment.normal_requests must be at least 1");
        }
        if self.normal_period.is_zero() {
            bail!("experiment.normal_period must be positive");
        }
        if self.min_request_delay.is_zero() {
            bail!("experiment.min_request_delay must be positive");
        }
        if self.recovery_interval.is_zero() {
            bail!("experiment.recovery_interval must be positive");
        }
        if self.ready_poll.is_zero() {
            bail!("experiment.ready_poll must be positive");
        }
        if self.max_consecutive_injection_failures == 0 {
            bail!("experiment.max_consecutive_injection_failures must be at least 1");
        }
        if self.faults.is_empty() {
            bail!("experiment.faults must declare at least one fault type");
        }
        for (fault, spec) in &self.faults {
            if spec.intensities.is_empty() {
                bail!("fault '{}' must list at least one intensity", fault);
            }
        }
        Ok(())
    }

    /// Pacing interval inside a fault window.
    pub fn pacing_interval(&self) -> Duration {
        let spread = self.fault_window / self.requests_per_cycle.max(1);
        spread.max(self.min_request_delay)
    }
}

/// Request payload catalogue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadConfig {
    #[serde(default = "default_prompts")]
    pub prompts: Vec<String>,
    /// Seed for service and prompt selection.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            prompts: default_prompts(),
            seed: default_seed(),
        }
    }
}

/// A chaos scenario of the validation suite.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScenarioConfig {
    pub fault: String,
    pub intensity: u32,
    pub service: String,
}

/// Timings for the canonical validation suite.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteConfig {
    #[serde(default = "default_suite_window")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub window: Duration,
    #[serde(default = "default_suite_cooldown")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub cooldown: Duration,
    #[serde(default = "default_normal_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub normal_interval: Duration,
    #[serde(default = "default_high_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub high_interval: Duration,
    #[serde(default = "default_round_robin_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub round_robin_interval: Duration,
    #[serde(default = "default_bursts")]
    pub bursts: u32,
    #[serde(default = "default_burst_size")]
    pub burst_size: usize,
    /// Worker pool bound for bursts; defaults to the burst size.
    #[serde(default)]
    pub burst_workers: Option<usize>,
    #[serde(default = "default_inter_burst_delay")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub inter_burst_delay: Duration,
    #[serde(default = "default_high_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub chaos_interval: Duration,
    /// Chaos scenarios; empty means the built-in trio over the target services.
    #[serde(default)]
    pub scenarios: Vec<ScenarioConfig>,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            window: default_suite_window(),
            cooldown: default_suite_cooldown(),
            normal_interval: default_normal_interval(),
            high_interval: default_high_interval(),
            round_robin_interval: default_round_robin_interval(),
            bursts: default_bursts(),
            burst_size: default_burst_size(),
            burst_workers: None,
            inter_burst_delay: default_inter_burst_delay(),
            chaos_interval: default_high_interval(),
            scenarios: Vec::new(),
        }
    }
}

impl SuiteConfig {
    pub fn validate(&self, services: &[String]) -> Result<()> {
        if self.window.is_zero() {
            bail!("suite.window must be positive");
        }
        if self.normal_interval.is_zero()
            || self.high_interval.is_zero()
            || self.round_robin_interval.is_zero()
            || self.chaos_interval.is_zero()
        {
            bail!("suite intervals must be positive");
        }
        if self.bursts == 0 || self.burst_size == 0 {
            bail!("suite.bursts and suite.burst_size must be at least 1");
        }
        if matches!(self.burst_workers, Some(0)) {
            bail!("suite.burst_workers must be at least 1");
        }
        for scenario in &self.scenarios {
            if !services.iter().any(|s| s == &scenario.service) {
                bail!(
                    "suite scenario targets unknown service '{}'",
                    scenario.service
                );
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_directory")]
    pub directory: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_directory(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_metrics_listen(),
        }
    }
}
