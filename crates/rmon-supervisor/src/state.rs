//! ---
//! rmon_section: "02-process-supervision"
//! rmon_subsection: "module"
//! rmon_type: "source"
//! rmon_scope: "code"
//! rmon_description: "Lifecycle states and read-only supervisor snapshots."
//! rmon_version: "v0.0.0-prealpha"
//! rmon_owner: "tbd"
//! ---
use std::fmt::{self, Write as _};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rmon_common::time::format_uptime;
use rmon_common::CrashEvent;
use serde::{Deserialize, Serialize};

/// Lifecycle of a supervised service.
///
/// `Stopped -> Starting -> Healthy <-> Unhealthy -> Crashed -> Starting`; `Fatal`
/// is terminal and only entered once the restart cap is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceLifecycle {
    #[default]
    Stopped,
    Starting,
    Healthy,
    Unhealthy,
    Crashed,
    Fatal,
}

impl ServiceLifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceLifecycle::Stopped => "STOPPED",
            ServiceLifecycle::Starting => "STARTING",
            ServiceLifecycle::Healthy => "HEALTHY",
            ServiceLifecycle::Unhealthy => "UNHEALTHY",
            ServiceLifecycle::Crashed => "CRASHED",
            ServiceLifecycle::Fatal => "FATAL",
        }
    }

    /// Numeric encoding exported on the `rmon_supervisor_service_state` gauge.
    pub fn gauge_value(&self) -> i64 {
        match self {
            ServiceLifecycle::Stopped => 0,
            ServiceLifecycle::Starting => 1,
            ServiceLifecycle::Healthy => 2,
            ServiceLifecycle::Unhealthy => 3,
            ServiceLifecycle::Crashed => 4,
            ServiceLifecycle::Fatal => 5,
        }
    }
}

impl fmt::Display for ServiceLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time copy of one service's supervision state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSnapshot {
    pub name: String,
    pub lifecycle: ServiceLifecycle,
    pub pid: Option<u32>,
    /// Running outside the supervisor's control (port already bound).
    pub external: bool,
    pub restart_count: u32,
    pub consecutive_failures: u32,
    pub last_status: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_check: Option<DateTime<Utc>>,
}

impl ServiceSnapshot {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lifecycle: ServiceLifecycle::Stopped,
            pid: None,
            external: false,
            restart_count: 0,
            consecutive_failures: 0,
            last_status: None,
            started_at: None,
            last_check: None,
        }
    }
}

/// Periodic status report: uptime, per-service counters and recent crashes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorReport {
    pub started_at: DateTime<Utc>,
    #[serde(with = "duration_secs")]
    pub uptime: Duration,
    pub services: Vec<ServiceSnapshot>,
    pub recent_crashes: Vec<CrashEvent>,
}

impl SupervisorReport {
    pub fn total_restarts(&self) -> u32 {
        self.services.iter().map(|service| service.restart_count).sum()
    }

    pub fn fatal_services(&self) -> Vec<&str> {
        self.services
            .iter()
            .filter(|service| service.lifecycle == ServiceLifecycle::Fatal)
            .map(|service| service.name.as_str())
            .collect()
    }

    /// Plain-text rendering used in logs and the final report.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Supervisor uptime: {}", format_uptime(self.uptime));
        let _ = writeln!(out, "Total restarts: {}", self.total_restarts());
        for service in &self.services {
            let pid = service
                .pid
                .map(|pid| pid.to_string())
                .unwrap_or_else(|| if service.external { "external".into() } else { "-".into() });
            let _ = writeln!(
                out,
                "  {:<16} {:<10} pid={:<8} restarts={} failures={} last={}",
                service.name,
                service.lifecycle,
                pid,
                service.restart_count,
                service.consecutive_failures,
                service.last_status.as_deref().unwrap_or("-"),
            );
        }
        if self.recent_crashes.is_empty() {
            let _ = writeln!(out, "Recent crashes: none");
        } else {
            let _ = writeln!(out, "Recent crashes:");
            for crash in &self.recent_crashes {
                let _ = writeln!(
                    out,
                    "  {} {} {}",
                    crash.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    crash.service,
                    crash.reason
                );
            }
        }
        out
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}
