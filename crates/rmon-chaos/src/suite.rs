//! ---
//! rmon_section: "07-resilience-fault-tolerance"
//! rmon_subsection: "module"
//! rmon_type: "source"
//! rmon_scope: "code"
//! rmon_description: "Canonical validation sequence of load patterns and chaos scenarios."
//! rmon_version: "v0.0.0-prealpha"
//! rmon_owner: "tbd"
//! ---
use std::time::Duration;

use rmon_common::{RunTag, ScenarioConfig, SuiteConfig};

use crate::experiment::ExperimentCell;
use crate::load::{BurstPlan, LoadPattern, PacedPlan, ServiceSelector};
use crate::scheduler::CellTiming;

/// One step of a validation run.
#[derive(Debug, Clone)]
pub enum SuiteStep {
    Load(PacedPlan),
    Burst(BurstPlan),
    Cooldown(Duration),
    Chaos { cell: ExperimentCell, timing: CellTiming },
}

impl SuiteStep {
    pub fn label(&self) -> String {
        match self {
            SuiteStep::Load(plan) => format!("{} load", plan.pattern.as_str()),
            SuiteStep::Burst(plan) => format!("{} x {} burst", plan.bursts, plan.burst_size),
            SuiteStep::Cooldown(duration) => format!("cooldown {}s", duration.as_secs()),
            SuiteStep::Chaos { cell, .. } => format!("chaos {cell}"),
        }
    }

    fn duration(&self) -> Duration {
        match self {
            SuiteStep::Load(plan) => plan.window,
            SuiteStep::Burst(plan) => plan.inter_burst_delay * plan.bursts.saturating_sub(1),
            SuiteStep::Cooldown(duration) => *duration,
            SuiteStep::Chaos { timing, .. } => timing.window + timing.cooldown,
        }
    }
}

/// Ordered list of steps executed by [`crate::ExperimentScheduler::run_suite`].
#[derive(Debug, Clone, Default)]
pub struct ValidationSuite {
    pub steps: Vec<SuiteStep>,
}

impl ValidationSuite {
    /// Normal, high-rate, burst and round-robin load separated by cooldowns,
    /// followed by the chaos scenarios.
    pub fn canonical(config: &SuiteConfig, services: &[String]) -> Self {
        let mut steps = Vec::new();
        let paced = |pattern, tag, selector, interval| {
            SuiteStep::Load(PacedPlan {
                pattern,
                tag,
                selector,
                interval,
                window: config.window,
                max_requests: None,
                fault: None,
            })
        };

        steps.push(paced(
            LoadPattern::Steady,
            RunTag::LoadNormal,
            ServiceSelector::Random(services.to_vec()),
            config.normal_interval,
        ));
        steps.push(SuiteStep::Cooldown(config.cooldown));
        steps.push(paced(
            LoadPattern::HighRate,
            RunTag::LoadHigh,
            ServiceSelector::Random(services.to_vec()),
            config.high_interval,
        ));
        steps.push(SuiteStep::Cooldown(config.cooldown));
        steps.push(SuiteStep::Burst(BurstPlan {
            bursts: config.bursts,
            burst_size: config.burst_size,
            workers: config.burst_workers.unwrap_or(config.burst_size),
            inter_burst_delay: config.inter_burst_delay,
            services: services.to_vec(),
        }));
        steps.push(SuiteStep::Cooldown(config.cooldown));
        steps.push(paced(
            LoadPattern::RoundRobin,
            RunTag::LoadMixed,
            ServiceSelector::RoundRobin(services.to_vec()),
            config.round_robin_interval,
        ));
        steps.push(SuiteStep::Cooldown(config.cooldown));

        let timing = CellTiming {
            window: config.window,
            interval: config.chaos_interval,
            cooldown: config.cooldown,
        };
        for scenario in Self::scenarios(config, services) {
            steps.push(SuiteStep::Chaos {
                cell: ExperimentCell::new(scenario.fault, scenario.intensity, scenario.service),
                timing,
            });
        }
        Self { steps }
    }

    /// Configured scenarios, or latency/error/timeout spread across the
    /// first three services when none are configured.
    pub fn scenarios(config: &SuiteConfig, services: &[String]) -> Vec<ScenarioConfig> {
        if !config.scenarios.is_empty() || services.is_empty() {
            return config.scenarios.clone();
        }
        let pick = |index: usize| services[index % services.len()].clone();
        vec![
            ScenarioConfig {
                fault: "latency".into(),
                intensity: 500,
                service: pick(0),
            },
            ScenarioConfig {
                fault: "error".into(),
                intensity: 50,
                service: pick(1),
            },
            ScenarioConfig {
                fault: "timeout".into(),
                intensity: 3000,
                service: pick(2),
            },
        ]
    }

    /// Lower bound on wall time, ignoring request latency.
    pub fn planned_duration(&self) -> Duration {
        self.steps.iter().map(SuiteStep::duration).sum()
    }
}
