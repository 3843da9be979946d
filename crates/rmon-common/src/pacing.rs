//! ---
//! rmon_section: "01-core-functionality"
//! rmon_subsection: "module"
//! rmon_type: "source"
//! rmon_scope: "code"
//! rmon_description: "Drift-corrected request pacing and schedule-slip statistics."
//! rmon_version: "v0.0.0-prealpha"
//! rmon_owner: "tbd"
//! ---
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

/// Fixed-grid pacer: the k-th slot is always `start + k * interval`.
///
/// Slots are never derived from the previous send, so request latency does not
/// accumulate into schedule drift. Slots that fell more than one interval behind
/// the clock are skipped instead of being fired back to back.
#[derive(Debug, Clone)]
pub struct Pacer {
    start: Instant,
    interval: Duration,
    next: u64,
}

impl Pacer {
    pub fn new(interval: Duration) -> Self {
        Self::starting_at(Instant::now(), interval)
    }

    pub fn starting_at(start: Instant, interval: Duration) -> Self {
        Self {
            start,
            interval,
            next: 0,
        }
    }

    pub fn start(&self) -> Instant {
        self.start
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Instant of slot `k`.
    pub fn slot(&self, k: u64) -> Instant {
        let k = u32::try_from(k).unwrap_or(u32::MAX);
        self.start + self.interval.saturating_mul(k)
    }

    /// Claim the next slot, skipping any that are already a full interval late.
    pub fn next_slot(&mut self, now: Instant) -> Instant {
        if !self.interval.is_zero() {
            while self.slot(self.next) + self.interval <= now {
                self.next += 1;
            }
        }
        let slot = self.slot(self.next);
        self.next += 1;
        slot
    }

    /// Number of slots handed out so far, skipped ones included.
    pub fn slots_claimed(&self) -> u64 {
        self.next
    }
}

/// Collects how late each send fired relative to its planned slot.
#[derive(Debug, Default)]
pub struct JitterHistogram {
    samples: Mutex<Vec<f64>>,
}

impl JitterHistogram {
    pub fn record(&self, jitter: Duration) {
        self.samples.lock().push(jitter.as_secs_f64() * 1_000.0);
    }

    pub fn summary(&self) -> Option<JitterSummary> {
        let samples = self.samples.lock();
        let slice = samples.as_slice();
        if slice.is_empty() {
            return None;
        }
        let count = slice.len() as f64;
        let mean = slice.iter().sum::<f64>() / count;
        let variance = if slice.len() > 1 {
            slice
                .iter()
                .map(|value| {
                    let delta = value - mean;
                    delta * delta
                })
                .sum::<f64>()
                / (count - 1.0)
        } else {
            0.0
        };
        Some(JitterSummary {
            mean_ms: mean,
            std_dev_ms: variance.sqrt(),
            max_ms: slice.iter().copied().fold(f64::MIN, f64::max),
            min_ms: slice.iter().copied().fold(f64::MAX, f64::min),
            samples: slice.len() as u64,
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct JitterSummary {
    pub mean_ms: f64,
    pub std_dev_ms: f64,
    pub max_ms: f64,
    pub min_ms: f64,
    pub samples: u64,
}
