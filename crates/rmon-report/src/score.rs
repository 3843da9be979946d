//! ---
//! rmon_section: "09-reporting"
//! rmon_subsection: "module"
//! rmon_type: "source"
//! rmon_scope: "code"
//! rmon_description: "Composite resilience score."
//! rmon_version: "v0.0.0-prealpha"
//! rmon_owner: "tbd"
//! ---

const SUCCESS_WEIGHT: f64 = 0.4;
const LATENCY_WEIGHT: f64 = 0.3;
const STABILITY_WEIGHT: f64 = 0.2;
const RECOVERY_WEIGHT: f64 = 0.1;

/// Milliseconds of average latency per lost point.
const LATENCY_DIVISOR: f64 = 50.0;
/// Points lost per circuit-breaker trip.
const TRIP_PENALTY: f64 = 10.0;
/// Seconds of average recovery per lost point.
const RECOVERY_DIVISOR: f64 = 10.0;

/// Resilience score in `[0, 100]`.
///
/// ```text
/// 0.4·successRate + 0.3·(100 − min(avgLatency/50, 100))
///   + 0.2·(100 − min(trips·10, 100)) + 0.1·(100 − min(avgRecovery/10, 100))
/// ```
///
/// The weights and divisors are fixed so scores stay comparable across runs.
/// Every term is clamped to `[0, 100]` before weighting; NaN terms count as 0.
pub fn resilience_score(
    success_rate: f64,
    avg_latency_ms: f64,
    trips: u64,
    avg_recovery_secs: f64,
) -> f64 {
    let success = clamp(success_rate);
    let speed = clamp(100.0 - (avg_latency_ms / LATENCY_DIVISOR).min(100.0));
    let stability = clamp(100.0 - (trips as f64 * TRIP_PENALTY).min(100.0));
    let recovery = clamp(100.0 - (avg_recovery_secs / RECOVERY_DIVISOR).min(100.0));
    SUCCESS_WEIGHT * success
        + LATENCY_WEIGHT * speed
        + STABILITY_WEIGHT * stability
        + RECOVERY_WEIGHT * recovery
}

fn clamp(term: f64) -> f64 {
    if term.is_nan() {
        0.0
    } else {
        term.clamp(0.0, 100.0)
    }
}
