use chrono::Timelike;
use std::collections::HashMap;

use crate::types::Cause;
use super::probe::{ProbeFailure, ProbeOutcome, ProbeReport};

/// Latency (ms) above which a link is considered degraded even when probes
/// still succeed.
const HIGH_LATENCY_MS: f64 = 2_000.0;

/// Derive a best-effort cause from the recent probe window.
///
/// The rules are heuristics over probe diagnostics, checked from most to
/// least specific; `Unknown` is the honest answer when nothing matches.
pub fn classify(window: &[ProbeReport]) -> Cause {
    let failures: Vec<&ProbeReport> = window
        .iter()
        .filter(|r| !r.is_success())
        .collect();
    if failures.is_empty() {
        return Cause::Unknown;
    }

    // Name resolution failing is the clearest signal there is.
    let dns_count = failures
        .iter()
        .filter(|r| matches!(r.outcome, ProbeOutcome::Failed(ProbeFailure::Dns)))
        .count();
    if dns_count * 2 >= failures.len() {
        return Cause::Dns;
    }

    if recurs_at_same_hour(&failures) {
        return Cause::ScheduledOutage;
    }

    // Sporadic, isolated failures between healthy probes.
    let failure_ratio = failures.len() as f64 / window.len() as f64;
    if failure_ratio < 0.3 && no_consecutive_failures(window) {
        return Cause::Intermittent;
    }

    let success_latencies: Vec<f64> = window
        .iter()
        .filter(|r| r.is_success())
        .map(|r| r.latency.as_millis() as f64)
        .collect();

    let timeout_count = failures
        .iter()
        .filter(|r| matches!(r.outcome, ProbeOutcome::Failed(ProbeFailure::Timeout)))
        .count();
    let timeouts_dominate = timeout_count * 2 >= failures.len();

    if timeouts_dominate && !success_latencies.is_empty() {
        if latency_rising(&success_latencies) {
            return Cause::BandwidthLimit;
        }
        let mean = mean(&success_latencies);
        if mean > HIGH_LATENCY_MS {
            return Cause::WeakSignal;
        }
        if stddev(&success_latencies, mean) > mean.max(1.0) {
            return Cause::Congestion;
        }
    }

    // Mixed connect/timeout failures with no latency pattern read as RF or
    // line-level interference.
    let connect_count = failures
        .iter()
        .filter(|r| matches!(r.outcome, ProbeOutcome::Failed(ProbeFailure::Connect)))
        .count();
    if connect_count > 0 && timeout_count > 0 {
        return Cause::Interference;
    }

    Cause::Unknown
}

/// Predictive 0..1 score of how likely the link is to go down soon.
///
/// Blends the recent failure ratio (recent half counts double) with how far
/// success latency has drifted above the healthy threshold.
pub fn risk_score(window: &[ProbeReport]) -> f64 {
    if window.is_empty() {
        return 0.0;
    }

    let half = window.len() / 2;
    let mut weight_total = 0.0;
    let mut weighted_failures = 0.0;
    for (i, report) in window.iter().enumerate() {
        let weight = if i >= half { 2.0 } else { 1.0 };
        weight_total += weight;
        if !report.is_success() {
            weighted_failures += weight;
        }
    }
    let failure_factor = weighted_failures / weight_total;

    let success_latencies: Vec<f64> = window
        .iter()
        .filter(|r| r.is_success())
        .map(|r| r.latency.as_millis() as f64)
        .collect();
    let latency_factor = if success_latencies.is_empty() {
        0.0
    } else {
        (mean(&success_latencies) / HIGH_LATENCY_MS).min(1.0)
    };

    (failure_factor * 0.7 + latency_factor * 0.3).clamp(0.0, 1.0)
}

/// Failures landing in the same hour of day on at least two distinct dates
/// look like a recurring scheduled window (backhaul maintenance, metered
/// cutoffs) rather than random loss.
fn recurs_at_same_hour(failures: &[&ProbeReport]) -> bool {
    let mut dates_by_hour: HashMap<u32, std::collections::HashSet<chrono::NaiveDate>> =
        HashMap::new();
    for report in failures {
        dates_by_hour
            .entry(report.at.hour())
            .or_default()
            .insert(report.at.date_naive());
    }
    dates_by_hour.values().any(|dates| dates.len() >= 2)
}

fn no_consecutive_failures(window: &[ProbeReport]) -> bool {
    window
        .windows(2)
        .all(|pair| pair[0].is_success() || pair[1].is_success())
}

fn latency_rising(latencies: &[f64]) -> bool {
    if latencies.len() < 4 {
        return false;
    }
    let mid = latencies.len() / 2;
    let early = mean(&latencies[..mid]);
    let late = mean(&latencies[mid..]);
    early > 0.0 && late > early * 2.0
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn stddev(values: &[f64], mean: f64) -> f64 {
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}
