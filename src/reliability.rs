//! Reliability accounting
//!
//! Incidents are the unit of accounting: opened when an environment failure
//! is observed, closed when the failure is resolved. From the incident ledger
//! the tracker derives uptime, MTTR, MTBF, error rate, and a single 0–100
//! reliability score with an hour-over-hour trend.

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ErrorCode;

/// How bad an incident is; `Critical` incidents additionally penalize the
/// reliability score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// One tracked failure, open until explicitly resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub error_code: ErrorCode,
    pub severity: Severity,
    pub resolved: bool,
    pub recovery_actions: Option<Vec<String>>,
}

impl Incident {
    /// Downtime this incident contributes within `[from, to]`.
    fn downtime_within(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> chrono::Duration {
        let start = self.start_time.max(from);
        let end = self.end_time.unwrap_or(to).min(to);
        if end > start {
            end - start
        } else {
            chrono::Duration::zero()
        }
    }
}

/// Three-state direction of the reliability score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Improving,
    Stable,
    Degrading,
}

/// Derived reliability metrics over a window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReliabilityMetrics {
    /// Percentage of the window with no open incident, in [0, 100]
    pub uptime_percentage: f64,
    /// Mean time to resolve, over incidents resolved in the window
    pub mttr: Duration,
    /// Mean time between incident starts in the window
    pub mtbf: Duration,
    /// Incidents per hour over the window
    pub error_rate: f64,
    /// Weighted 0–100 score
    pub reliability_score: f64,
    pub trend: Trend,
    pub total_incidents: usize,
    pub resolved_incidents: usize,
}

/// Incident ledger plus metric derivation.
///
/// Explicitly constructed and injected; safe for concurrent turns through
/// interior locking.
#[derive(Default)]
pub struct ReliabilityTracker {
    incidents: Mutex<Vec<Incident>>,
}

impl ReliabilityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an incident and return its id.
    pub fn record_incident(&self, error_code: ErrorCode, severity: Severity) -> String {
        let incident = Incident {
            id: Uuid::new_v4().to_string(),
            start_time: Utc::now(),
            end_time: None,
            error_code,
            severity,
            resolved: false,
            recovery_actions: None,
        };
        let id = incident.id.clone();
        warn!(incident_id = %id, code = %error_code, severity = ?severity, "incident opened");
        self.incidents.lock().unwrap().push(incident);
        id
    }

    /// Close an incident. Resolving an unknown or already resolved id is a
    /// no-op returning `false`.
    pub fn resolve_incident(&self, id: &str, recovery_actions: Option<Vec<String>>) -> bool {
        let mut incidents = self.incidents.lock().unwrap();
        match incidents.iter_mut().find(|i| i.id == id && !i.resolved) {
            Some(incident) => {
                incident.resolved = true;
                incident.end_time = Some(Utc::now());
                incident.recovery_actions = recovery_actions;
                info!(incident_id = %id, "incident resolved");
                true
            }
            None => false,
        }
    }

    pub fn unresolved_incidents(&self) -> Vec<Incident> {
        self.incidents
            .lock()
            .unwrap()
            .iter()
            .filter(|i| !i.resolved)
            .cloned()
            .collect()
    }

    pub fn incident_count(&self) -> usize {
        self.incidents.lock().unwrap().len()
    }

    /// Derive metrics over the trailing `window` (default 24h).
    ///
    /// The score is a weighted blend of 40% uptime, 20% MTTR, 20% MTBF, and
    /// 10% error rate, renormalized to a 0-100 scale, minus a penalty per
    /// critical incident in the window, clamped to [0, 100].
    pub fn calculate_metrics(&self, window: Option<Duration>) -> ReliabilityMetrics {
        let now = Utc::now();
        let window = window.unwrap_or(Duration::from_secs(86_400));
        let window_chrono =
            chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::hours(24));
        let from = now - window_chrono;

        let incidents = self.incidents.lock().unwrap();
        let in_window: Vec<&Incident> = incidents
            .iter()
            .filter(|i| i.end_time.unwrap_or(now) >= from)
            .collect();

        let score = Self::score_for(&in_window, from, now);
        let trend = Self::trend(&incidents, now);

        let total = in_window.len();
        let resolved = in_window.iter().filter(|i| i.resolved).count();

        let downtime: chrono::Duration = in_window
            .iter()
            .map(|i| i.downtime_within(from, now))
            .fold(chrono::Duration::zero(), |acc, d| acc + d);
        let window_ms = window_chrono.num_milliseconds().max(1) as f64;
        let uptime_percentage =
            (100.0 * (1.0 - downtime.num_milliseconds() as f64 / window_ms)).clamp(0.0, 100.0);

        let resolved_durations: Vec<chrono::Duration> = in_window
            .iter()
            .filter(|i| i.resolved)
            .filter_map(|i| i.end_time.map(|e| e - i.start_time))
            .collect();
        let mttr = if resolved_durations.is_empty() {
            Duration::ZERO
        } else {
            let total_ms: i64 = resolved_durations.iter().map(|d| d.num_milliseconds()).sum();
            Duration::from_millis((total_ms.max(0) as u64) / resolved_durations.len() as u64)
        };

        let mtbf = if total == 0 {
            window
        } else {
            Duration::from_millis(window_ms as u64 / total as u64)
        };

        let error_rate = total as f64 / (window_ms / 3_600_000.0);

        ReliabilityMetrics {
            uptime_percentage,
            mttr,
            mtbf,
            error_rate,
            reliability_score: score,
            trend,
            total_incidents: total,
            resolved_incidents: resolved,
        }
    }

    fn score_for(incidents: &[&Incident], from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
        let window_ms = (to - from).num_milliseconds().max(1) as f64;

        let downtime: f64 = incidents
            .iter()
            .map(|i| i.downtime_within(from, to).num_milliseconds() as f64)
            .sum();
        let uptime = (1.0 - downtime / window_ms).clamp(0.0, 1.0);

        let resolved: Vec<f64> = incidents
            .iter()
            .filter(|i| i.resolved)
            .filter_map(|i| i.end_time.map(|e| (e - i.start_time).num_milliseconds() as f64))
            .collect();
        // 1.0 when incidents resolve within a minute, 0.0 at half an hour
        let mttr_factor = if resolved.is_empty() {
            1.0
        } else {
            let mean = resolved.iter().sum::<f64>() / resolved.len() as f64;
            (1.0 - (mean - 60_000.0).max(0.0) / 1_740_000.0).clamp(0.0, 1.0)
        };

        // 1.0 when failures are at least an hour apart
        let mtbf_factor = if incidents.is_empty() {
            1.0
        } else {
            let mtbf_ms = window_ms / incidents.len() as f64;
            (mtbf_ms / 3_600_000.0).clamp(0.0, 1.0)
        };

        // 1.0 at zero incidents per hour, 0.0 at ten or more
        let per_hour = incidents.len() as f64 / (window_ms / 3_600_000.0);
        let error_factor = (1.0 - per_hour / 10.0).clamp(0.0, 1.0);

        let blended =
            (40.0 * uptime + 20.0 * mttr_factor + 20.0 * mtbf_factor + 10.0 * error_factor) / 0.9;
        let critical_penalty = incidents
            .iter()
            .filter(|i| i.severity == Severity::Critical)
            .count() as f64
            * 10.0;

        (blended - critical_penalty).clamp(0.0, 100.0)
    }

    /// Compare the last hour's score to the hour before it.
    fn trend(incidents: &[Incident], now: DateTime<Utc>) -> Trend {
        let hour = chrono::Duration::hours(1);
        let last: Vec<&Incident> = incidents
            .iter()
            .filter(|i| i.end_time.unwrap_or(now) >= now - hour)
            .collect();
        let previous: Vec<&Incident> = incidents
            .iter()
            .filter(|i| {
                let end = i.end_time.unwrap_or(now);
                end >= now - hour - hour && i.start_time < now - hour
            })
            .collect();

        let last_score = Self::score_for(&last, now - hour, now);
        let previous_score = Self::score_for(&previous, now - hour - hour, now - hour);

        let delta = last_score - previous_score;
        if delta > 5.0 {
            Trend::Improving
        } else if delta < -5.0 {
            Trend::Degrading
        } else {
            Trend::Stable
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_and_resolve_round_trip() {
        let tracker = ReliabilityTracker::new();
        let id = tracker.record_incident(ErrorCode::NetworkError, Severity::Critical);
        assert_eq!(tracker.unresolved_incidents().len(), 1);

        assert!(tracker.resolve_incident(&id, Some(vec!["restarted link".into()])));
        assert!(tracker.unresolved_incidents().is_empty());

        let metrics = tracker.calculate_metrics(None);
        assert_eq!(metrics.total_incidents, 1);
        assert_eq!(metrics.resolved_incidents, 1);
    }

    #[test]
    fn resolving_twice_is_a_no_op() {
        let tracker = ReliabilityTracker::new();
        let id = tracker.record_incident(ErrorCode::DatabaseError, Severity::Low);
        assert!(tracker.resolve_incident(&id, None));
        assert!(!tracker.resolve_incident(&id, None));
        assert!(!tracker.resolve_incident("unknown", None));
    }

    #[test]
    fn clean_window_scores_high() {
        let tracker = ReliabilityTracker::new();
        let metrics = tracker.calculate_metrics(Some(Duration::from_secs(3600)));
        assert_eq!(metrics.total_incidents, 0);
        assert!(metrics.uptime_percentage > 99.9);
        assert!(metrics.reliability_score > 95.0);
        assert_eq!(metrics.trend, Trend::Stable);
    }

    #[test]
    fn critical_incidents_penalize_the_score() {
        let clean = ReliabilityTracker::new();
        let clean_score = clean
            .calculate_metrics(Some(Duration::from_secs(3600)))
            .reliability_score;

        let noisy = ReliabilityTracker::new();
        for _ in 0..3 {
            let id = noisy.record_incident(ErrorCode::ExternalApiFailure, Severity::Critical);
            noisy.resolve_incident(&id, None);
        }
        let noisy_score = noisy
            .calculate_metrics(Some(Duration::from_secs(3600)))
            .reliability_score;

        assert!(noisy_score < clean_score);
    }

    #[test]
    fn score_and_uptime_stay_bounded_under_load() {
        let tracker = ReliabilityTracker::new();
        for i in 0..40 {
            let id = tracker.record_incident(
                ErrorCode::NetworkError,
                if i % 2 == 0 { Severity::Critical } else { Severity::High },
            );
            if i % 3 != 0 {
                tracker.resolve_incident(&id, None);
            }
        }
        let metrics = tracker.calculate_metrics(Some(Duration::from_secs(60)));
        assert!((0.0..=100.0).contains(&metrics.reliability_score));
        assert!((0.0..=100.0).contains(&metrics.uptime_percentage));
    }
}
