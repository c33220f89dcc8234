//! Communication monitoring and anomaly detection
//!
//! Every message exchange appends one [`CommunicationEvent`] to an in-memory
//! log. The monitor aggregates the log over a sliding window and compares the
//! current window to an explicitly established baseline snapshot.
//!
//! Known limitation, kept deliberately: the baseline is a manual snapshot
//! taken by [`CommunicationMonitor::establish_baseline`], not a rolling
//! statistical model. Detection quality depends on the operator refreshing
//! the baseline after intentional traffic changes.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::config::MonitorConfig;
use crate::error::ErrorCode;
use crate::message::MessageKind;
use crate::reliability::Severity;

/// Append-only record of one message exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunicationEvent {
    pub id: String,
    pub from: String,
    pub to: String,
    pub kind: MessageKind,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: Option<u64>,
    pub success: bool,
    pub error: Option<String>,
    pub error_code: Option<ErrorCode>,
    pub thread_id: Option<String>,
}

impl CommunicationEvent {
    pub fn success(
        from: impl Into<String>,
        to: impl Into<String>,
        kind: MessageKind,
        duration_ms: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            from: from.into(),
            to: to.into(),
            kind,
            timestamp: Utc::now(),
            duration_ms: Some(duration_ms),
            success: true,
            error: None,
            error_code: None,
            thread_id: None,
        }
    }

    pub fn failure(
        from: impl Into<String>,
        to: impl Into<String>,
        kind: MessageKind,
        code: ErrorCode,
        error: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            from: from.into(),
            to: to.into(),
            kind,
            timestamp: Utc::now(),
            duration_ms: None,
            success: false,
            error: Some(error.into()),
            error_code: Some(code),
            thread_id: None,
        }
    }

    pub fn with_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}

/// Aggregated view of a window of events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WindowMetrics {
    pub total_messages: usize,
    /// Fraction in [0, 1]; 1.0 for an empty window
    pub success_rate: f64,
    pub average_latency_ms: f64,
    pub timeout_count: usize,
    pub messages_by_agent: HashMap<String, usize>,
}

/// Kinds of deviation the detector flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    LatencySpike,
    ErrorSpike,
    TimeoutIncrease,
    UnusualPattern,
}

/// One flagged deviation from baseline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    pub kind: AnomalyKind,
    pub severity: Severity,
    pub detail: String,
    pub observed: f64,
    pub baseline: f64,
}

/// Event log, windowed aggregation, and baseline-relative anomaly flags.
pub struct CommunicationMonitor {
    config: MonitorConfig,
    events: Mutex<Vec<CommunicationEvent>>,
    baseline: Mutex<Option<WindowMetrics>>,
}

impl CommunicationMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            events: Mutex::new(Vec::new()),
            baseline: Mutex::new(None),
        }
    }

    /// Append an event to the log.
    pub fn record(&self, event: CommunicationEvent) {
        self.events.lock().unwrap().push(event);
    }

    /// Events matching the given filters, in insertion (timestamp) order.
    pub fn events(
        &self,
        agent: Option<&str>,
        since: Option<DateTime<Utc>>,
        only_failures: bool,
    ) -> Vec<CommunicationEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| {
                agent.map(|a| e.from == a || e.to == a).unwrap_or(true)
                    && since.map(|t| e.timestamp >= t).unwrap_or(true)
                    && (!only_failures || !e.success)
            })
            .cloned()
            .collect()
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    /// Aggregate the trailing window (configured length by default).
    pub fn window_metrics(&self, window: Option<Duration>) -> WindowMetrics {
        let window = window.unwrap_or(self.config.window);
        let cutoff = Utc::now()
            - chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::minutes(5));
        let events = self.events.lock().unwrap();
        let in_window: Vec<&CommunicationEvent> =
            events.iter().filter(|e| e.timestamp >= cutoff).collect();

        let total = in_window.len();
        let successes = in_window.iter().filter(|e| e.success).count();
        let latencies: Vec<u64> = in_window.iter().filter_map(|e| e.duration_ms).collect();
        let timeouts = in_window
            .iter()
            .filter(|e| e.error_code == Some(ErrorCode::TimeoutError))
            .count();

        let mut by_agent: HashMap<String, usize> = HashMap::new();
        for event in &in_window {
            *by_agent.entry(event.to.clone()).or_default() += 1;
        }

        WindowMetrics {
            total_messages: total,
            success_rate: if total == 0 {
                1.0
            } else {
                successes as f64 / total as f64
            },
            average_latency_ms: if latencies.is_empty() {
                0.0
            } else {
                latencies.iter().sum::<u64>() as f64 / latencies.len() as f64
            },
            timeout_count: timeouts,
            messages_by_agent: by_agent,
        }
    }

    /// Snapshot the current window as the comparison baseline.
    pub fn establish_baseline(&self) -> WindowMetrics {
        let metrics = self.window_metrics(None);
        *self.baseline.lock().unwrap() = Some(metrics.clone());
        metrics
    }

    pub fn baseline(&self) -> Option<WindowMetrics> {
        self.baseline.lock().unwrap().clone()
    }

    /// Compare the current window to the baseline and flag deviations above
    /// the configured percentage thresholds. Without a baseline there is
    /// nothing to compare against and no anomalies are reported.
    pub fn detect_anomalies(&self) -> Vec<Anomaly> {
        let Some(baseline) = self.baseline() else {
            return Vec::new();
        };
        let current = self.window_metrics(None);
        let mut anomalies = Vec::new();

        if baseline.average_latency_ms > 0.0 {
            let increase_pct = 100.0 * (current.average_latency_ms - baseline.average_latency_ms)
                / baseline.average_latency_ms;
            if increase_pct > self.config.latency_threshold_pct {
                anomalies.push(Anomaly {
                    kind: AnomalyKind::LatencySpike,
                    severity: grade(increase_pct, self.config.latency_threshold_pct),
                    detail: format!(
                        "average latency {:.0}ms is {:.0}% above baseline {:.0}ms",
                        current.average_latency_ms, increase_pct, baseline.average_latency_ms
                    ),
                    observed: current.average_latency_ms,
                    baseline: baseline.average_latency_ms,
                });
            }
        }

        let baseline_error_rate = 1.0 - baseline.success_rate;
        let current_error_rate = 1.0 - current.success_rate;
        if current_error_rate > 0.0 {
            let reference = baseline_error_rate.max(0.01);
            let increase_pct = 100.0 * (current_error_rate - reference) / reference;
            if increase_pct > self.config.error_threshold_pct {
                anomalies.push(Anomaly {
                    kind: AnomalyKind::ErrorSpike,
                    severity: grade(increase_pct, self.config.error_threshold_pct),
                    detail: format!(
                        "error rate {:.1}% against baseline {:.1}%",
                        current_error_rate * 100.0,
                        baseline_error_rate * 100.0
                    ),
                    observed: current_error_rate,
                    baseline: baseline_error_rate,
                });
            }
        }

        if current.timeout_count > 0 {
            let reference = baseline.timeout_count.max(1) as f64;
            let increase_pct = 100.0 * (current.timeout_count as f64 - reference) / reference;
            if increase_pct > self.config.timeout_threshold_pct {
                anomalies.push(Anomaly {
                    kind: AnomalyKind::TimeoutIncrease,
                    severity: grade(increase_pct, self.config.timeout_threshold_pct),
                    detail: format!(
                        "{} timeouts against baseline {}",
                        current.timeout_count, baseline.timeout_count
                    ),
                    observed: current.timeout_count as f64,
                    baseline: baseline.timeout_count as f64,
                });
            }
        }

        if baseline.total_messages > 0 {
            let deviation_pct = 100.0
                * (current.total_messages as f64 - baseline.total_messages as f64).abs()
                / baseline.total_messages as f64;
            if deviation_pct > self.config.volume_threshold_pct {
                anomalies.push(Anomaly {
                    kind: AnomalyKind::UnusualPattern,
                    severity: grade(deviation_pct, self.config.volume_threshold_pct),
                    detail: format!(
                        "message volume {} deviates {:.0}% from baseline {}",
                        current.total_messages, deviation_pct, baseline.total_messages
                    ),
                    observed: current.total_messages as f64,
                    baseline: baseline.total_messages as f64,
                });
            }
        }

        for anomaly in &anomalies {
            warn!(kind = ?anomaly.kind, severity = ?anomaly.severity, detail = %anomaly.detail, "anomaly detected");
        }
        anomalies
    }

    /// Dump the full event log as timestamp-ordered JSON for offline
    /// analysis.
    pub fn export(&self) -> serde_json::Value {
        let mut events = self.events.lock().unwrap().clone();
        events.sort_by_key(|e| e.timestamp);
        serde_json::to_value(&events).unwrap_or(serde_json::Value::Null)
    }
}

/// Map how far a deviation exceeds its threshold onto a severity grade.
fn grade(observed_pct: f64, threshold_pct: f64) -> Severity {
    let excess = observed_pct / threshold_pct.max(0.01);
    if excess >= 4.0 {
        Severity::Critical
    } else if excess >= 2.0 {
        Severity::High
    } else if excess >= 1.5 {
        Severity::Medium
    } else {
        Severity::Low
    }
}
