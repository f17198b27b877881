//! Observability infrastructure for the alert agent
//!
//! Provides:
//! - Prometheus metrics (checks, fired/suppressed alerts, query errors,
//!   check latency, history size, notification outcomes)
//! - Structured JSON logging with tracing

use crate::models::AlertEvent;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    HistogramVec, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for check latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<AlertMetricsInner> = OnceLock::new();

struct AlertMetricsInner {
    checks_total: IntCounterVec,
    alerts_fired_total: IntCounterVec,
    alerts_suppressed_total: IntCounterVec,
    query_errors_total: IntCounterVec,
    check_latency_seconds: HistogramVec,
    history_size: IntGauge,
    notifications_total: IntCounterVec,
    summary_failures_total: IntCounter,
}

impl AlertMetricsInner {
    fn new() -> Self {
        Self {
            checks_total: register_int_counter_vec!(
                "alert_agent_checks_total",
                "Rule checks performed",
                &["rule"]
            )
            .expect("Failed to register checks_total"),

            alerts_fired_total: register_int_counter_vec!(
                "alert_agent_alerts_fired_total",
                "Alerts that passed the cooldown gate",
                &["rule", "level"]
            )
            .expect("Failed to register alerts_fired_total"),

            alerts_suppressed_total: register_int_counter_vec!(
                "alert_agent_alerts_suppressed_total",
                "Candidate alerts suppressed by cooldown",
                &["rule"]
            )
            .expect("Failed to register alerts_suppressed_total"),

            query_errors_total: register_int_counter_vec!(
                "alert_agent_query_errors_total",
                "Backend query failures during rule checks",
                &["rule"]
            )
            .expect("Failed to register query_errors_total"),

            check_latency_seconds: register_histogram_vec!(
                "alert_agent_check_latency_seconds",
                "Time spent evaluating a rule for one sensor",
                &["rule"],
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register check_latency_seconds"),

            history_size: register_int_gauge!(
                "alert_agent_history_size",
                "Alerts currently retained in history"
            )
            .expect("Failed to register history_size"),

            notifications_total: register_int_counter_vec!(
                "alert_agent_notifications_total",
                "Notification attempts by channel and outcome",
                &["channel", "outcome"]
            )
            .expect("Failed to register notifications_total"),

            summary_failures_total: register_int_counter!(
                "alert_agent_summary_failures_total",
                "Alerts dispatched without a generated summary"
            )
            .expect("Failed to register summary_failures_total"),
        }
    }
}

/// Alert metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share it.
#[derive(Clone)]
pub struct AlertMetrics {
    _private: (),
}

impl Default for AlertMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AlertMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertMetrics").finish()
    }
}

impl AlertMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(AlertMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AlertMetricsInner {
        GLOBAL_METRICS.get_or_init(AlertMetricsInner::new)
    }

    pub fn inc_check(&self, rule: &str) {
        self.inner().checks_total.with_label_values(&[rule]).inc();
    }

    pub fn inc_fired(&self, rule: &str, level: &str) {
        self.inner()
            .alerts_fired_total
            .with_label_values(&[rule, level])
            .inc();
    }

    pub fn inc_suppressed(&self, rule: &str) {
        self.inner()
            .alerts_suppressed_total
            .with_label_values(&[rule])
            .inc();
    }

    pub fn inc_query_error(&self, rule: &str) {
        self.inner().query_errors_total.with_label_values(&[rule]).inc();
    }

    pub fn observe_check_latency(&self, rule: &str, duration_secs: f64) {
        self.inner()
            .check_latency_seconds
            .with_label_values(&[rule])
            .observe(duration_secs);
    }

    pub fn set_history_size(&self, size: usize) {
        self.inner().history_size.set(size as i64);
    }

    /// Count a notification outcome (`delivered`, `skipped`, `failed`)
    pub fn inc_notification(&self, channel: &str, outcome: &str) {
        self.inner()
            .notifications_total
            .with_label_values(&[channel, outcome])
            .inc();
    }

    pub fn inc_summary_failure(&self) {
        self.inner().summary_failures_total.inc();
    }
}

/// Structured logger for agent lifecycle and alert events
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    /// Log a fired alert
    pub fn log_alert(&self, alert: &AlertEvent) {
        if alert.is_critical() {
            warn!(
                event = "alert_fired",
                node = %self.node_name,
                alert_id = %alert.id,
                rule = %alert.rule,
                sensor_id = %alert.sensor_id,
                level = %alert.level,
                value = alert.value,
                threshold = alert.threshold,
                has_summary = alert.summary.is_some(),
                "Critical alert fired"
            );
        } else {
            info!(
                event = "alert_fired",
                node = %self.node_name,
                alert_id = %alert.id,
                rule = %alert.rule,
                sensor_id = %alert.sensor_id,
                level = %alert.level,
                value = alert.value,
                threshold = alert.threshold,
                has_summary = alert.summary.is_some(),
                "Alert fired"
            );
        }
    }

    /// Log the delivery summary for an alert
    pub fn log_dispatch(&self, alert_id: &str, delivered: usize, skipped: usize, failed: usize) {
        if failed > 0 {
            warn!(
                event = "alert_dispatched",
                node = %self.node_name,
                alert_id = %alert_id,
                delivered = delivered,
                skipped = skipped,
                failed = failed,
                "Alert dispatched with delivery failures"
            );
        } else {
            info!(
                event = "alert_dispatched",
                node = %self.node_name,
                alert_id = %alert_id,
                delivered = delivered,
                skipped = skipped,
                "Alert dispatched"
            );
        }
    }

    /// Log agent startup
    pub fn log_startup(&self, version: &str, sensors: usize, rules: usize, channels: &[String]) {
        info!(
            event = "agent_started",
            node = %self.node_name,
            agent_version = %version,
            sensors = sensors,
            rules = rules,
            channels = ?channels,
            "Alert agent started"
        );
    }

    /// Log agent shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Alert agent shutting down"
        );
    }
}
