//! Rule evaluation against the query facade
//!
//! Turns one query result into zero or one [`CandidateAlert`]. Candidates
//! have not passed the cooldown gate yet and may still be suppressed.

use super::cooldown::AlertKey;
use super::rule::{AlertRule, InstantExceedRule, SustainedRatioRule};
use crate::models::{AlertEvent, AlertLevel};
use crate::query::{QueryError, QueryFacade, SeriesSelector};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Alert produced by a rule before cooldown approval
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateAlert {
    pub key: AlertKey,
    pub rule: String,
    pub level: AlertLevel,
    pub sensor_id: String,
    pub metric: String,
    pub value: f64,
    pub threshold: f64,
    pub duration: Option<Duration>,
    pub message: String,
    /// Time of the observation that triggered the rule
    pub observed_at: DateTime<Utc>,
}

impl CandidateAlert {
    /// Stamp the approved candidate into a fired alert
    pub fn into_event(self) -> AlertEvent {
        AlertEvent {
            id: format!("{}_{}", self.key, self.observed_at.timestamp()),
            timestamp: self.observed_at,
            level: self.level,
            rule: self.rule,
            sensor_id: self.sensor_id,
            metric: self.metric,
            value: self.value,
            threshold: self.threshold,
            duration_secs: self.duration.map(|d| d.as_secs()),
            message: self.message,
            summary: None,
        }
    }
}

/// Evaluates rules for one sensor at a time
pub struct RuleEvaluator {
    query: Arc<dyn QueryFacade>,
    measurement: String,
    query_timeout: Duration,
    default_sample_rate_hz: f64,
}

impl RuleEvaluator {
    pub fn new(
        query: Arc<dyn QueryFacade>,
        measurement: impl Into<String>,
        query_timeout: Duration,
        default_sample_rate_hz: f64,
    ) -> Self {
        Self {
            query,
            measurement: measurement.into(),
            query_timeout,
            default_sample_rate_hz,
        }
    }

    /// Evaluate a rule, treating query failures as "no signal this cycle"
    pub async fn evaluate(
        &self,
        rule: &AlertRule,
        sensor_id: &str,
        now: DateTime<Utc>,
    ) -> Option<CandidateAlert> {
        match self.try_evaluate(rule, sensor_id, now).await {
            Ok(candidate) => candidate,
            Err(e) => {
                warn!(
                    rule = %rule.name(),
                    sensor_id = %sensor_id,
                    error = %e,
                    "Rule evaluation failed, skipping this cycle"
                );
                None
            }
        }
    }

    /// Evaluate a rule, surfacing query failures
    pub async fn try_evaluate(
        &self,
        rule: &AlertRule,
        sensor_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CandidateAlert>, QueryError> {
        match rule {
            AlertRule::InstantExceed(r) => self.evaluate_instant(r, sensor_id).await,
            AlertRule::SustainedRatio(r) => self.evaluate_sustained(r, sensor_id, now).await,
        }
    }

    async fn evaluate_instant(
        &self,
        rule: &InstantExceedRule,
        sensor_id: &str,
    ) -> Result<Option<CandidateAlert>, QueryError> {
        let selector =
            SeriesSelector::new(&self.measurement, sensor_id, &rule.field, rule.lookback);
        let Some(sample) = self.bounded(self.query.latest(&selector)).await? else {
            debug!(rule = %rule.name, sensor_id = %sensor_id, "No recent sample");
            return Ok(None);
        };

        if !(sample.value > rule.threshold) {
            return Ok(None);
        }

        let message = format!(
            "Sensor {sensor_id} {metric} above threshold: {value:.1}{unit} \
             (threshold: {threshold}{unit})",
            metric = rule.metric,
            value = sample.value,
            unit = rule.unit,
            threshold = rule.threshold,
        );

        Ok(Some(CandidateAlert {
            key: AlertKey::new(&rule.name, sensor_id),
            rule: rule.name.clone(),
            level: rule.level,
            sensor_id: sensor_id.to_string(),
            metric: rule.metric.clone(),
            value: round2(sample.value),
            threshold: rule.threshold,
            duration: None,
            message,
            observed_at: sample.timestamp,
        }))
    }

    async fn evaluate_sustained(
        &self,
        rule: &SustainedRatioRule,
        sensor_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CandidateAlert>, QueryError> {
        let selector = SeriesSelector::new(&self.measurement, sensor_id, &rule.field, rule.window);
        let Some(result) = self
            .bounded(self.query.count_exceeding(&selector, rule.threshold))
            .await?
        else {
            debug!(rule = %rule.name, sensor_id = %sensor_id, "No samples in window");
            return Ok(None);
        };

        let required = rule.required_count(self.default_sample_rate_hz);
        if !(result.count as f64 > required) {
            debug!(
                rule = %rule.name,
                sensor_id = %sensor_id,
                count = result.count,
                required = required,
                "Sustained condition not met"
            );
            return Ok(None);
        }

        let minutes = rule.window.as_secs_f64() / 60.0;
        let message = format!(
            "Sensor {sensor_id} {metric} above {threshold}{unit} for {minutes} minutes \
             ({count} samples)",
            metric = rule.metric,
            threshold = rule.threshold,
            unit = rule.unit,
            count = result.count,
        );

        // A timestamp far in the future would pin the alert id; clamp to now
        let observed_at = result.timestamp.min(now);

        Ok(Some(CandidateAlert {
            key: AlertKey::new(&rule.name, sensor_id),
            rule: rule.name.clone(),
            level: rule.level,
            sensor_id: sensor_id.to_string(),
            metric: rule.metric.clone(),
            value: result.count as f64,
            threshold: rule.threshold,
            duration: Some(rule.window),
            message,
            observed_at,
        }))
    }

    /// Apply the query timeout to a backend call
    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, QueryError>>,
    ) -> Result<T, QueryError> {
        tokio::time::timeout(self.query_timeout, call)
            .await
            .map_err(|_| QueryError::Timeout(self.query_timeout))?
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
