//! Alert detection and deduplication
//!
//! This module provides:
//! - Rule definitions (instant threshold, sustained ratio)
//! - Rule evaluation against the query facade
//! - Per-key cooldown gating
//! - A bounded history of fired alerts
//! - The [`AlertEngine`] that composes them per check

mod cooldown;
mod evaluator;
mod history;
mod rule;


pub use cooldown::{AlertKey, CooldownManager};
pub use evaluator::{CandidateAlert, RuleEvaluator};
pub use history::{AlertHistory, DEFAULT_HISTORY_CAPACITY};
pub use rule::{validate_rules, AlertRule, InstantExceedRule, RuleError, SustainedRatioRule};

use crate::models::AlertEvent;
use crate::query::{QueryError, QueryFacade};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Deserialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

/// Engine tuning
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Measurement holding the sensor readings
    #[serde(default = "default_measurement")]
    pub measurement: String,
    /// Upper bound on a single backend query
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
    /// Number of fired alerts retained for inspection
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    /// Sample rate assumed by sustained rules without their own
    #[serde(default = "default_sample_rate_hz")]
    pub default_sample_rate_hz: f64,
}

fn default_measurement() -> String {
    "sensor_reading".to_string()
}

fn default_query_timeout_secs() -> u64 {
    10
}

fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

fn default_sample_rate_hz() -> f64 {
    1.0
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            measurement: default_measurement(),
            query_timeout_secs: default_query_timeout_secs(),
            history_capacity: default_history_capacity(),
            default_sample_rate_hz: default_sample_rate_hz(),
        }
    }
}

/// Result of a single (rule, sensor) check
#[derive(Debug)]
pub enum CheckOutcome {
    /// Candidate approved, recorded and returned
    Fired(AlertEvent),
    /// Candidate produced but the key is cooling down or its observation
    /// was already alerted on
    Suppressed(AlertKey),
    /// Rule condition not met or no data
    NoSignal,
    /// Backend failed; treated as no signal this cycle
    QueryFailed(QueryError),
}

impl CheckOutcome {
    pub fn into_fired(self) -> Option<AlertEvent> {
        match self {
            CheckOutcome::Fired(event) => Some(event),
            _ => None,
        }
    }
}

/// Composes evaluation, cooldown and history for each check
///
/// One instance is shared (behind an `Arc`) by every concurrent check.
pub struct AlertEngine {
    evaluator: RuleEvaluator,
    cooldown: CooldownManager,
    /// Observation time of the last approved alert per key
    last_observed: DashMap<AlertKey, DateTime<Utc>>,
    history: Mutex<AlertHistory>,
}

impl AlertEngine {
    pub fn new(query: Arc<dyn QueryFacade>, config: EngineConfig) -> Self {
        let evaluator = RuleEvaluator::new(
            query,
            config.measurement,
            Duration::from_secs(config.query_timeout_secs),
            config.default_sample_rate_hz,
        );

        Self {
            evaluator,
            cooldown: CooldownManager::new(),
            last_observed: DashMap::new(),
            history: Mutex::new(AlertHistory::new(config.history_capacity)),
        }
    }

    /// Check a rule for a sensor using the wall clock
    pub async fn check(&self, rule: &AlertRule, sensor_id: &str) -> Option<AlertEvent> {
        self.check_at(rule, sensor_id, Utc::now()).await
    }

    /// Check a rule for a sensor at `now`
    pub async fn check_at(
        &self,
        rule: &AlertRule,
        sensor_id: &str,
        now: DateTime<Utc>,
    ) -> Option<AlertEvent> {
        self.check_detailed(rule, sensor_id, now).await.into_fired()
    }

    /// Check a rule for a sensor, reporting why nothing fired
    pub async fn check_detailed(
        &self,
        rule: &AlertRule,
        sensor_id: &str,
        now: DateTime<Utc>,
    ) -> CheckOutcome {
        let candidate = match self.evaluator.try_evaluate(rule, sensor_id, now).await {
            Ok(Some(candidate)) => candidate,
            Ok(None) => return CheckOutcome::NoSignal,
            Err(e) => {
                warn!(
                    rule = %rule.name(),
                    sensor_id = %sensor_id,
                    error = %e,
                    "Query failed, no alert this cycle"
                );
                return CheckOutcome::QueryFailed(e);
            }
        };

        self.admit(candidate, rule.cooldown(), now)
    }

    /// Pass a candidate through the cooldown gate and record it
    ///
    /// The history lock is held across approval and append so history order
    /// matches approval order. A candidate whose observation is not newer
    /// than the last approved one for its key is suppressed, keeping alert
    /// ids unique per firing.
    fn admit(
        &self,
        candidate: CandidateAlert,
        cooldown: Duration,
        now: DateTime<Utc>,
    ) -> CheckOutcome {
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);

        let stale = self
            .last_observed
            .get(&candidate.key)
            .is_some_and(|last| candidate.observed_at <= *last);
        if stale {
            debug!(
                alert_key = %candidate.key,
                sensor_id = %candidate.sensor_id,
                observed_at = %candidate.observed_at,
                "Observation already alerted on"
            );
            return CheckOutcome::Suppressed(candidate.key);
        }

        if !self.cooldown.try_fire(&candidate.key, now, cooldown) {
            debug!(
                alert_key = %candidate.key,
                sensor_id = %candidate.sensor_id,
                "Alert suppressed by cooldown"
            );
            return CheckOutcome::Suppressed(candidate.key);
        }

        self.last_observed.insert(candidate.key.clone(), candidate.observed_at);
        let event = candidate.into_event();
        history.record(event.clone());
        drop(history);

        warn!(
            alert_id = %event.id,
            rule = %event.rule,
            sensor_id = %event.sensor_id,
            level = %event.level,
            value = event.value,
            threshold = event.threshold,
            "ALERT: {}",
            event.message
        );

        CheckOutcome::Fired(event)
    }

    /// Alerts fired within the last `hours`, oldest first
    pub fn get_alert_history(&self, hours: u32) -> Vec<AlertEvent> {
        self.history_since(Duration::from_secs(u64::from(hours) * 3600), Utc::now())
    }

    /// Alerts with `timestamp > now - since`, oldest first
    pub fn history_since(&self, since: Duration, now: DateTime<Utc>) -> Vec<AlertEvent> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .query(since, now)
    }

    /// Number of alerts currently retained
    pub fn history_len(&self) -> usize {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn cooldown(&self) -> &CooldownManager {
        &self.cooldown
    }
}
