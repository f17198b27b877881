//! Alert rule definitions
//!
//! Rules are deserialized from configuration and validated once at load
//! time; a rule that passes [`AlertRule::validate`] is safe to evaluate.

use crate::models::AlertLevel;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Default trailing window for the "latest sample" lookup
const DEFAULT_LOOKBACK_SECS: u64 = 60;

/// Rejected rule definitions
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuleError {
    #[error("rule name must not be empty")]
    EmptyName,

    #[error("duplicate rule name: {0}")]
    DuplicateName(String),

    #[error("rule {rule}: threshold must be finite")]
    NonFiniteThreshold { rule: String },

    #[error("rule {rule}: {field} must be non-zero")]
    ZeroDuration { rule: String, field: &'static str },

    #[error("rule {rule}: ratio must be within (0, 1], got {ratio}")]
    RatioOutOfRange { rule: String, ratio: f64 },

    #[error("rule {rule}: sample rate must be positive, got {rate}")]
    InvalidSampleRate { rule: String, rate: f64 },

    #[error("rule {rule}: cooldown of {cooldown_secs}s must cover the {lookback_secs}s lookback")]
    CooldownShorterThanLookback {
        rule: String,
        cooldown_secs: u64,
        lookback_secs: u64,
    },
}

/// Fires when the latest sample strictly exceeds the threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstantExceedRule {
    pub name: String,
    /// Label shown in alerts
    pub metric: String,
    /// Stored field name queried from the backend
    pub field: String,
    #[serde(default)]
    pub unit: String,
    pub threshold: f64,
    pub level: AlertLevel,
    #[serde(rename = "cooldown_secs", with = "duration_secs")]
    pub cooldown: Duration,
    #[serde(
        rename = "lookback_secs",
        with = "duration_secs",
        default = "default_lookback"
    )]
    pub lookback: Duration,
}

/// Fires when a high fraction of the expected samples in a window exceed
/// the threshold, tolerating sampling gaps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SustainedRatioRule {
    pub name: String,
    pub metric: String,
    pub field: String,
    #[serde(default)]
    pub unit: String,
    pub threshold: f64,
    #[serde(rename = "window_secs", with = "duration_secs")]
    pub window: Duration,
    pub ratio: f64,
    /// Falls back to the engine-wide default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate_hz: Option<f64>,
    pub level: AlertLevel,
    #[serde(rename = "cooldown_secs", with = "duration_secs")]
    pub cooldown: Duration,
}

impl SustainedRatioRule {
    /// Number of samples that must exceed the threshold, exclusive
    pub fn required_count(&self, default_rate_hz: f64) -> f64 {
        let rate = self.sample_rate_hz.unwrap_or(default_rate_hz);
        let expected = self.window.as_secs_f64() * rate;
        expected * self.ratio
    }
}

fn default_lookback() -> Duration {
    Duration::from_secs(DEFAULT_LOOKBACK_SECS)
}

/// A configured alert rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertRule {
    InstantExceed(InstantExceedRule),
    SustainedRatio(SustainedRatioRule),
}

impl AlertRule {
    pub fn name(&self) -> &str {
        match self {
            AlertRule::InstantExceed(r) => &r.name,
            AlertRule::SustainedRatio(r) => &r.name,
        }
    }

    pub fn metric(&self) -> &str {
        match self {
            AlertRule::InstantExceed(r) => &r.metric,
            AlertRule::SustainedRatio(r) => &r.metric,
        }
    }

    pub fn field(&self) -> &str {
        match self {
            AlertRule::InstantExceed(r) => &r.field,
            AlertRule::SustainedRatio(r) => &r.field,
        }
    }

    pub fn threshold(&self) -> f64 {
        match self {
            AlertRule::InstantExceed(r) => r.threshold,
            AlertRule::SustainedRatio(r) => r.threshold,
        }
    }

    pub fn level(&self) -> AlertLevel {
        match self {
            AlertRule::InstantExceed(r) => r.level,
            AlertRule::SustainedRatio(r) => r.level,
        }
    }

    pub fn cooldown(&self) -> Duration {
        match self {
            AlertRule::InstantExceed(r) => r.cooldown,
            AlertRule::SustainedRatio(r) => r.cooldown,
        }
    }

    /// Check the rule is internally consistent
    pub fn validate(&self) -> Result<(), RuleError> {
        let name = self.name();
        if name.trim().is_empty() {
            return Err(RuleError::EmptyName);
        }
        if !self.threshold().is_finite() {
            return Err(RuleError::NonFiniteThreshold {
                rule: name.to_string(),
            });
        }

        if self.cooldown().is_zero() {
            return Err(RuleError::ZeroDuration {
                rule: name.to_string(),
                field: "cooldown_secs",
            });
        }

        match self {
            AlertRule::InstantExceed(r) => {
                if r.lookback.as_secs() == 0 {
                    return Err(RuleError::ZeroDuration {
                        rule: r.name.clone(),
                        field: "lookback_secs",
                    });
                }
                // A shorter cooldown would see the same last sample again
                if r.cooldown < r.lookback {
                    return Err(RuleError::CooldownShorterThanLookback {
                        rule: r.name.clone(),
                        cooldown_secs: r.cooldown.as_secs(),
                        lookback_secs: r.lookback.as_secs(),
                    });
                }
            }
            AlertRule::SustainedRatio(r) => {
                if r.window.as_secs() == 0 {
                    return Err(RuleError::ZeroDuration {
                        rule: r.name.clone(),
                        field: "window_secs",
                    });
                }
                if !(r.ratio > 0.0 && r.ratio <= 1.0) {
                    return Err(RuleError::RatioOutOfRange {
                        rule: r.name.clone(),
                        ratio: r.ratio,
                    });
                }
                if let Some(rate) = r.sample_rate_hz {
                    if !(rate.is_finite() && rate > 0.0) {
                        return Err(RuleError::InvalidSampleRate {
                            rule: r.name.clone(),
                            rate,
                        });
                    }
                }
            }
        }

        Ok(())
    }

    /// The two rules shipped by default: a critical temperature ceiling and
    /// a sustained vibration warning
    pub fn defaults() -> Vec<AlertRule> {
        vec![
            AlertRule::InstantExceed(InstantExceedRule {
                name: "temp_critical".to_string(),
                metric: "temperature".to_string(),
                field: "temperature".to_string(),
                unit: "°C".to_string(),
                threshold: 50.0,
                level: AlertLevel::Critical,
                cooldown: Duration::from_secs(10 * 60),
                lookback: default_lookback(),
            }),
            AlertRule::SustainedRatio(SustainedRatioRule {
                name: "vib_sustained".to_string(),
                metric: "vibration".to_string(),
                field: "vibration_magnitude".to_string(),
                unit: String::new(),
                threshold: 3.5,
                window: Duration::from_secs(5 * 60),
                ratio: 0.8,
                sample_rate_hz: None,
                level: AlertLevel::Warning,
                cooldown: Duration::from_secs(30 * 60),
            }),
        ]
    }
}

/// Validate a rule set, including name uniqueness across rules
pub fn validate_rules(rules: &[AlertRule]) -> Result<(), RuleError> {
    let mut seen = HashSet::new();
    for rule in rules {
        rule.validate()?;
        if !seen.insert(rule.name()) {
            return Err(RuleError::DuplicateName(rule.name().to_string()));
        }
    }
    Ok(())
}

/// Serde adapter for durations expressed as whole seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
