//! Agent configuration
//!
//! Values come from an optional TOML file (`ALERT_CONFIG`, default
//! `alert-agent.toml`) overlaid by `ALERT__*` environment variables, e.g.
//! `ALERT__INFLUX__TOKEN` or `ALERT__SENSORS=S1,S2`.

use alert_lib::engine::{validate_rules, AlertRule, EngineConfig};
use alert_lib::notify::{EmailConfig, SlackConfig};
use alert_lib::query::InfluxConfig;
use alert_lib::summary::LlmConfig;
use anyhow::{Context, Result};
use config::builder::DefaultState;
use config::{ConfigBuilder, Environment, File};
use serde::Deserialize;

const DEFAULT_CONFIG_PATH: &str = "alert-agent.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// Name shown in notification subjects and footers
    #[serde(default = "default_system_name")]
    pub system_name: String,

    /// API server port for health/metrics/history
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,

    #[serde(default)]
    pub sensors: Vec<String>,

    #[serde(default = "AlertRule::defaults")]
    pub rules: Vec<AlertRule>,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub influx: InfluxConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub slack: SlackConfig,

    #[serde(default)]
    pub email: EmailConfig,
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME").unwrap_or_else(|_| "unknown".to_string())
}

fn default_system_name() -> String {
    "alert-agent".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_check_interval() -> u64 {
    60
}

fn env_source() -> Environment {
    Environment::with_prefix("ALERT")
        .separator("__")
        .list_separator(",")
        .with_list_parse_key("sensors")
        .try_parsing(true)
}

impl AgentConfig {
    /// Load configuration from the config file and environment
    pub fn load() -> Result<Self> {
        let path =
            std::env::var("ALERT_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        let builder = config::Config::builder()
            .add_source(File::with_name(&path).required(false))
            .add_source(env_source());

        Self::from_builder(builder)
            .with_context(|| format!("Failed to load configuration ({})", path))
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        let config: AgentConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.check_interval_secs == 0 {
            anyhow::bail!("check_interval_secs must be positive");
        }
        if self.engine.query_timeout_secs == 0 {
            anyhow::bail!("engine.query_timeout_secs must be positive");
        }
        if self.engine.history_capacity == 0 {
            anyhow::bail!("engine.history_capacity must be positive");
        }
        let rate = self.engine.default_sample_rate_hz;
        if !(rate.is_finite() && rate > 0.0) {
            anyhow::bail!("engine.default_sample_rate_hz must be positive");
        }
        if self.influx.org.trim().is_empty() {
            anyhow::bail!("influx.org must be set");
        }
        validate_rules(&self.rules)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alert_lib::AlertLevel;
    use config::FileFormat;
    use std::collections::HashMap;
    use std::time::Duration;

    fn load(toml: &str, env: &[(&str, &str)]) -> Result<AgentConfig> {
        let vars: HashMap<String, String> = env
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        AgentConfig::from_builder(
            config::Config::builder()
                .add_source(File::from_str(toml, FileFormat::Toml))
                .add_source(env_source().source(Some(vars))),
        )
    }

    const ORG: (&str, &str) = ("ALERT__INFLUX__ORG", "plant");

    #[test]
    fn test_defaults() {
        let config = load("", &[ORG]).unwrap();

        assert_eq!(config.api_port, 8080);
        assert_eq!(config.check_interval_secs, 60);
        assert!(config.sensors.is_empty());
        assert_eq!(config.rules, AlertRule::defaults());
        assert_eq!(config.engine.history_capacity, 100);
        assert_eq!(config.influx.bucket, "sensors");
        assert!(config.llm.api_key.is_none());
        assert!(config.slack.webhook_url.is_none());
        assert_eq!(config.email.min_level, AlertLevel::Critical);
    }

    #[test]
    fn test_environment_overrides() {
        let config = load(
            "",
            &[
                ("ALERT__SENSORS", "S1,S2,S3"),
                ("ALERT__API_PORT", "9090"),
                ("ALERT__INFLUX__TOKEN", "secret-token"),
                ("ALERT__SLACK__WEBHOOK_URL", "https://hooks.slack.test/abc"),
                ORG,
            ],
        )
        .unwrap();

        assert_eq!(config.sensors, vec!["S1", "S2", "S3"]);
        assert_eq!(config.api_port, 9090);
        assert_eq!(config.influx.token, "secret-token");
        assert_eq!(
            config.slack.webhook_url.as_deref(),
            Some("https://hooks.slack.test/abc")
        );
    }

    #[test]
    fn test_rules_from_file() {
        let config = load(
            r#"
            sensors = ["press-1"]

            [[rules]]
            kind = "instant_exceed"
            name = "pressure_high"
            metric = "pressure"
            field = "pressure"
            unit = "bar"
            threshold = 8.5
            level = "WARNING"
            cooldown_secs = 120

            [[rules]]
            kind = "sustained_ratio"
            name = "humidity_sustained"
            metric = "humidity"
            field = "humidity"
            threshold = 85.0
            window_secs = 600
            ratio = 0.5
            sample_rate_hz = 0.2
            level = "critical"
            cooldown_secs = 3600
            "#,
            &[ORG],
        )
        .unwrap();

        assert_eq!(config.rules.len(), 2);
        assert_eq!(config.rules[0].name(), "pressure_high");
        assert_eq!(config.rules[0].cooldown(), Duration::from_secs(120));
        assert_eq!(config.rules[1].level(), AlertLevel::Critical);
        match &config.rules[1] {
            AlertRule::SustainedRatio(rule) => {
                assert_eq!(rule.required_count(1.0), 60.0);
            }
            other => panic!("expected sustained rule, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_rules_rejected() {
        let result = load(
            r#"
            [[rules]]
            kind = "sustained_ratio"
            name = "bad_ratio"
            metric = "vibration"
            field = "vibration_magnitude"
            threshold = 3.5
            window_secs = 300
            ratio = 1.5
            level = "WARNING"
            cooldown_secs = 60
            "#,
            &[ORG],
        );

        assert!(result.is_err());
    }

    #[test]
    fn test_zero_interval_rejected() {
        assert!(load("check_interval_secs = 0", &[ORG]).is_err());
    }

    #[test]
    fn test_missing_influx_org_rejected() {
        let err = load("", &[]).unwrap_err();
        assert!(format!("{err:#}").contains("influx.org"));

        let config = load(
            r#"
            [influx]
            org = "plant"
            url = "http://proxy.local/influx"
            "#,
            &[],
        )
        .unwrap();
        assert_eq!(config.influx.org, "plant");
        assert_eq!(config.influx.url, "http://proxy.local/influx");
    }

    #[test]
    fn test_short_cooldown_rule_rejected() {
        let result = load(
            r#"
            [[rules]]
            kind = "instant_exceed"
            name = "temp_fast"
            metric = "temperature"
            field = "temperature"
            threshold = 50.0
            level = "CRITICAL"
            cooldown_secs = 30
            lookback_secs = 600
            "#,
            &[ORG],
        );

        assert!(result.is_err());
    }
}
