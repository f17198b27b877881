//! Slack incoming-webhook channel

use super::NotificationChannel;
use crate::models::{AlertEvent, AlertLevel};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

const CRITICAL_COLOR: &str = "#DC2626";
const WARNING_COLOR: &str = "#F59E0B";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SlackConfig {
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    5
}

pub struct SlackChannel {
    client: Client,
    webhook_url: String,
    footer: String,
}

impl SlackChannel {
    pub fn new(
        webhook_url: impl Into<String>,
        footer: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create Slack HTTP client")?;

        Ok(Self {
            client,
            webhook_url: webhook_url.into(),
            footer: footer.into(),
        })
    }

    /// Build the channel when a webhook is configured
    pub fn from_config(config: &SlackConfig, footer: &str) -> Result<Option<Self>> {
        match config.webhook_url.as_deref().filter(|url| !url.is_empty()) {
            Some(url) => Ok(Some(Self::new(
                url,
                footer,
                Duration::from_secs(config.timeout_secs),
            )?)),
            None => Ok(None),
        }
    }

    fn build_payload(&self, alert: &AlertEvent) -> Value {
        let color = match alert.level {
            AlertLevel::Critical => CRITICAL_COLOR,
            AlertLevel::Warning => WARNING_COLOR,
        };

        let mut fields = vec![
            json!({ "title": "Sensor ID", "value": alert.sensor_id, "short": true }),
            json!({ "title": "Metric", "value": alert.metric, "short": true }),
            json!({ "title": "Current Value", "value": alert.value.to_string(), "short": true }),
            json!({ "title": "Threshold", "value": alert.threshold.to_string(), "short": true }),
        ];

        if let Some(summary) = alert.summary.as_deref().filter(|s| !s.is_empty()) {
            fields.push(json!({ "title": "AI Analysis", "value": summary, "short": false }));
        }

        json!({
            "attachments": [{
                "color": color,
                "title": format!("{} Alert", alert.level),
                "text": alert.message,
                "fields": fields,
                "footer": self.footer,
                "ts": alert.timestamp.timestamp(),
            }]
        })
    }
}

#[async_trait]
impl NotificationChannel for SlackChannel {
    fn name(&self) -> &str {
        "slack"
    }

    async fn send(&self, alert: &AlertEvent) -> Result<()> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&self.build_payload(alert))
            .send()
            .await
            .context("Failed to reach Slack webhook")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Slack webhook returned {}: {}", status, body);
        }

        Ok(())
    }
}
