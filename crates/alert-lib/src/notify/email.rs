//! SMTP email channel

use super::NotificationChannel;
use crate::models::{AlertEvent, AlertLevel};
use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Deserialize;
use std::fmt::Write as _;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Defaults to the sender
    #[serde(default)]
    pub recipient: Option<String>,
    #[serde(default = "default_min_level")]
    pub min_level: AlertLevel,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_smtp_host() -> String {
    "smtp.gmail.com".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

fn default_min_level() -> AlertLevel {
    AlertLevel::Critical
}

fn default_timeout_secs() -> u64 {
    10
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_host: default_smtp_host(),
            smtp_port: default_smtp_port(),
            sender: None,
            password: None,
            recipient: None,
            min_level: default_min_level(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

pub struct EmailChannel {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
    min_level: AlertLevel,
    system: String,
}

impl EmailChannel {
    /// Build the channel when sender credentials are configured
    pub fn from_config(config: &EmailConfig, system: &str) -> Result<Option<Self>> {
        let (sender, password) = match (
            config.sender.as_deref().filter(|s| !s.is_empty()),
            config.password.as_deref().filter(|p| !p.is_empty()),
        ) {
            (Some(sender), Some(password)) => (sender, password),
            _ => {
                info!("Email credentials not set, email notifications disabled");
                return Ok(None);
            }
        };

        let from: Mailbox = sender
            .parse()
            .with_context(|| format!("Invalid email sender: {}", sender))?;
        let to: Mailbox = match config.recipient.as_deref().filter(|r| !r.is_empty()) {
            Some(recipient) => recipient
                .parse()
                .with_context(|| format!("Invalid email recipient: {}", recipient))?,
            None => from.clone(),
        };

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            .with_context(|| format!("Invalid SMTP relay: {}", config.smtp_host))?
            .port(config.smtp_port)
            .credentials(Credentials::new(sender.to_string(), password.to_string()))
            .timeout(Some(Duration::from_secs(config.timeout_secs)))
            .build();

        Ok(Some(Self {
            transport,
            from,
            to,
            min_level: config.min_level,
            system: system.to_string(),
        }))
    }

    fn build_message(&self, alert: &AlertEvent) -> Result<Message> {
        Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(subject(&self.system, alert))
            .header(ContentType::TEXT_HTML)
            .body(html_body(&self.system, alert))
            .context("Failed to build alert email")
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn name(&self) -> &str {
        "email"
    }

    fn accepts(&self, alert: &AlertEvent) -> bool {
        alert.level >= self.min_level
    }

    async fn send(&self, alert: &AlertEvent) -> Result<()> {
        let message = self.build_message(alert)?;
        self.transport
            .send(message)
            .await
            .context("SMTP delivery failed")?;
        Ok(())
    }
}

fn subject(system: &str, alert: &AlertEvent) -> String {
    format!("[{}] {} Alert - {}", system, alert.level, alert.sensor_id)
}

fn html_body(system: &str, alert: &AlertEvent) -> String {
    let color = match alert.level {
        AlertLevel::Critical => "#DC2626",
        AlertLevel::Warning => "#F59E0B",
    };

    let mut html = String::new();
    let _ = write!(
        html,
        "<html><body style=\"font-family: Arial, sans-serif;\">\
         <h2 style=\"color: {color};\">{level} Alert</h2>\
         <p><strong>{message}</strong></p>\
         <table style=\"border-collapse: collapse; margin: 20px 0;\">",
        color = color,
        level = alert.level,
        message = escape_html(&alert.message),
    );

    for (label, value) in [
        ("Sensor ID", alert.sensor_id.clone()),
        ("Metric", alert.metric.clone()),
        ("Current Value", alert.value.to_string()),
        ("Threshold", alert.threshold.to_string()),
    ] {
        let _ = write!(
            html,
            "<tr><td style=\"padding: 8px; border: 1px solid #ddd;\"><strong>{}</strong></td>\
             <td style=\"padding: 8px; border: 1px solid #ddd;\">{}</td></tr>",
            label,
            escape_html(&value)
        );
    }
    html.push_str("</table>");

    if let Some(summary) = alert.summary.as_deref().filter(|s| !s.is_empty()) {
        let _ = write!(
            html,
            "<div style=\"background: #f3f4f6; padding: 15px; border-radius: 5px;\">\
             <h3>AI Analysis</h3><p>{}</p></div>",
            escape_html(summary)
        );
    }

    let _ = write!(
        html,
        "<p style=\"color: #666; margin-top: 20px;\">Time: {}<br>{}</p></body></html>",
        alert.timestamp.to_rfc3339(),
        escape_html(system)
    );

    html
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
