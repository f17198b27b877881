//! Notification delivery for fired alerts
//!
//! Channels receive the finished [`AlertEvent`] and decide on their own
//! whether to act on it. The [`Dispatcher`] fans an alert out to every
//! channel and never propagates delivery failures.

mod email;
mod slack;

pub use email::{EmailChannel, EmailConfig};
pub use slack::{SlackChannel, SlackConfig};

use crate::models::AlertEvent;
use crate::observability::AlertMetrics;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// A delivery target for alerts
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Channel type name (e.g. `"slack"`, `"email"`)
    fn name(&self) -> &str;

    /// Whether this channel wants the alert at all
    fn accepts(&self, _alert: &AlertEvent) -> bool {
        true
    }

    /// Deliver the alert
    async fn send(&self, alert: &AlertEvent) -> Result<()>;
}

/// Outcome counts for one dispatch
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Sends alerts to every configured channel
#[derive(Clone, Default)]
pub struct Dispatcher {
    channels: Vec<Arc<dyn NotificationChannel>>,
    metrics: Option<AlertMetrics>,
}

impl Dispatcher {
    pub fn new(channels: Vec<Arc<dyn NotificationChannel>>) -> Self {
        Self {
            channels,
            metrics: None,
        }
    }

    /// Record delivery outcomes in Prometheus metrics
    pub fn with_metrics(mut self, metrics: AlertMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.name().to_string()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Deliver to all accepting channels concurrently
    pub async fn dispatch(&self, alert: &AlertEvent) -> DispatchReport {
        let mut report = DispatchReport::default();
        let mut sends = JoinSet::new();

        for channel in &self.channels {
            if !channel.accepts(alert) {
                debug!(channel = %channel.name(), alert_id = %alert.id, "Channel skipped alert");
                self.record(channel.name(), "skipped");
                report.skipped += 1;
                continue;
            }

            let channel = channel.clone();
            let alert = alert.clone();
            sends.spawn(async move {
                let result = channel.send(&alert).await;
                (channel.name().to_string(), alert.id, result)
            });
        }

        while let Some(joined) = sends.join_next().await {
            match joined {
                Ok((channel, alert_id, Ok(()))) => {
                    info!(channel = %channel, alert_id = %alert_id, "Notification sent");
                    self.record(&channel, "delivered");
                    report.delivered += 1;
                }
                Ok((channel, alert_id, Err(e))) => {
                    warn!(
                        channel = %channel,
                        alert_id = %alert_id,
                        error = %e,
                        "Notification failed"
                    );
                    self.record(&channel, "failed");
                    report.failed += 1;
                }
                Err(e) => {
                    warn!(error = %e, "Notification task aborted");
                    report.failed += 1;
                }
            }
        }

        report
    }

    fn record(&self, channel: &str, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.inc_notification(channel, outcome);
        }
    }
}
