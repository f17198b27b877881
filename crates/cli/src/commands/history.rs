//! Alert history command

use anyhow::Result;
use clap::ValueEnum;
use colored::Colorize;
use tabled::Tabled;

use crate::client::{AlertHistory, AlertRecord, ApiClient};
use crate::output::{
    color_status, format_timestamp, print_info, print_warning, truncate, OutputFormat,
};

const MESSAGE_WIDTH: usize = 60;

/// Alert level filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LevelFilter {
    Critical,
    Warning,
}

impl LevelFilter {
    fn matches(&self, level: &str) -> bool {
        let wanted = match self {
            LevelFilter::Critical => "CRITICAL",
            LevelFilter::Warning => "WARNING",
        };
        level.eq_ignore_ascii_case(wanted)
    }
}

#[derive(Tabled)]
struct AlertRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Level")]
    level: String,
    #[tabled(rename = "Rule")]
    rule: String,
    #[tabled(rename = "Sensor")]
    sensor: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Threshold")]
    threshold: String,
    #[tabled(rename = "Message")]
    message: String,
}

fn filter_alerts(
    alerts: Vec<AlertRecord>,
    level: Option<LevelFilter>,
    sensor: Option<&str>,
) -> Vec<AlertRecord> {
    alerts
        .into_iter()
        .filter(|a| level.map_or(true, |l| l.matches(&a.level)))
        .filter(|a| sensor.map_or(true, |s| a.sensor_id == s))
        .collect()
}

/// Show alerts fired within the last `hours`, newest first
pub async fn show_history(
    client: &ApiClient,
    hours: u32,
    level: Option<LevelFilter>,
    sensor: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let path = format!("api/v1/alerts?hours={}", hours);
    let history: AlertHistory = client.get(&path).await?;

    let mut alerts = filter_alerts(history.alerts, level, sensor.as_deref());
    alerts.reverse();

    match format {
        OutputFormat::Json => {
            let filtered = AlertHistory {
                hours: history.hours,
                total: alerts.len(),
                alerts,
            };
            println!("{}", serde_json::to_string_pretty(&filtered)?);
        }
        OutputFormat::Table => {
            println!("{}", format!("Alerts in the last {}h", history.hours).bold());
            println!();

            if alerts.is_empty() {
                print_warning("No alerts found");
                return Ok(());
            }

            let with_summary = alerts.iter().filter(|a| a.summary.is_some()).count();
            let rows: Vec<AlertRow> = alerts
                .iter()
                .map(|a| AlertRow {
                    time: format_timestamp(&a.timestamp),
                    level: color_status(&a.level),
                    rule: a.rule.clone(),
                    sensor: a.sensor_id.clone(),
                    value: a.value.to_string(),
                    threshold: a.threshold.to_string(),
                    message: truncate(&a.message, MESSAGE_WIDTH),
                })
                .collect();

            let table = tabled::Table::new(rows)
                .with(tabled::settings::Style::rounded())
                .to_string();
            println!("{}", table);
            println!("\nTotal: {} alerts", alerts.len());
            if with_summary > 0 {
                print_info("Use --format json to see generated summaries");
            }
        }
    }

    Ok(())
}
