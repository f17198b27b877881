//! Output formatting utilities

use chrono::{DateTime, Local, Utc};
use clap::ValueEnum;
use colored::Colorize;

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Color a health status or alert level
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "healthy" | "ready" => status.green().to_string(),
        "degraded" | "warning" => status.yellow().to_string(),
        "unhealthy" | "not ready" => status.red().to_string(),
        "critical" => status.red().bold().to_string(),
        _ => status.to_string(),
    }
}

/// Render a UTC timestamp in local time
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp
        .with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

/// Render a unix timestamp in local time
pub fn format_unix(secs: i64) -> String {
    DateTime::from_timestamp(secs, 0)
        .map(|ts| format_timestamp(&ts))
        .unwrap_or_else(|| secs.to_string())
}

/// Shorten text to `max` characters, marking the cut
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(1)).collect();
    format!("{}…", kept)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("Sensor S1 temperature", 10), "Sensor S1…");
        assert_eq!(truncate("온도센서경보", 4), "온도센…");
    }

    #[test]
    fn test_format_unix_out_of_range() {
        assert_eq!(format_unix(i64::MAX), i64::MAX.to_string());
    }
}
