//! Sensor Alert Agent CLI
//!
//! A command-line tool for inspecting recent alerts and agent health.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{history, status};

/// Sensor Alert Agent CLI
#[derive(Parser)]
#[command(name = "alertctl")]
#[command(author, version, about = "CLI for the Sensor Alert Agent", long_about = None)]
pub struct Cli {
    /// Agent API URL (can also be set via ALERTCTL_API_URL env var)
    #[arg(long, env = "ALERTCTL_API_URL", default_value = "http://localhost:8080")]
    pub api_url: String,

    /// Output format
    #[arg(long, short, global = true, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show recently fired alerts
    History {
        /// Look-back window in hours
        #[arg(long, default_value_t = 24, value_parser = clap::value_parser!(u32).range(1..=720))]
        hours: u32,

        /// Only show alerts of this level
        #[arg(long)]
        level: Option<history::LevelFilter>,

        /// Only show alerts for this sensor
        #[arg(long)]
        sensor: Option<String>,
    },

    /// Show agent health and readiness
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let client = client::ApiClient::new(&cli.api_url)?;

    match cli.command {
        Commands::History {
            hours,
            level,
            sensor,
        } => {
            history::show_history(&client, hours, level, sensor, cli.format).await?;
        }
        Commands::Status => {
            status::show_status(&client, cli.format).await?;
        }
    }

    Ok(())
}
