//! Alert Agent - sensor threshold alerting
//!
//! Periodically checks alert rules against the time-series backend,
//! dispatches fired alerts and serves health, metrics and history.

use alert_lib::{
    engine::AlertEngine,
    health::{components, ComponentHealth, HealthRegistry},
    http::{self, AppState},
    notify::{Dispatcher, EmailChannel, NotificationChannel, SlackChannel},
    observability::{AlertMetrics, StructuredLogger},
    query::{InfluxQueryFacade, QueryFacade},
    scheduler::CheckScheduler,
    summary::{self, SummaryGenerator},
};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting alert-agent");

    let config = config::AgentConfig::load()?;
    info!(
        node_name = %config.node_name,
        sensors = config.sensors.len(),
        rules = config.rules.len(),
        "Agent configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register_all().await;

    let metrics = AlertMetrics::new();
    let logger = StructuredLogger::new(&config.node_name);

    let query: Arc<dyn QueryFacade> = Arc::new(InfluxQueryFacade::new(&config.influx)?);
    let engine = Arc::new(AlertEngine::new(query, config.engine.clone()));

    let summarizer: Arc<dyn SummaryGenerator> = Arc::from(summary::from_config(&config.llm)?);
    if !summarizer.is_enabled() {
        info!("LLM API key not set, alert summaries disabled");
        health_registry
            .update(components::SUMMARIZER, ComponentHealth::healthy_with("disabled"))
            .await;
    }

    let mut channels: Vec<Arc<dyn NotificationChannel>> = Vec::new();
    if let Some(slack) = SlackChannel::from_config(&config.slack, &config.system_name)? {
        channels.push(Arc::new(slack));
    }
    if let Some(email) = EmailChannel::from_config(&config.email, &config.system_name)? {
        channels.push(Arc::new(email));
    }
    if channels.is_empty() {
        warn!("No notification channels configured, alerts are logged only");
        health_registry
            .update(components::NOTIFIER, ComponentHealth::healthy_with("no channels configured"))
            .await;
    }
    let dispatcher = Dispatcher::new(channels).with_metrics(metrics.clone());

    logger.log_startup(
        AGENT_VERSION,
        config.sensors.len(),
        config.rules.len(),
        &dispatcher.channel_names(),
    );

    let scheduler = CheckScheduler::builder(engine.clone())
        .rules(config.rules.clone())
        .sensors(config.sensors.clone())
        .summarizer(summarizer)
        .dispatcher(dispatcher)
        .health(health_registry.clone())
        .metrics(metrics.clone())
        .logger(logger.clone())
        .interval(Duration::from_secs(config.check_interval_secs))
        .summary_timeout(Duration::from_secs(config.llm.timeout_secs))
        .build()?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown_rx));

    let app_state = Arc::new(AppState::new(health_registry.clone(), metrics, engine));
    health_registry.set_ready(true).await;

    let mut api_handle = tokio::spawn(http::serve(config.api_port, app_state));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            logger.log_shutdown("SIGINT received");
        }
        result = &mut api_handle => {
            match result {
                Ok(Err(e)) => error!(error = %e, "API server failed"),
                Err(e) => error!(error = %e, "API server task aborted"),
                Ok(Ok(())) => {}
            }
            logger.log_shutdown("API server stopped");
        }
    }

    health_registry.set_ready(false).await;
    let _ = shutdown_tx.send(());
    if let Err(e) = scheduler_handle.await {
        warn!(error = %e, "Check loop did not stop cleanly");
    }
    api_handle.abort();

    info!("Shutting down");
    Ok(())
}
