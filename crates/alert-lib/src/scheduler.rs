//! Periodic rule checking
//!
//! Runs every configured rule against every sensor on a fixed interval with
//! jitter. Each (sensor, rule) check runs as its own task; a fired alert is
//! enriched and dispatched inside that task so a slow channel never delays
//! the other checks.

use crate::engine::{AlertEngine, AlertRule, CheckOutcome};
use crate::health::{components, ComponentHealth, HealthRegistry};
use crate::models::AlertEvent;
use crate::notify::{DispatchReport, Dispatcher};
use crate::observability::{AlertMetrics, StructuredLogger};
use crate::summary::{enrich, DisabledSummarizer, EnrichmentError, SummaryGenerator};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Base check interval (default: 60 seconds)
    pub interval: Duration,
    /// Maximum jitter added to the interval (default: 1 second)
    pub jitter: Duration,
    /// Upper bound on summary generation per alert
    pub summary_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            jitter: Duration::from_secs(1),
            summary_timeout: Duration::from_secs(10),
        }
    }
}

/// Outcome tallies for one cycle
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleResults {
    pub checks: usize,
    pub fired: usize,
    pub suppressed: usize,
    pub no_signal: usize,
    pub query_failures: usize,
    pub notification_failures: usize,
    pub summary_failures: usize,
}

impl CycleResults {
    fn absorb(&mut self, check: CheckReport) {
        self.checks += 1;
        match check.kind {
            CheckKind::Fired => self.fired += 1,
            CheckKind::Suppressed => self.suppressed += 1,
            CheckKind::NoSignal => self.no_signal += 1,
            CheckKind::QueryFailed => self.query_failures += 1,
        }
        if let Some(report) = check.dispatch {
            self.notification_failures += report.failed;
        }
        if check.summary_failed {
            self.summary_failures += 1;
        }
    }

    /// Every check in the cycle hit a backend error
    pub fn backend_down(&self) -> bool {
        self.checks > 0 && self.query_failures == self.checks
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CheckKind {
    Fired,
    Suppressed,
    NoSignal,
    QueryFailed,
}

struct CheckReport {
    kind: CheckKind,
    dispatch: Option<DispatchReport>,
    summary_failed: bool,
}

/// State shared by every check task
struct CheckContext {
    engine: Arc<AlertEngine>,
    summarizer: Arc<dyn SummaryGenerator>,
    dispatcher: Dispatcher,
    metrics: AlertMetrics,
    logger: StructuredLogger,
    summary_timeout: Duration,
}

impl CheckContext {
    async fn check(&self, rule: &AlertRule, sensor_id: &str, now: DateTime<Utc>) -> CheckReport {
        let rule_name = rule.name();
        let start = Instant::now();
        let outcome = self.engine.check_detailed(rule, sensor_id, now).await;

        self.metrics.inc_check(rule_name);
        self.metrics
            .observe_check_latency(rule_name, start.elapsed().as_secs_f64());

        match outcome {
            CheckOutcome::Fired(event) => {
                self.metrics.inc_fired(rule_name, event.level.as_str());
                let (dispatch, summary_failed) = self.deliver(event).await;
                CheckReport {
                    kind: CheckKind::Fired,
                    dispatch: Some(dispatch),
                    summary_failed,
                }
            }
            CheckOutcome::Suppressed(_) => {
                self.metrics.inc_suppressed(rule_name);
                CheckReport::plain(CheckKind::Suppressed)
            }
            CheckOutcome::NoSignal => CheckReport::plain(CheckKind::NoSignal),
            CheckOutcome::QueryFailed(_) => {
                self.metrics.inc_query_error(rule_name);
                CheckReport::plain(CheckKind::QueryFailed)
            }
        }
    }

    /// Enrich then dispatch a fired alert
    async fn deliver(&self, event: AlertEvent) -> (DispatchReport, bool) {
        let (event, error) = enrich(self.summarizer.as_ref(), &event, self.summary_timeout).await;
        let summary_failed = matches!(&error, Some(e) if !matches!(e, EnrichmentError::Disabled));
        if summary_failed {
            self.metrics.inc_summary_failure();
        }

        self.logger.log_alert(&event);
        let report = self.dispatcher.dispatch(&event).await;
        self.logger
            .log_dispatch(&event.id, report.delivered, report.skipped, report.failed);

        (report, summary_failed)
    }
}

impl CheckReport {
    fn plain(kind: CheckKind) -> Self {
        Self {
            kind,
            dispatch: None,
            summary_failed: false,
        }
    }
}

/// Runs every rule for every sensor on an interval
pub struct CheckScheduler {
    context: Arc<CheckContext>,
    rules: Vec<Arc<AlertRule>>,
    sensors: Vec<String>,
    health: HealthRegistry,
    config: SchedulerConfig,
}

impl CheckScheduler {
    pub fn builder(engine: Arc<AlertEngine>) -> CheckSchedulerBuilder {
        CheckSchedulerBuilder::new(engine)
    }

    /// Run until a shutdown message arrives; the first cycle starts immediately
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            sensors = self.sensors.len(),
            rules = self.rules.len(),
            "Starting alert check loop"
        );
        self.health.set_healthy(components::SCHEDULER).await;

        let mut next = Duration::ZERO;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(next) => {
                    let start = Instant::now();
                    let results = self.run_cycle_at(Utc::now()).await;

                    debug!(
                        checks = results.checks,
                        fired = results.fired,
                        suppressed = results.suppressed,
                        no_signal = results.no_signal,
                        query_failures = results.query_failures,
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Check cycle complete"
                    );

                    next = self.current_interval();
                }
                _ = shutdown.recv() => {
                    info!("Shutting down alert check loop");
                    break;
                }
            }
        }

        self.health
            .set_unhealthy(components::SCHEDULER, "Check loop stopped")
            .await;
    }

    /// Run one cycle of checks at `now` and update health
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> CycleResults {
        let mut tasks = JoinSet::new();

        for sensor_id in &self.sensors {
            for rule in &self.rules {
                let context = self.context.clone();
                let rule = rule.clone();
                let sensor_id = sensor_id.clone();
                tasks.spawn(async move { context.check(&rule, &sensor_id, now).await });
            }
        }

        let mut results = CycleResults::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => results.absorb(report),
                Err(e) => warn!(error = %e, "Check task aborted"),
            }
        }

        self.context
            .metrics
            .set_history_size(self.context.engine.history_len());
        self.update_health(&results).await;

        results
    }

    async fn update_health(&self, results: &CycleResults) {
        if results.backend_down() {
            self.health
                .set_degraded(
                    components::QUERY_BACKEND,
                    format!("All {} checks failed last cycle", results.checks),
                )
                .await;
        } else if results.checks > 0 {
            self.health.set_healthy(components::QUERY_BACKEND).await;
        }

        if results.notification_failures > 0 {
            self.health
                .set_degraded(
                    components::NOTIFIER,
                    format!("{} deliveries failed last cycle", results.notification_failures),
                )
                .await;
        } else if results.fired > 0 {
            self.health.set_healthy(components::NOTIFIER).await;
        }

        if self.context.summarizer.is_enabled() {
            if results.summary_failures > 0 {
                self.health
                    .set_degraded(
                        components::SUMMARIZER,
                        format!("{} summaries failed last cycle", results.summary_failures),
                    )
                    .await;
            } else if results.fired > 0 {
                self.health.set_healthy(components::SUMMARIZER).await;
            }
        }
    }

    fn current_interval(&self) -> Duration {
        let jitter_ms = rand_jitter(self.config.jitter.as_millis() as u64);
        self.config.interval + Duration::from_millis(jitter_ms)
    }
}

/// Pseudo-random jitter in `0..max_ms`
fn rand_jitter(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;

    now % max_ms
}

pub struct CheckSchedulerBuilder {
    engine: Arc<AlertEngine>,
    rules: Vec<AlertRule>,
    sensors: Vec<String>,
    summarizer: Arc<dyn SummaryGenerator>,
    dispatcher: Dispatcher,
    health: HealthRegistry,
    metrics: Option<AlertMetrics>,
    logger: StructuredLogger,
    config: SchedulerConfig,
}

impl CheckSchedulerBuilder {
    pub fn new(engine: Arc<AlertEngine>) -> Self {
        Self {
            engine,
            rules: AlertRule::defaults(),
            sensors: Vec::new(),
            summarizer: Arc::new(DisabledSummarizer),
            dispatcher: Dispatcher::default(),
            health: HealthRegistry::new(),
            metrics: None,
            logger: StructuredLogger::new("unknown"),
            config: SchedulerConfig::default(),
        }
    }

    pub fn rules(mut self, rules: Vec<AlertRule>) -> Self {
        self.rules = rules;
        self
    }

    pub fn sensors(mut self, sensors: Vec<String>) -> Self {
        self.sensors = sensors;
        self
    }

    pub fn summarizer(mut self, summarizer: Arc<dyn SummaryGenerator>) -> Self {
        self.summarizer = summarizer;
        self
    }

    pub fn dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = health;
        self
    }

    pub fn metrics(mut self, metrics: AlertMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn jitter(mut self, jitter: Duration) -> Self {
        self.config.jitter = jitter;
        self
    }

    pub fn summary_timeout(mut self, timeout: Duration) -> Self {
        self.config.summary_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<CheckScheduler> {
        if self.config.interval.is_zero() {
            anyhow::bail!("Check interval must be positive");
        }
        crate::engine::validate_rules(&self.rules)?;
        if self.sensors.is_empty() {
            warn!("No sensors configured, check cycles will be empty");
        }

        let context = CheckContext {
            engine: self.engine,
            summarizer: self.summarizer,
            dispatcher: self.dispatcher,
            metrics: self.metrics.unwrap_or_default(),
            logger: self.logger,
            summary_timeout: self.config.summary_timeout,
        };

        Ok(CheckScheduler {
            context: Arc::new(context),
            rules: self.rules.into_iter().map(Arc::new).collect(),
            sensors: self.sensors,
            health: self.health,
            config: self.config,
        })
    }
}
