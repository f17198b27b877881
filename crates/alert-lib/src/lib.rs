//! Alert library for sensor monitoring
//!
//! This crate provides the core functionality for:
//! - Rule evaluation against a time-series query backend
//! - Cooldown-gated alert firing with a bounded history
//! - Optional LLM summaries and Slack/email notification
//! - Periodic check scheduling
//! - Health checks, metrics and the HTTP API

pub mod engine;
pub mod health;
pub mod http;
pub mod models;
pub mod notify;
pub mod observability;
pub mod query;
pub mod scheduler;
pub mod summary;

pub use engine::{AlertEngine, AlertRule, CheckOutcome, EngineConfig};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{AlertMetrics, StructuredLogger};
pub use scheduler::{CheckScheduler, CycleResults};
