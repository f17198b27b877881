//! Time-series query facade
//!
//! This module provides:
//! - The [`QueryFacade`] trait the rule evaluator consumes
//! - A typed Flux query builder with literal escaping
//! - An InfluxDB 2.x HTTP implementation

mod flux;
mod influx;

pub use flux::{Aggregate, FluxQuery};
pub use influx::{InfluxConfig, InfluxQueryFacade};

use crate::models::{Sample, SampleCount};
use async_trait::async_trait;
use std::time::Duration;

/// Errors returned by the query backend
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// Backend unreachable or the connection failed mid-request
    #[error("query transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Backend answered with a non-2xx status
    #[error("query backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// No answer within the configured timeout
    #[error("query timed out after {0:?}")]
    Timeout(Duration),

    /// Response could not be interpreted
    #[error("malformed query response: {0}")]
    Malformed(String),

    /// Query parameters rejected before sending
    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

/// Identifies a single series over a trailing time range
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesSelector {
    pub measurement: String,
    pub device_id: String,
    pub field: String,
    pub range: Duration,
}

impl SeriesSelector {
    pub fn new(
        measurement: impl Into<String>,
        device_id: impl Into<String>,
        field: impl Into<String>,
        range: Duration,
    ) -> Self {
        Self {
            measurement: measurement.into(),
            device_id: device_id.into(),
            field: field.into(),
            range,
        }
    }
}

/// Read access to stored sensor telemetry
#[async_trait]
pub trait QueryFacade: Send + Sync {
    /// Latest sample of the selected series, `None` when the range is empty
    async fn latest(&self, selector: &SeriesSelector) -> Result<Option<Sample>, QueryError>;

    /// Number of samples strictly above `threshold`, `None` when the range is empty
    async fn count_exceeding(
        &self,
        selector: &SeriesSelector,
        threshold: f64,
    ) -> Result<Option<SampleCount>, QueryError>;
}
