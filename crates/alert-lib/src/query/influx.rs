//! InfluxDB 2.x query facade
//!
//! Sends rendered Flux queries to `/api/v2/query` and reads the CSV response
//! (no annotations, header row enabled).

use super::{FluxQuery, QueryError, QueryFacade, SeriesSelector};
use crate::models::{Sample, SampleCount};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Connection settings for the InfluxDB HTTP API
#[derive(Debug, Clone, Deserialize)]
pub struct InfluxConfig {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default)]
    pub org: String,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_url() -> String {
    "http://localhost:8086".to_string()
}

fn default_bucket() -> String {
    "sensors".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            org: String::new(),
            bucket: default_bucket(),
            token: String::new(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Query facade backed by the InfluxDB HTTP API
pub struct InfluxQueryFacade {
    client: Client,
    query_url: Url,
    bucket: String,
    token: String,
}

impl InfluxQueryFacade {
    pub fn new(config: &InfluxConfig) -> Result<Self, QueryError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        let query_url = query_url(&config.url, &config.org)
            .map_err(|e| QueryError::InvalidQuery(format!("invalid InfluxDB url: {e}")))?;

        Ok(Self {
            client,
            query_url,
            bucket: config.bucket.clone(),
            token: config.token.clone(),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn run(&self, query: &FluxQuery) -> Result<Option<CsvRow>, QueryError> {
        let text = query.render()?;
        debug!(aggregate = ?query.aggregate(), "Sending Flux query");

        let body = serde_json::json!({
            "query": text,
            "type": "flux",
            "dialect": {
                "header": true,
                "annotations": [],
                "delimiter": ",",
            },
        });

        let response = self
            .client
            .post(self.query_url.clone())
            .header("Authorization", format!("Token {}", self.token))
            .header("Accept", "application/csv")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(QueryError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let payload = response.text().await?;
        first_row(&payload)
    }
}

#[async_trait]
impl QueryFacade for InfluxQueryFacade {
    async fn latest(&self, selector: &SeriesSelector) -> Result<Option<Sample>, QueryError> {
        let query = FluxQuery::last(&self.bucket, selector.clone());
        let Some(row) = self.run(&query).await? else {
            return Ok(None);
        };

        let value = row.value.parse::<f64>().map_err(|e| {
            QueryError::Malformed(format!("non-numeric _value {:?}: {e}", row.value))
        })?;
        let timestamp = row
            .timestamp
            .ok_or_else(|| QueryError::Malformed("missing _time column".to_string()))?;

        Ok(Some(Sample { value, timestamp }))
    }

    async fn count_exceeding(
        &self,
        selector: &SeriesSelector,
        threshold: f64,
    ) -> Result<Option<SampleCount>, QueryError> {
        let query = FluxQuery::count_above(&self.bucket, selector.clone(), threshold);
        let Some(row) = self.run(&query).await? else {
            return Ok(None);
        };

        let count = row.value.parse::<i64>().map_err(|e| {
            QueryError::Malformed(format!("non-integer count {:?}: {e}", row.value))
        })?;

        // count() drops _time; fall back to the window stop, then to now
        let timestamp = row.timestamp.unwrap_or_else(Utc::now);

        Ok(Some(SampleCount { count, timestamp }))
    }
}

/// Resolve the query endpoint below `base`, keeping any path prefix such
/// as a reverse-proxy mount point
fn query_url(base: &str, org: &str) -> Result<Url, url::ParseError> {
    let mut base = Url::parse(base)?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }

    let mut url = base.join("api/v2/query")?;
    url.query_pairs_mut().append_pair("org", org);
    Ok(url)
}

/// One data row from the CSV response
#[derive(Debug, Clone, PartialEq)]
struct CsvRow {
    value: String,
    timestamp: Option<DateTime<Utc>>,
}

/// Extract the first data row, locating columns by header name
fn first_row(payload: &str) -> Result<Option<CsvRow>, QueryError> {
    if payload.trim().is_empty() {
        return Ok(None);
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(payload.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| QueryError::Malformed(e.to_string()))?
        .clone();

    let column = |name: &str| headers.iter().position(|h| h.trim() == name);
    let value_idx = column("_value")
        .ok_or_else(|| QueryError::Malformed("response has no _value column".to_string()))?;
    let time_idx = column("_time").or_else(|| column("_stop"));

    for record in reader.records() {
        let record = record.map_err(|e| QueryError::Malformed(e.to_string()))?;
        let Some(value) = record.get(value_idx).map(str::trim) else {
            continue;
        };
        // Multi-table responses repeat the header row
        if value.is_empty() || value == "_value" {
            continue;
        }

        let timestamp = match time_idx.and_then(|idx| record.get(idx)).map(str::trim) {
            Some(raw) if !raw.is_empty() => Some(
                DateTime::parse_from_rfc3339(raw)
                    .map_err(|e| QueryError::Malformed(format!("bad timestamp {raw:?}: {e}")))?
                    .with_timezone(&Utc),
            ),
            _ => None,
        };

        return Ok(Some(CsvRow {
            value: value.to_string(),
            timestamp,
        }));
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAST_RESPONSE: &str = concat!(
        ",result,table,_start,_stop,_time,_value,_field,_measurement,device_id\r\n",
        ",_result,0,2024-01-01T00:00:00Z,2024-01-01T00:01:00Z,2024-01-01T00:00:59Z,",
        "55.3,temperature,sensor_reading,S1\r\n\r\n",
    );

    const COUNT_RESPONSE: &str = concat!(
        ",result,table,_start,_stop,_value,_field,_measurement,device_id\r\n",
        ",_result,0,2024-01-01T00:00:00Z,2024-01-01T00:05:00Z,",
        "241,vibration_magnitude,sensor_reading,S1\r\n\r\n",
    );

    fn selector(field: &str) -> SeriesSelector {
        SeriesSelector::new("sensor_reading", "S1", field, Duration::from_secs(60))
    }

    fn facade_for(server: &mockito::ServerGuard) -> InfluxQueryFacade {
        InfluxQueryFacade::new(&InfluxConfig {
            url: server.url(),
            org: "plant".to_string(),
            bucket: "telemetry".to_string(),
            token: "secret".to_string(),
            request_timeout_secs: 5,
        })
        .unwrap()
    }

    #[test]
    fn test_query_url_keeps_path_prefix() {
        let url = query_url("http://localhost:8086", "plant").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8086/api/v2/query?org=plant");

        let url = query_url("https://proxy.local/influx", "plant").unwrap();
        assert_eq!(url.as_str(), "https://proxy.local/influx/api/v2/query?org=plant");

        let url = query_url("https://proxy.local/influx/", "my org").unwrap();
        assert_eq!(url.as_str(), "https://proxy.local/influx/api/v2/query?org=my+org");
    }

    #[tokio::test]
    async fn test_latest_behind_path_prefix() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/influx/api/v2/query")
            .match_query(mockito::Matcher::UrlEncoded("org".into(), "plant".into()))
            .with_status(200)
            .with_body(LAST_RESPONSE)
            .create_async()
            .await;

        let facade = InfluxQueryFacade::new(&InfluxConfig {
            url: format!("{}/influx", server.url()),
            org: "plant".to_string(),
            ..InfluxConfig::default()
        })
        .unwrap();

        assert!(facade.latest(&selector("temperature")).await.unwrap().is_some());
        mock.assert_async().await;
    }

    #[test]
    fn test_first_row_last() {
        let row = first_row(LAST_RESPONSE).unwrap().unwrap();
        assert_eq!(row.value, "55.3");
        assert_eq!(
            row.timestamp.unwrap().to_rfc3339(),
            "2024-01-01T00:00:59+00:00"
        );
    }

    #[test]
    fn test_first_row_count_falls_back_to_stop() {
        let row = first_row(COUNT_RESPONSE).unwrap().unwrap();
        assert_eq!(row.value, "241");
        assert_eq!(
            row.timestamp.unwrap().to_rfc3339(),
            "2024-01-01T00:05:00+00:00"
        );
    }

    #[test]
    fn test_first_row_empty_payload() {
        assert!(first_row("").unwrap().is_none());
        assert!(first_row("\r\n").unwrap().is_none());
    }

    #[test]
    fn test_first_row_header_only() {
        let payload = ",result,table,_start,_stop,_time,_value\r\n";
        assert!(first_row(payload).unwrap().is_none());
    }

    #[test]
    fn test_first_row_missing_value_column() {
        let payload = "error,reference\r\nbad query,123\r\n";
        assert!(matches!(first_row(payload), Err(QueryError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_latest_against_mock_server() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v2/query")
            .match_query(mockito::Matcher::UrlEncoded("org".into(), "plant".into()))
            .match_header("authorization", "Token secret")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({ "type": "flux" })))
            .with_status(200)
            .with_body(LAST_RESPONSE)
            .create_async()
            .await;

        let facade = facade_for(&server);
        let sample = facade.latest(&selector("temperature")).await.unwrap().unwrap();

        assert_eq!(sample.value, 55.3);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_count_against_mock_server() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v2/query")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(COUNT_RESPONSE)
            .create_async()
            .await;

        let facade = facade_for(&server);
        let count = facade
            .count_exceeding(&selector("vibration_magnitude"), 3.5)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(count.count, 241);
    }

    #[tokio::test]
    async fn test_empty_result_is_none() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v2/query")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body("")
            .create_async()
            .await;

        let facade = facade_for(&server);
        assert!(facade.latest(&selector("temperature")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_error_status_surfaces() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v2/query")
            .match_query(mockito::Matcher::Any)
            .with_status(401)
            .with_body("{\"code\":\"unauthorized\"}")
            .create_async()
            .await;

        let facade = facade_for(&server);
        let err = facade.latest(&selector("temperature")).await.unwrap_err();

        match err {
            QueryError::Status { status, body } => {
                assert_eq!(status, 401);
                assert!(body.contains("unauthorized"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
