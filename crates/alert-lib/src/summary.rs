//! Alert summaries from an LLM chat-completions endpoint
//!
//! Enrichment is best effort: [`enrich`] never fails and never waits past
//! its timeout. Without an API key the [`DisabledSummarizer`] is used.

use crate::models::AlertEvent;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const SYSTEM_PROMPT: &str = "You are an expert in industrial IoT equipment monitoring.";

/// Reasons a summary could not be produced
#[derive(Debug, thiserror::Error)]
pub enum EnrichmentError {
    #[error("summary generation disabled")]
    Disabled,

    #[error("summary generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("summary transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("summary endpoint returned status {0}")]
    Status(u16),

    #[error("summary response contained no text")]
    EmptyResponse,
}

/// Produces a short human-readable annotation for an alert
#[async_trait]
pub trait SummaryGenerator: Send + Sync {
    async fn summarize(&self, alert: &AlertEvent) -> Result<String, EnrichmentError>;

    fn is_enabled(&self) -> bool {
        true
    }
}

/// Attach a summary to `alert` if one arrives within `timeout`
///
/// Any failure yields the alert unchanged.
pub async fn enrich(
    generator: &dyn SummaryGenerator,
    alert: &AlertEvent,
    timeout: Duration,
) -> (AlertEvent, Option<EnrichmentError>) {
    if !generator.is_enabled() {
        return (alert.clone(), Some(EnrichmentError::Disabled));
    }

    let result = match tokio::time::timeout(timeout, generator.summarize(alert)).await {
        Ok(result) => result,
        Err(_) => Err(EnrichmentError::Timeout(timeout)),
    };

    match result {
        Ok(summary) if !summary.trim().is_empty() => {
            (alert.with_summary(summary.trim()), None)
        }
        Ok(_) => (alert.clone(), Some(EnrichmentError::EmptyResponse)),
        Err(e) => {
            warn!(alert_id = %alert.id, error = %e, "Alert summary unavailable");
            (alert.clone(), Some(e))
        }
    }
}

/// Summarizer used when no LLM is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledSummarizer;

#[async_trait]
impl SummaryGenerator for DisabledSummarizer {
    async fn summarize(&self, _alert: &AlertEvent) -> Result<String, EnrichmentError> {
        Err(EnrichmentError::Disabled)
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// LLM endpoint settings
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_url")]
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_llm_url() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_llm_timeout_secs() -> u64 {
    10
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            url: default_llm_url(),
            api_key: None,
            model: default_llm_model(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// OpenAI-compatible chat-completions summarizer
pub struct LlmSummarizer {
    client: Client,
    url: String,
    api_key: String,
    model: String,
}

impl LlmSummarizer {
    pub fn new(
        url: String,
        api_key: String,
        model: String,
        timeout: Duration,
    ) -> Result<Self, EnrichmentError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url,
            api_key,
            model,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

/// Pick the summarizer for a configuration
pub fn from_config(config: &LlmConfig) -> Result<Box<dyn SummaryGenerator>, EnrichmentError> {
    match config.api_key.as_deref().filter(|key| !key.is_empty()) {
        Some(key) => Ok(Box::new(LlmSummarizer::new(
            config.url.clone(),
            key.to_string(),
            config.model.clone(),
            Duration::from_secs(config.timeout_secs),
        )?)),
        None => {
            debug!("No LLM API key configured, summaries disabled");
            Ok(Box::new(DisabledSummarizer))
        }
    }
}

/// User prompt describing the alert
fn build_prompt(alert: &AlertEvent) -> String {
    format!(
        "Analyze the following IoT sensor alert and summarize it concisely:\n\n\
         - Sensor ID: {}\n\
         - Alert level: {}\n\
         - Metric: {}\n\
         - Current value: {}\n\
         - Threshold: {}\n\n\
         In 1-2 sentences, explain the situation and recommend an action.",
        alert.sensor_id, alert.level, alert.metric, alert.value, alert.threshold
    )
}

#[async_trait]
impl SummaryGenerator for LlmSummarizer {
    async fn summarize(&self, alert: &AlertEvent) -> Result<String, EnrichmentError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: build_prompt(alert),
                },
            ],
            temperature: 0.3,
            max_tokens: 200,
        };

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(EnrichmentError::Status(response.status().as_u16()));
        }

        let body: ChatResponse = response.json().await?;
        body.choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or(EnrichmentError::EmptyResponse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AlertLevel;
    use chrono::DateTime;

    fn alert() -> AlertEvent {
        AlertEvent {
            id: "temp_critical_S1_1700000000".to_string(),
            timestamp: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            level: AlertLevel::Critical,
            rule: "temp_critical".to_string(),
            sensor_id: "S1".to_string(),
            metric: "temperature".to_string(),
            value: 55.3,
            threshold: 50.0,
            duration_secs: None,
            message: "Sensor S1 temperature above threshold: 55.3°C".to_string(),
            summary: None,
        }
    }

    struct SlowSummarizer;

    #[async_trait]
    impl SummaryGenerator for SlowSummarizer {
        async fn summarize(&self, _alert: &AlertEvent) -> Result<String, EnrichmentError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("too late".to_string())
        }
    }

    struct FixedSummarizer(&'static str);

    #[async_trait]
    impl SummaryGenerator for FixedSummarizer {
        async fn summarize(&self, _alert: &AlertEvent) -> Result<String, EnrichmentError> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn test_prompt_mentions_alert_fields() {
        let prompt = build_prompt(&alert());
        assert!(prompt.contains("S1"));
        assert!(prompt.contains("CRITICAL"));
        assert!(prompt.contains("55.3"));
        assert!(prompt.contains("50"));
    }

    #[test]
    fn test_from_config_without_key_is_disabled() {
        let summarizer = from_config(&LlmConfig::default()).unwrap();
        assert!(!summarizer.is_enabled());

        let summarizer = from_config(&LlmConfig {
            api_key: Some(String::new()),
            ..Default::default()
        })
        .unwrap();
        assert!(!summarizer.is_enabled());
    }

    #[tokio::test]
    async fn test_enrich_disabled_passes_alert_through() {
        let (enriched, error) = enrich(&DisabledSummarizer, &alert(), Duration::from_secs(1)).await;
        assert_eq!(enriched, alert());
        assert!(matches!(error, Some(EnrichmentError::Disabled)));
    }

    #[tokio::test]
    async fn test_enrich_attaches_trimmed_summary() {
        let (enriched, error) = enrich(
            &FixedSummarizer("  Overheating; inspect cooling.  "),
            &alert(),
            Duration::from_secs(1),
        )
        .await;

        assert!(error.is_none());
        assert_eq!(enriched.summary.as_deref(), Some("Overheating; inspect cooling."));
    }

    #[tokio::test]
    async fn test_enrich_blank_summary_ignored() {
        let (enriched, error) =
            enrich(&FixedSummarizer("   "), &alert(), Duration::from_secs(1)).await;
        assert!(enriched.summary.is_none());
        assert!(matches!(error, Some(EnrichmentError::EmptyResponse)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_enrich_times_out() {
        let (enriched, error) = enrich(&SlowSummarizer, &alert(), Duration::from_secs(10)).await;
        assert!(enriched.summary.is_none());
        assert!(matches!(error, Some(EnrichmentError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_llm_summarizer_against_mock_server() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer test-key")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "model": "gpt-4o-mini",
                "max_tokens": 200
            })))
            .with_status(200)
            .with_body(
                serde_json::json!({
                    "choices": [
                        {
                            "message": {
                                "role": "assistant",
                                "content": " Temperature is high. Check cooling. "
                            }
                        }
                    ]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let summarizer = LlmSummarizer::new(
            format!("{}/v1/chat/completions", server.url()),
            "test-key".to_string(),
            "gpt-4o-mini".to_string(),
            Duration::from_secs(5),
        )
        .unwrap();

        let summary = summarizer.summarize(&alert()).await.unwrap();
        assert_eq!(summary, "Temperature is high. Check cooling.");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_llm_summarizer_error_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(429)
            .create_async()
            .await;

        let summarizer = LlmSummarizer::new(
            format!("{}/v1/chat/completions", server.url()),
            "test-key".to_string(),
            "gpt-4o-mini".to_string(),
            Duration::from_secs(5),
        )
        .unwrap();

        assert!(matches!(
            summarizer.summarize(&alert()).await,
            Err(EnrichmentError::Status(429))
        ));
    }
}
