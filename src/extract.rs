use anyhow::{Context, Result, anyhow};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use crate::config::Config;
use crate::data::ExtractedFields;

const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Client for the vision-model proxy that turns a price-tag photo into
/// structured fields.
pub struct ExtractionClient {
    client: Client,
    endpoint: Option<String>,
    max_attempts: u32,
    base_backoff: Duration,
}

impl ExtractionClient {
    pub fn new(endpoint: Option<String>, max_attempts: u32, base_backoff: Duration) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self { client, endpoint, max_attempts: max_attempts.max(1), base_backoff })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.extraction_url.clone(),
            config.extraction_max_attempts,
            Duration::from_millis(config.extraction_backoff_ms),
        )
    }

    /// Create a client with an explicit proxy URL and default retry policy.
    pub fn with_url(endpoint: String) -> Result<Self> {
        Self::new(Some(endpoint), 3, Duration::from_millis(500))
    }

    /// Create a client with no proxy configured; every extraction fails.
    pub fn without_endpoint() -> Result<Self> {
        Self::new(None, 1, Duration::ZERO)
    }

    pub fn with_retry(mut self, max_attempts: u32, base_backoff: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.base_backoff = base_backoff;
        self
    }

    /// Send the image to the proxy and parse the model's answer. Transport
    /// errors and non-success statuses are retried with exponential backoff;
    /// an unparseable answer is not.
    pub async fn extract(&self, image: &[u8], mime_type: &str) -> Result<ExtractedFields> {
        let url = self.endpoint.as_deref().ok_or_else(|| anyhow!("extraction endpoint not configured"))?;
        let body = serde_json::json!({
            "image": base64::encode(image),
            "mimeType": mime_type,
        });

        let mut backoff = self.base_backoff;
        let mut last_err = None;
        for attempt in 1..=self.max_attempts {
            match self.post_once(url, &body).await {
                Ok(text) => {
                    tracing::debug!(attempt, bytes = text.len(), "extraction response received");
                    return parse_extraction(&text);
                }
                Err(e) => {
                    tracing::warn!(attempt, max = self.max_attempts, %url, error = %e, "extraction attempt failed");
                    last_err = Some(e);
                }
            }
            if attempt < self.max_attempts {
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
        let err = last_err.unwrap_or_else(|| anyhow!("no extraction attempt made"));
        Err(err.context(format!("extraction failed after {} attempts", self.max_attempts)))
    }

    async fn post_once(&self, url: &str, body: &Value) -> Result<String> {
        let resp = self.client.post(url).json(body).send().await.context("extraction post failed")?;
        let resp = resp.error_for_status().context("extraction proxy returned an error status")?;
        resp.text().await.context("failed to read extraction response")
    }
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

#[derive(Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

/// Parse model output into fields. Accepts the bare object, the object inside
/// a markdown code fence or surrounding prose, or a raw `generateContent`
/// response whose first text part holds the object.
pub fn parse_extraction(text: &str) -> Result<ExtractedFields> {
    let start = text.find('{').ok_or_else(|| anyhow!("no JSON object in extraction response"))?;
    let end = text.rfind('}').filter(|end| *end > start).ok_or_else(|| anyhow!("unterminated JSON object"))?;
    let value: Value = serde_json::from_str(&text[start..=end]).context("invalid JSON in extraction response")?;

    if value.get("candidates").is_some() {
        let raw: GeminiResponse = serde_json::from_value(value).context("unexpected model response shape")?;
        let inner = raw
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().map(|p| p.text).find(|t| !t.trim().is_empty()))
            .ok_or_else(|| anyhow!("model response has no text"))?;
        return parse_extraction(&inner);
    }
    serde_json::from_value(value).context("extraction response is not an object")
}
