//! Instant-query client for a Prometheus-compatible HTTP API.

use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::config::UpstreamConfig;
use crate::error::{MalformedResult, UpstreamError};

/// One entry of an instant-vector result.
///
/// Held as raw JSON: a malformed entry parses fine and only fails when its
/// label or value is read, so it cannot take the rest of the vector with it.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct QueryResult(serde_json::Value);

impl QueryResult {
    /// The entry as received, for logging.
    pub fn raw(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn label(&self, name: &str) -> Result<&str, MalformedResult> {
        let value = self
            .0
            .get("metric")
            .and_then(|metric| metric.get(name))
            .ok_or_else(|| MalformedResult::MissingLabel(name.to_owned()))?;

        value.as_str().ok_or_else(|| MalformedResult::LabelNotString {
            name: name.to_owned(),
            value: value.to_string(),
        })
    }

    /// The sample value from `[unix_timestamp, "value"]`. The engine
    /// stringifies numbers, including `NaN` and `+Inf`.
    pub fn scalar(&self) -> Result<f64, MalformedResult> {
        let sample = self
            .0
            .get("value")
            .and_then(|v| v.as_array())
            .and_then(|pair| pair.get(1))
            .ok_or(MalformedResult::MissingValue)?;

        match sample {
            serde_json::Value::String(s) => s
                .trim()
                .parse()
                .map_err(|_| MalformedResult::NotNumeric(s.clone())),
            serde_json::Value::Number(n) => n
                .as_f64()
                .ok_or_else(|| MalformedResult::NotNumeric(n.to_string())),
            other => Err(MalformedResult::NotNumeric(other.to_string())),
        }
    }
}

// ─── Wire envelope ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default, rename = "errorType")]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(default)]
    result: Option<Vec<QueryResult>>,
}

// ─── Client ──────────────────────────────────────────────────────

/// Issues instant queries against `{base_url}/api/v1/query`.
#[derive(Debug, Clone)]
pub struct TimeSeriesClient {
    client: Client,
    query_url: String,
}

impl TimeSeriesClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self, UpstreamError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            query_url: format!("{}/api/v1/query", config.base_url),
        })
    }

    /// Run `expression` and return the result vector. No retries.
    pub async fn query(&self, expression: &str) -> Result<Vec<QueryResult>, UpstreamError> {
        debug!(url = %self.query_url, "querying time-series engine");

        let response = self
            .client
            .get(&self.query_url)
            .query(&[("query", expression)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Status { status, body });
        }

        let bytes = response.bytes().await?;
        parse_response(&bytes)
    }
}

fn parse_response(bytes: &[u8]) -> Result<Vec<QueryResult>, UpstreamError> {
    let envelope: QueryResponse = serde_json::from_slice(bytes)
        .map_err(|e| UpstreamError::Payload(e.to_string()))?;

    if envelope.status != "success" {
        return Err(UpstreamError::Engine {
            error_type: envelope.error_type.unwrap_or_else(|| envelope.status.clone()),
            message: envelope.error.unwrap_or_default(),
        });
    }

    envelope
        .data
        .and_then(|data| data.result)
        .ok_or_else(|| UpstreamError::Payload("response has no data.result".into()))
}
