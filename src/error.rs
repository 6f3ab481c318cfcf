//! Error taxonomy for the scrape pipeline.
//!
//! Only [`RenderError`] ever reaches the HTTP response. Everything else is
//! logged at the component boundary and absorbed.

use std::net::Ipv4Addr;
use std::time::Duration;

/// Talking to the time-series engine failed; the saturation update for this
/// scrape is skipped.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("request to query engine failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("query engine returned HTTP {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("query engine reported {error_type}: {message}")]
    Engine { error_type: String, message: String },

    #[error("malformed query response: {0}")]
    Payload(String),
}

/// A single result entry lacked an expected field; only that entry is skipped.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MalformedResult {
    #[error("result has no `{0}` label")]
    MissingLabel(String),

    #[error("result label `{name}` is not a string: {value}")]
    LabelNotString { name: String, value: String },

    #[error("result has no value pair")]
    MissingValue,

    #[error("result value {0:?} is not a number")]
    NotNumeric(String),
}

/// A latency probe did not produce a round-trip time.
#[derive(Debug, thiserror::Error)]
pub enum ProbeFailure {
    #[error("no reply from {address} within {timeout:?}")]
    Timeout { address: Ipv4Addr, timeout: Duration },

    #[error("{address} unreachable: {reason}")]
    Unreachable { address: Ipv4Addr, reason: String },
}

/// Misuse of the registry: unknown metric or wrong label arity.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("metric `{0}` is not registered")]
    UnknownMetric(String),

    #[error("metric `{metric}` expects {expected} label values, got {got}")]
    LabelArity {
        metric: String,
        expected: usize,
        got: usize,
    },

    #[error(transparent)]
    Prometheus(#[from] prometheus::Error),
}

/// Serialising the registry failed. The only error surfaced as a 5xx.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("failed to encode metrics: {0}")]
    Encode(#[from] prometheus::Error),

    #[error("encoded metrics are not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}
