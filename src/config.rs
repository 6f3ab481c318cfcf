//! Startup configuration.
//!
//! Network endpoints and timeouts can be overridden from the environment.
//! The saturation threshold and the probe roster are compiled in.

use std::net::{Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::latency::ProbeTarget;
use crate::saturation::SaturationQuery;

// ─── Defaults ────────────────────────────────────────────────────

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8002";
pub const DEFAULT_PROMETHEUS_URL: &str =
    "http://prometheus-service.cms.geddes.rcac.purdue.edu:8080";
pub const DEFAULT_UPSTREAM_TIMEOUT_SECS: f64 = 10.0;

/// Average queue wait in ms above which a load balancer counts as saturated.
pub const DEFAULT_SATURATION_THRESHOLD: f64 = 20.0;

pub const DEFAULT_PROBE_TIMEOUT_SECS: f64 = 5.0;

// ─── Types ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ExporterConfig {
    pub listen_addr: SocketAddr,
    pub upstream: UpstreamConfig,
    pub saturation: SaturationConfig,
    pub probe: ProbeConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Base URL of the query engine, without the `/api/v1/query` suffix.
    pub base_url: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SaturationConfig {
    pub threshold: f64,
    pub query: SaturationQuery,
}

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub timeout: Duration,
    /// Maximum number of probes in flight at once.
    pub concurrency: usize,
    pub targets: Vec<ProbeTarget>,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Filter used when `RUST_LOG` is unset.
    pub level: String,
    pub json: bool,
}

// ─── Loading ─────────────────────────────────────────────────────

impl ExporterConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary key lookup. Unset keys take their
    /// defaults; set-but-invalid keys are an error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let targets = default_roster();

        let listen_addr = parse_or(&lookup, "EXPORTER_LISTEN_ADDR", DEFAULT_LISTEN_ADDR)?;
        let base_url = lookup("PROMETHEUS_URL")
            .unwrap_or_else(|| DEFAULT_PROMETHEUS_URL.to_string());
        let upstream_timeout = seconds_or(
            &lookup,
            "UPSTREAM_TIMEOUT_SECS",
            DEFAULT_UPSTREAM_TIMEOUT_SECS,
        )?;
        let probe_timeout =
            seconds_or(&lookup, "PROBE_TIMEOUT_SECS", DEFAULT_PROBE_TIMEOUT_SECS)?;

        let concurrency: usize =
            parse_or(&lookup, "PROBE_CONCURRENCY", &targets.len().to_string())?;
        if concurrency == 0 {
            return Err(ConfigError::Invalid {
                key: "PROBE_CONCURRENCY",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }

        Ok(Self {
            listen_addr,
            upstream: UpstreamConfig {
                base_url: base_url.trim_end_matches('/').to_string(),
                timeout: upstream_timeout,
            },
            saturation: SaturationConfig {
                threshold: DEFAULT_SATURATION_THRESHOLD,
                query: SaturationQuery::default(),
            },
            probe: ProbeConfig {
                timeout: probe_timeout,
                concurrency,
                targets,
            },
            log: LogConfig {
                level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
                json: lookup("JSON_LOGS")
                    .map(|v| v == "true" || v == "1")
                    .unwrap_or(false),
            },
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: &str) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = lookup(key).unwrap_or_else(|| default.to_string());
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        value: raw.clone(),
        reason: e.to_string(),
    })
}

fn seconds_or<F>(lookup: &F, key: &'static str, default: f64) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let secs: f64 = parse_or(lookup, key, &default.to_string())?;
    Duration::try_from_secs_f64(secs).map_err(|e| ConfigError::Invalid {
        key,
        value: secs.to_string(),
        reason: e.to_string(),
    })
}

// ─── Probe roster ────────────────────────────────────────────────

/// The fixed set of sites whose latency is reported.
pub fn default_roster() -> Vec<ProbeTarget> {
    vec![
        ProbeTarget::new("T2_US_Purdue", Ipv4Addr::new(128, 211, 143, 9), 40.4237, -86.9212),
        ProbeTarget::new("CERN LXPLUS", Ipv4Addr::new(128, 142, 208, 134), 46.2330, 6.0557),
        ProbeTarget::new("T1_US_FNAL", Ipv4Addr::new(131, 225, 189, 73), 41.8481, -88.2584),
        ProbeTarget::new("T2_US_Nebraska", Ipv4Addr::new(129, 93, 239, 170), 40.8202, -96.7005),
        ProbeTarget::new("T2_US_Wisconsin", Ipv4Addr::new(144, 92, 180, 76), 43.0766, -89.4125),
        ProbeTarget::new("T2_US_UCSD", Ipv4Addr::new(169, 228, 130, 105), 32.8812, -117.2344),
        ProbeTarget::new("T2_US_Caltech", Ipv4Addr::new(198, 32, 43, 67), 34.1377, -118.1253),
        // www.phys.ufl.edu
        ProbeTarget::new("T2_US_Florida", Ipv4Addr::new(128, 227, 64, 205), 29.6465, -82.3533),
        ProbeTarget::new("T2_US_MIT", Ipv4Addr::new(18, 12, 1, 172), 42.3601, -71.0942),
        // xrootd
        ProbeTarget::new("T2_US_Vanderbilt", Ipv4Addr::new(129, 59, 197, 94), 36.1447, -86.8027),
        ProbeTarget::new("NERSC", Ipv4Addr::new(128, 55, 126, 10), 37.875750, -122.252877),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ExporterConfig::from_lookup(lookup_from(&[])).unwrap();

        assert_eq!(config.listen_addr, "0.0.0.0:8002".parse().unwrap());
        assert_eq!(config.upstream.base_url, DEFAULT_PROMETHEUS_URL);
        assert_eq!(config.saturation.threshold, 20.0);
        assert_eq!(config.probe.timeout, Duration::from_secs(5));
        assert_eq!(config.probe.targets.len(), 11);
        assert_eq!(config.probe.concurrency, 11);
        assert_eq!(config.log.level, "info");
        assert!(!config.log.json);
    }

    #[test]
    fn test_overrides() {
        let config = ExporterConfig::from_lookup(lookup_from(&[
            ("EXPORTER_LISTEN_ADDR", "127.0.0.1:9100"),
            ("PROMETHEUS_URL", "http://localhost:9090/"),
            ("PROBE_TIMEOUT_SECS", "1.5"),
            ("PROBE_CONCURRENCY", "4"),
            ("JSON_LOGS", "1"),
        ]))
        .unwrap();

        assert_eq!(config.listen_addr.port(), 9100);
        assert_eq!(config.upstream.base_url, "http://localhost:9090");
        assert_eq!(config.probe.timeout, Duration::from_millis(1500));
        assert_eq!(config.probe.concurrency, 4);
        assert!(config.log.json);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = ExporterConfig::from_lookup(lookup_from(&[("PROBE_TIMEOUT_SECS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "PROBE_TIMEOUT_SECS", .. }));

        let err = ExporterConfig::from_lookup(lookup_from(&[("PROBE_TIMEOUT_SECS", "-1")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "PROBE_TIMEOUT_SECS", .. }));

        let err = ExporterConfig::from_lookup(lookup_from(&[("PROBE_CONCURRENCY", "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "PROBE_CONCURRENCY", .. }));
    }

    #[test]
    fn test_roster_identities_unique() {
        let roster = default_roster();
        let mut names: Vec<_> = roster.iter().map(|t| t.identity.as_str()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), roster.len());
    }
}
