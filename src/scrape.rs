//! One scrape: query → saturation → latency → render.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::config::ExporterConfig;
use crate::error::{RenderError, UpstreamError};
use crate::latency::{LatencyProbe, Pinger, ProbeSummary, ProbeTarget};
use crate::metrics::{MetricRegistry, LATENCY_METRIC};
use crate::saturation::{self, EvaluationSummary};
use crate::timeseries::TimeSeriesClient;

/// Runs the full pipeline for every `/metrics` request.
pub struct Scraper {
    client: TimeSeriesClient,
    expression: String,
    threshold: f64,
    probe: LatencyProbe,
    targets: Vec<ProbeTarget>,
    registry: Arc<MetricRegistry>,
}

/// What happened during one scrape, for logging.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScrapeReport {
    /// `None` when the upstream query failed and saturation was not touched.
    pub saturation: Option<EvaluationSummary>,
    pub latency: ProbeSummary,
}

impl Scraper {
    pub fn new(
        config: &ExporterConfig,
        pinger: Arc<dyn Pinger>,
        registry: Arc<MetricRegistry>,
    ) -> Result<Self, UpstreamError> {
        Ok(Self {
            client: TimeSeriesClient::new(&config.upstream)?,
            expression: config.saturation.query.expression(),
            threshold: config.saturation.threshold,
            probe: LatencyProbe::new(pinger, &config.probe),
            targets: config.probe.targets.clone(),
            registry,
        })
    }

    #[cfg(test)]
    pub fn registry(&self) -> &MetricRegistry {
        &self.registry
    }

    /// Longest a scrape can spend probing the roster.
    pub fn probe_worst_case(&self) -> Duration {
        self.probe.worst_case(self.targets.len())
    }

    /// Refresh every gauge that can be refreshed and render the registry.
    ///
    /// Upstream and probe failures leave the affected gauges stale; only a
    /// render failure is returned.
    pub async fn scrape(&self) -> Result<String, RenderError> {
        let started = Instant::now();
        let report = self.refresh().await;

        info!(
            upstream_ok = report.saturation.is_some(),
            saturated = report.saturation.map_or(0, |s| s.saturated),
            unsaturated = report.saturation.map_or(0, |s| s.unsaturated),
            rejected = report.saturation.map_or(0, |s| s.rejected),
            probes_ok = report.latency.succeeded,
            probes_failed = report.latency.failed,
            latency_series = self.registry.series_count(LATENCY_METRIC),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "scrape complete"
        );

        self.registry.render()
    }

    /// Update the registry without rendering.
    pub async fn refresh(&self) -> ScrapeReport {
        let saturation = match self.client.query(&self.expression).await {
            Ok(results) => Some(saturation::evaluate(
                &results,
                self.threshold,
                &self.registry,
            )),
            Err(e) => {
                warn!(error = %e, "saturation query failed; keeping previous values");
                None
            }
        };

        let latency = self.probe.probe_all(&self.targets, &self.registry).await;

        ScrapeReport {
            saturation,
            latency,
        }
    }
}
