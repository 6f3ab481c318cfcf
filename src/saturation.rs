//! Load-balancer saturation: query shape and threshold decision.

use tracing::{debug, error, info, warn};

use crate::metrics::{MetricRegistry, SATURATION_METRIC};
use crate::timeseries::QueryResult;

/// Label carrying the load-balancer identity in query results.
pub const LB_LABEL: &str = "lb_name";

// ─── Query shape ─────────────────────────────────────────────────

/// The PromQL that yields one average queue wait (ms) per load balancer.
///
/// `lb_name` is the pod name with its last two dash segments removed,
/// via `label_replace(.., "(.*)-(.*)-(.*)$")`. Pods that do not match
/// that pattern come back without an `lb_name`.
#[derive(Debug, Clone, PartialEq)]
pub struct SaturationQuery {
    /// Regex matched against the `pod` label.
    pub pod_pattern: String,
    /// `irate` range, e.g. `5m`.
    pub window: String,
}

impl Default for SaturationQuery {
    fn default() -> Self {
        Self {
            pod_pattern: "triton-.*".into(),
            window: "5m".into(),
        }
    }
}

impl SaturationQuery {
    pub fn expression(&self) -> String {
        let lb = |series: &str| {
            format!(
                r#"label_replace(irate({series}{{pod=~"{pod}"}}[{window}]), "lb_name", "$1", "pod", "(.*)-(.*)-(.*)$")"#,
                pod = self.pod_pattern,
                window = self.window,
            )
        };
        format!(
            "max by (lb_name) (avg by (model, lb_name, version) ({wait} / (1000 * (1 + {served}))))",
            wait = lb("nv_inference_queue_duration_us"),
            served = lb("nv_inference_request_success"),
        )
    }
}

// ─── Evaluation ──────────────────────────────────────────────────

/// Counts from one evaluation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvaluationSummary {
    pub saturated: usize,
    pub unsaturated: usize,
    pub rejected: usize,
}

/// Strictly greater: a value equal to the threshold is not saturated.
pub fn is_saturated(value: f64, threshold: f64) -> bool {
    value > threshold
}

/// Write a 0/1 saturation gauge for every well-formed result.
///
/// Malformed entries are logged and skipped. Load balancers missing from
/// `results` are left untouched.
pub fn evaluate(
    results: &[QueryResult],
    threshold: f64,
    registry: &MetricRegistry,
) -> EvaluationSummary {
    let mut summary = EvaluationSummary::default();

    for result in results {
        let entry = result
            .label(LB_LABEL)
            .and_then(|lb| result.scalar().map(|value| (lb, value)));
        let (lb_name, value) = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, entry = %result.raw(), "skipping query result");
                summary.rejected += 1;
                continue;
            }
        };

        let saturated = is_saturated(value, threshold);
        let flag = if saturated { 1.0 } else { 0.0 };
        let previous = match registry.set_gauge(SATURATION_METRIC, &[lb_name], flag) {
            Ok(previous) => previous,
            Err(e) => {
                error!(error = %e, lb_name, "failed to record saturation");
                summary.rejected += 1;
                continue;
            }
        };

        if previous.is_some_and(|p| p != flag) {
            info!(lb_name, value, saturated, "saturation changed");
        } else {
            debug!(lb_name, value, saturated, "saturation evaluated");
        }
        if saturated {
            summary.saturated += 1;
        } else {
            summary.unsaturated += 1;
        }
    }

    summary
}
