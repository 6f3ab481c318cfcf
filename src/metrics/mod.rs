pub mod registry;

pub use registry::MetricRegistry;

use crate::error::RegistryError;

// ─── Exposed schema ──────────────────────────────────────────────

/// Binary saturation decision per load balancer.
pub const SATURATION_METRIC: &str = "sonic_lb_saturated";
pub const SATURATION_HELP: &str = "SONIC saturation metric";
pub const SATURATION_LABELS: &[&str] = &["lb_name"];

/// ICMP round-trip time per probe target.
pub const LATENCY_METRIC: &str = "ping_latency_ms";
pub const LATENCY_HELP: &str = "Ping latency in milliseconds";
pub const LATENCY_LABELS: &[&str] = &["id", "name", "ip", "latitude", "longitude"];

/// Builds the registry the exporter serves: both gauges, plus process
/// metrics where the platform supports them.
pub fn exporter_registry() -> Result<MetricRegistry, RegistryError> {
    let registry = MetricRegistry::new();
    registry.register_gauge(SATURATION_METRIC, SATURATION_HELP, SATURATION_LABELS)?;
    registry.register_gauge(LATENCY_METRIC, LATENCY_HELP, LATENCY_LABELS)?;
    registry.register_process_collector()?;
    Ok(registry)
}
