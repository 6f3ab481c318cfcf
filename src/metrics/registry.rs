use std::collections::HashMap;

use parking_lot::Mutex;
use prometheus::core::Collector;
use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};

use crate::error::{RegistryError, RenderError};

/// Content type of [`MetricRegistry::render`] output.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

// ─── Public types ────────────────────────────────────────────────

/// Thread-safe store of labeled gauges.
///
/// The scrape pipeline calls `set_gauge()`, the `/metrics` handler calls
/// `render()`. Both go through one lock, so a render never sees a write
/// half-applied. Label tuples are never removed: a series that stops being
/// written keeps reporting its last value.
pub struct MetricRegistry {
    inner: Mutex<Inner>,
}

// ─── Internal state ──────────────────────────────────────────────

struct Inner {
    registry: Registry,
    gauges: HashMap<String, LabeledGauge>,
}

struct LabeledGauge {
    vec: GaugeVec,
    label_names: Vec<String>,
}

// ─── MetricRegistry impl ─────────────────────────────────────────

impl MetricRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                registry: Registry::new(),
                gauges: HashMap::new(),
            }),
        }
    }

    /// Declare a gauge family. Must happen before any `set_gauge` on it.
    pub fn register_gauge(
        &self,
        name: &str,
        help: &str,
        label_names: &[&str],
    ) -> Result<(), RegistryError> {
        let vec = GaugeVec::new(Opts::new(name, help), label_names)?;

        let mut inner = self.inner.lock();
        inner.registry.register(Box::new(vec.clone()))?;
        inner.gauges.insert(
            name.to_owned(),
            LabeledGauge {
                vec,
                label_names: label_names.iter().map(|s| s.to_string()).collect(),
            },
        );
        Ok(())
    }

    /// Register the `process_*` collector (Linux only; a no-op elsewhere).
    pub fn register_process_collector(&self) -> Result<(), RegistryError> {
        #[cfg(target_os = "linux")]
        {
            use prometheus::process_collector::ProcessCollector;
            self.inner
                .lock()
                .registry
                .register(Box::new(ProcessCollector::for_self()))?;
        }
        Ok(())
    }

    /// Set one series, creating it on first write and overwriting in place
    /// afterwards. Returns the value it replaced, `None` on first write.
    pub fn set_gauge(
        &self,
        name: &str,
        label_values: &[&str],
        value: f64,
    ) -> Result<Option<f64>, RegistryError> {
        let inner = self.inner.lock();
        let gauge = inner.lookup(name, label_values.len())?;
        let previous = gauge.value(label_values);
        gauge.vec.get_metric_with_label_values(label_values)?.set(value);
        Ok(previous)
    }

    /// Current value of one series, or `None` if it has never been set.
    pub fn gauge_value(&self, name: &str, label_values: &[&str]) -> Option<f64> {
        let inner = self.inner.lock();
        let gauge = inner.lookup(name, label_values.len()).ok()?;
        gauge.value(label_values)
    }

    /// Number of distinct label tuples ever set for `name`.
    pub fn series_count(&self, name: &str) -> usize {
        self.inner
            .lock()
            .gauges
            .get(name)
            .map_or(0, LabeledGauge::series)
    }

    /// Serialise every family in the Prometheus text exposition format.
    pub fn render(&self) -> Result<String, RenderError> {
        let families = self.inner.lock().registry.gather();

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Internal impls ──────────────────────────────────────────────

// Reads collect only the one `GaugeVec`, never the whole registry, so the
// process collector stays out of the write path.
impl LabeledGauge {
    /// Looks the series up in a snapshot so that asking never creates it.
    fn value(&self, label_values: &[&str]) -> Option<f64> {
        let wanted: HashMap<&str, &str> = self
            .label_names
            .iter()
            .map(String::as_str)
            .zip(label_values.iter().copied())
            .collect();

        let families = self.vec.collect();
        let value = families
            .iter()
            .flat_map(|family| family.get_metric())
            .find(|metric| {
                let labels = metric.get_label();
                labels.len() == wanted.len()
                    && labels
                        .iter()
                        .all(|pair| wanted.get(pair.get_name()) == Some(&pair.get_value()))
            })
            .map(|metric| metric.get_gauge().get_value());
        value
    }

    fn series(&self) -> usize {
        self.vec
            .collect()
            .iter()
            .map(|family| family.get_metric().len())
            .sum()
    }
}

impl Inner {
    fn lookup(&self, name: &str, arity: usize) -> Result<&LabeledGauge, RegistryError> {
        let gauge = self
            .gauges
            .get(name)
            .ok_or_else(|| RegistryError::UnknownMetric(name.to_owned()))?;

        if gauge.label_names.len() != arity {
            return Err(RegistryError::LabelArity {
                metric: name.to_owned(),
                expected: gauge.label_names.len(),
                got: arity,
            });
        }
        Ok(gauge)
    }
}
