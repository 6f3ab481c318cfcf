//! ICMP latency probing of the site roster.
//!
//! Every target is probed independently with its own timeout. A failed probe
//! writes nothing, so the last successful latency keeps being reported.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use surge_ping::{Client, Config, PingIdentifier, PingSequence, SurgeError};
use tracing::{debug, error, info};

use crate::config::ProbeConfig;
use crate::error::ProbeFailure;
use crate::metrics::{MetricRegistry, LATENCY_METRIC};

/// Echo payload; same size as the default `ping` payload.
const PAYLOAD: [u8; 56] = [0; 56];

// ─── Targets ─────────────────────────────────────────────────────

/// A host whose round-trip time is published.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeTarget {
    /// Used for both the `id` and `name` labels.
    pub identity: String,
    pub address: Ipv4Addr,
    pub latitude: f64,
    pub longitude: f64,
}

impl ProbeTarget {
    pub fn new(identity: impl Into<String>, address: Ipv4Addr, latitude: f64, longitude: f64) -> Self {
        Self {
            identity: identity.into(),
            address,
            latitude,
            longitude,
        }
    }

    /// Label values in `id, name, ip, latitude, longitude` order.
    pub fn label_values(&self) -> [String; 5] {
        [
            self.identity.clone(),
            self.identity.clone(),
            self.address.to_string(),
            coordinate_label(self.latitude),
            coordinate_label(self.longitude),
        ]
    }
}

/// Shortest round-trip decimal, but whole degrees keep a `.0` so `40.0`
/// stays `40.0` rather than becoming `40`.
fn coordinate_label(degrees: f64) -> String {
    if degrees.is_finite() && degrees.fract() == 0.0 {
        format!("{degrees:.1}")
    } else {
        degrees.to_string()
    }
}

// ─── Pinger ──────────────────────────────────────────────────────

/// One round-trip measurement against one address.
#[async_trait]
pub trait Pinger: Send + Sync {
    async fn ping(&self, address: Ipv4Addr, timeout: Duration) -> Result<Duration, ProbeFailure>;
}

/// ICMP echo over a shared raw/datagram socket.
pub struct IcmpPinger {
    client: Client,
}

impl IcmpPinger {
    /// Opens the ICMPv4 socket. Needs `CAP_NET_RAW` or an unprivileged
    /// `net.ipv4.ping_group_range` that covers the process.
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            client: Client::new(&Config::default())?,
        })
    }
}

#[async_trait]
impl Pinger for IcmpPinger {
    async fn ping(&self, address: Ipv4Addr, timeout: Duration) -> Result<Duration, ProbeFailure> {
        let mut pinger = self
            .client
            .pinger(IpAddr::V4(address), PingIdentifier(rand::random()))
            .await;
        pinger.timeout(timeout);

        match pinger.ping(PingSequence(0), &PAYLOAD).await {
            Ok((_packet, rtt)) => Ok(rtt),
            Err(SurgeError::Timeout { .. }) => Err(ProbeFailure::Timeout { address, timeout }),
            Err(e) => Err(ProbeFailure::Unreachable {
                address,
                reason: e.to_string(),
            }),
        }
    }
}

// ─── Probe batch ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeSummary {
    pub succeeded: usize,
    pub failed: usize,
}

/// Probes a roster with bounded parallelism and records successes.
///
/// A batch takes about `ceil(N / concurrency) × timeout` in the worst case;
/// with `concurrency == 1` that is `N × timeout`.
pub struct LatencyProbe {
    pinger: Arc<dyn Pinger>,
    timeout: Duration,
    concurrency: usize,
}

impl LatencyProbe {
    pub fn new(pinger: Arc<dyn Pinger>, config: &ProbeConfig) -> Self {
        Self {
            pinger,
            timeout: config.timeout,
            concurrency: config.concurrency.max(1),
        }
    }

    /// Upper bound on how long one `probe_all` over `targets` can take.
    pub fn worst_case(&self, targets: usize) -> Duration {
        let rounds = targets.div_ceil(self.concurrency) as u32;
        self.timeout * rounds
    }

    pub async fn probe_all(&self, targets: &[ProbeTarget], registry: &MetricRegistry) -> ProbeSummary {
        // Built up front: a lazy `map` closure yields a future that is not
        // general over lifetimes, which the axum handler bound rejects.
        let attempts: Vec<_> = targets
            .iter()
            .map(|target| self.probe_one(target, registry))
            .collect();
        let outcomes: Vec<bool> = stream::iter(attempts)
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let succeeded = outcomes.iter().filter(|ok| **ok).count();
        ProbeSummary {
            succeeded,
            failed: outcomes.len() - succeeded,
        }
    }

    async fn probe_one(&self, target: &ProbeTarget, registry: &MetricRegistry) -> bool {
        // The outer timeout also bounds pingers that ignore their own.
        let attempt = self.pinger.ping(target.address, self.timeout);
        let rtt = match tokio::time::timeout(self.timeout, attempt).await {
            Ok(Ok(rtt)) => rtt,
            Ok(Err(e)) => {
                debug!(site = %target.identity, error = %e, "probe failed");
                return false;
            }
            Err(_) => {
                debug!(site = %target.identity, ip = %target.address, "probe timed out");
                return false;
            }
        };

        let latency_ms = rtt.as_secs_f64() * 1000.0;
        let labels = target.label_values();
        let labels: Vec<&str> = labels.iter().map(String::as_str).collect();

        match registry.set_gauge(LATENCY_METRIC, &labels, latency_ms) {
            Ok(_) => {
                info!(site = %target.identity, ip = %target.address, latency_ms, "probe ok");
                true
            }
            Err(e) => {
                error!(site = %target.identity, error = %e, "failed to record latency");
                false
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::metrics::exporter_registry;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// What the stub does for one address.
    #[derive(Debug, Clone, Copy)]
    pub enum Reply {
        After(Duration),
        Unreachable,
        Hang,
    }

    /// Scriptable pinger; unknown addresses are unreachable.
    #[derive(Default)]
    pub struct StubPinger {
        replies: Mutex<HashMap<Ipv4Addr, Reply>>,
        in_flight: AtomicUsize,
        peak_in_flight: AtomicUsize,
    }

    impl StubPinger {
        pub fn set(&self, address: Ipv4Addr, reply: Reply) {
            self.replies.lock().insert(address, reply);
        }

        pub fn peak_in_flight(&self) -> usize {
            self.peak_in_flight.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Pinger for StubPinger {
        async fn ping(&self, address: Ipv4Addr, timeout: Duration) -> Result<Duration, ProbeFailure> {
            let reply = self
                .replies
                .lock()
                .get(&address)
                .copied()
                .unwrap_or(Reply::Unreachable);

            let _guard = InFlight::enter(&self.in_flight, &self.peak_in_flight);

            match reply {
                Reply::After(rtt) => {
                    tokio::time::sleep(rtt).await;
                    Ok(rtt)
                }
                Reply::Unreachable => Err(ProbeFailure::Unreachable {
                    address,
                    reason: "host unreachable".into(),
                }),
                Reply::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(ProbeFailure::Timeout { address, timeout })
                }
            }
        }
    }

    /// Decrements on drop, so probes cancelled by the timeout are counted out.
    struct InFlight<'a>(&'a AtomicUsize);

    impl<'a> InFlight<'a> {
        fn enter(counter: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
            let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            Self(counter)
        }
    }

    impl Drop for InFlight<'_> {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    pub fn target(identity: &str, last_octet: u8) -> ProbeTarget {
        ProbeTarget::new(identity, Ipv4Addr::new(198, 51, 100, last_octet), 40.4237, -86.9212)
    }

    fn probe(pinger: Arc<StubPinger>, concurrency: usize) -> LatencyProbe {
        LatencyProbe::new(
            pinger,
            &ProbeConfig {
                timeout: Duration::from_secs(5),
                concurrency,
                targets: Vec::new(),
            },
        )
    }

    fn latency(registry: &MetricRegistry, target: &ProbeTarget) -> Option<f64> {
        let labels = target.label_values();
        let labels: Vec<&str> = labels.iter().map(String::as_str).collect();
        registry.gauge_value(LATENCY_METRIC, &labels)
    }

    #[test]
    fn test_label_values() {
        let t = ProbeTarget::new("NERSC", Ipv4Addr::new(128, 55, 126, 10), 37.875750, -122.252877);
        assert_eq!(
            t.label_values(),
            ["NERSC", "NERSC", "128.55.126.10", "37.87575", "-122.252877"].map(String::from)
        );
    }

    #[test]
    fn test_whole_degree_coordinates_keep_decimal() {
        let t = ProbeTarget::new("grid", Ipv4Addr::new(10, 0, 0, 1), 40.0, -86.0);
        let labels = t.label_values();
        assert_eq!(labels[3], "40.0");
        assert_eq!(labels[4], "-86.0");
        assert_eq!(coordinate_label(0.0), "0.0");
        assert_eq!(coordinate_label(-122.252877), "-122.252877");
    }

    #[test]
    fn test_worst_case_bound() {
        let pinger = Arc::new(StubPinger::default());
        assert_eq!(probe(pinger.clone(), 1).worst_case(11), Duration::from_secs(55));
        assert_eq!(probe(pinger.clone(), 4).worst_case(11), Duration::from_secs(15));
        assert_eq!(probe(pinger, 11).worst_case(11), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_records_milliseconds() {
        let pinger = Arc::new(StubPinger::default());
        let x = target("X", 7);
        pinger.set(x.address, Reply::After(Duration::from_micros(12_300)));
        let registry = exporter_registry().unwrap();

        let summary = probe(pinger, 4).probe_all(&[x.clone()], &registry).await;

        assert_eq!(summary, ProbeSummary { succeeded: 1, failed: 0 });
        let ms = latency(&registry, &x).unwrap();
        assert!((ms - 12.3).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_creates_no_entry() {
        let pinger = Arc::new(StubPinger::default());
        let slow = ProbeTarget::new("slow", Ipv4Addr::new(198, 51, 100, 1), 0.0, 0.0);
        pinger.set(slow.address, Reply::Hang);
        let registry = exporter_registry().unwrap();

        let summary = probe(pinger, 4).probe_all(&[slow.clone()], &registry).await;

        assert_eq!(summary.failed, 1);
        assert_eq!(latency(&registry, &slow), None);
        assert!(!registry.render().unwrap().contains("198.51.100.1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_keeps_last_good_value() {
        let pinger = Arc::new(StubPinger::default());
        let x = target("X", 7);
        let y = target("Y", 8);
        pinger.set(x.address, Reply::After(Duration::from_micros(12_300)));
        pinger.set(y.address, Reply::After(Duration::from_millis(40)));
        let registry = exporter_registry().unwrap();
        let probe = probe(pinger.clone(), 4);
        let roster = [x.clone(), y.clone()];

        probe.probe_all(&roster, &registry).await;
        pinger.set(x.address, Reply::Hang);
        pinger.set(y.address, Reply::After(Duration::from_millis(41)));
        let summary = probe.probe_all(&roster, &registry).await;

        assert_eq!(summary, ProbeSummary { succeeded: 1, failed: 1 });
        assert!((latency(&registry, &x).unwrap() - 12.3).abs() < 1e-9);
        assert!((latency(&registry, &y).unwrap() - 41.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_hung_target_costs_one_timeout() {
        let pinger = Arc::new(StubPinger::default());
        let roster: Vec<_> = (1..=11).map(|i| target(&format!("t{i}"), i)).collect();
        for t in &roster {
            pinger.set(t.address, Reply::After(Duration::from_millis(20)));
        }
        pinger.set(roster[0].address, Reply::Hang);
        let registry = exporter_registry().unwrap();

        let started = tokio::time::Instant::now();
        let summary = probe(pinger, 11).probe_all(&roster, &registry).await;
        let elapsed = started.elapsed();

        assert_eq!(summary, ProbeSummary { succeeded: 10, failed: 1 });
        assert!(elapsed >= Duration::from_secs(5));
        assert!(elapsed < Duration::from_secs(6));
        assert_eq!(registry.series_count(LATENCY_METRIC), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_batch_is_bounded_by_n_timeouts() {
        let pinger = Arc::new(StubPinger::default());
        let roster: Vec<_> = (1..=3).map(|i| target(&format!("t{i}"), i)).collect();
        for t in &roster {
            pinger.set(t.address, Reply::Hang);
        }
        let registry = exporter_registry().unwrap();
        let probe = probe(pinger.clone(), 1);

        let started = tokio::time::Instant::now();
        probe.probe_all(&roster, &registry).await;

        let elapsed = started.elapsed();
        assert!(elapsed >= probe.worst_case(roster.len()));
        assert!(elapsed < probe.worst_case(roster.len()) + Duration::from_secs(1));
        assert_eq!(pinger.peak_in_flight(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_runs_on_spawned_task() {
        let pinger = Arc::new(StubPinger::default());
        let x = target("X", 7);
        pinger.set(x.address, Reply::After(Duration::from_millis(3)));
        let registry = Arc::new(exporter_registry().unwrap());
        let probe = Arc::new(probe(pinger, 4));

        let task = {
            let registry = registry.clone();
            let roster = vec![x.clone()];
            tokio::spawn(async move { probe.probe_all(&roster, &registry).await })
        };

        assert_eq!(task.await.unwrap().succeeded, 1);
        assert!(latency(&registry, &x).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let pinger = Arc::new(StubPinger::default());
        let roster: Vec<_> = (1..=9).map(|i| target(&format!("t{i}"), i)).collect();
        for t in &roster {
            pinger.set(t.address, Reply::After(Duration::from_millis(100)));
        }
        let registry = exporter_registry().unwrap();

        let summary = probe(pinger.clone(), 3).probe_all(&roster, &registry).await;

        assert_eq!(summary.succeeded, 9);
        assert_eq!(pinger.peak_in_flight(), 3);
    }
}
