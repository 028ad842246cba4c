use std::sync::atomic::{AtomicU64, Ordering};

use prometheus::{
    Encoder, Gauge, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

// ─── Instrument names ────────────────────────────────────────────

pub const REQUESTS_TOTAL: &str = "http_requests_total";
pub const REQUESTS_PER_SECOND: &str = "http_requests_per_second";
pub const REQUEST_DURATION: &str = "http_request_duration_seconds";

// ─── Public types ────────────────────────────────────────────────

/// Process-wide request instruments.
///
/// Built once in `main` and shared behind an `Arc`: the instrumentation
/// middleware writes the counter and histogram, the rate estimator writes
/// the gauge, and the exposition endpoint reads everything. Every update is
/// either an atomic or goes through the `prometheus` crate's internal
/// synchronisation, so callers never lock.
pub struct MetricsCollector {
    registry: Registry,
    requests_total: IntCounterVec,
    requests_per_second: Gauge,
    request_duration: HistogramVec,

    /// Label-free count of every request that entered the middleware.
    /// Sampled (never reset) by the rate estimator.
    raw_requests: AtomicU64,
}

// ─── MetricsCollector impl ───────────────────────────────────────

impl MetricsCollector {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new(REQUESTS_TOTAL, "Total number of HTTP requests"),
            &["path", "method", "status"],
        )?;
        let requests_per_second =
            Gauge::new(REQUESTS_PER_SECOND, "Current queries per second")?;
        let request_duration = HistogramVec::new(
            HistogramOpts::new(REQUEST_DURATION, "HTTP request duration in seconds")
                .buckets(prometheus::DEFAULT_BUCKETS.to_vec()),
            &["path", "method"],
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(requests_per_second.clone()))?;
        registry.register(Box::new(request_duration.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            requests_per_second,
            request_duration,
            raw_requests: AtomicU64::new(0),
        })
    }

    /// Bump the raw counter. Called once per request, before the handler runs.
    pub fn count_request(&self) {
        self.raw_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Current value of the raw counter.
    pub fn request_count(&self) -> u64 {
        self.raw_requests.load(Ordering::Relaxed)
    }

    pub fn increment_request(&self, path: &str, method: &str, status: &str) {
        self.requests_total
            .with_label_values(&[path, method, status])
            .inc();
    }

    pub fn set_rate(&self, value: f64) {
        self.requests_per_second.set(value);
    }

    pub fn observe_duration(&self, path: &str, method: &str, seconds: f64) {
        self.request_duration
            .with_label_values(&[path, method])
            .observe(seconds);
    }

    /// Serialise every instrument in the Prometheus text format.
    pub fn render(&self) -> Result<Vec<u8>, prometheus::Error> {
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&families, &mut buffer)?;
        Ok(buffer)
    }
}

// ─── Read-back, for tests ────────────────────────────────────────

#[cfg(test)]
impl MetricsCollector {
    pub fn rate(&self) -> f64 {
        self.requests_per_second.get()
    }

    /// Value of `http_requests_total` for one label set.
    pub fn requests_for(&self, path: &str, method: &str, status: &str) -> u64 {
        self.requests_total
            .with_label_values(&[path, method, status])
            .get()
    }

    /// `(count, sum)` of `http_request_duration_seconds` for one label set.
    pub fn duration_for(&self, path: &str, method: &str) -> (u64, f64) {
        let hist = self.request_duration.with_label_values(&[path, method]);
        (hist.get_sample_count(), hist.get_sample_sum())
    }

    /// Sum of `http_requests_total` across every label set seen so far.
    pub fn requests_total(&self) -> u64 {
        self.registry
            .gather()
            .iter()
            .filter(|family| family.get_name() == REQUESTS_TOTAL)
            .flat_map(|family| family.get_metric())
            .map(|metric| metric.get_counter().get_value() as u64)
            .sum()
    }
}
