use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::MetricsCollector;

/// Sampling period of the QPS gauge.
pub const RATE_INTERVAL: Duration = Duration::from_secs(1);

// ─── Background QPS estimator ────────────────────────────────────

/// Samples the raw request counter once per `RATE_INTERVAL` and publishes
/// the delta since the previous tick into `http_requests_per_second`.
///
/// The previous sample starts at zero, so the first published value is the
/// raw counter itself. Runs until `shutdown` is cancelled; the gauge is
/// never written after that.
pub async fn run(metrics: Arc<MetricsCollector>, shutdown: CancellationToken) {
    // First tick one full period after start, like a wall-clock ticker.
    let mut interval = interval_at(Instant::now() + RATE_INTERVAL, RATE_INTERVAL);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut ticks = IntervalStream::new(interval);

    let mut last_count = 0u64;
    debug!("rate estimator started");

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            tick = ticks.next() => {
                if tick.is_none() {
                    break;
                }
                let current = metrics.request_count();
                metrics.set_rate(current.saturating_sub(last_count) as f64);
                last_count = current;
            }
        }
    }

    debug!("rate estimator stopped");
}
