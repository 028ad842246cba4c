pub mod collector;
pub mod export;
pub mod rate;

pub use collector::MetricsCollector;

/// Path the exposition endpoint is mounted on.
pub const METRICS_PATH: &str = "/metrics";
