//! Prometheus metrics for the proxy.

use prometheus::{Encoder, IntCounter, IntGauge, Opts, Registry, TextEncoder};

/// Metric name constants, kept in one place so dashboards and tests agree.
pub mod names {
    pub const REQUESTS_TOTAL: &str = "pairlink_requests_total";
    pub const TURNS_COMPLETED_TOTAL: &str = "pairlink_turns_completed_total";
    pub const TIMEOUTS_TOTAL: &str = "pairlink_timeouts_total";
    pub const CONFLICTS_TOTAL: &str = "pairlink_conflicts_total";
    pub const ACTIVE_SESSIONS: &str = "pairlink_active_sessions";
}

/// Counter/gauge registry shared through the application state.
pub struct ProxyMetrics {
    registry: Registry,
    pub requests_total: IntCounter,
    pub turns_completed_total: IntCounter,
    pub timeouts_total: IntCounter,
    pub conflicts_total: IntCounter,
    pub active_sessions: IntGauge,
}

impl ProxyMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        let requests_total = register_counter(
            &registry,
            names::REQUESTS_TOTAL,
            "Turn requests received across all wire formats",
        );
        let turns_completed_total = register_counter(
            &registry,
            names::TURNS_COMPLETED_TOTAL,
            "Turns that returned a peer utterance",
        );
        let timeouts_total = register_counter(
            &registry,
            names::TIMEOUTS_TOTAL,
            "Handshake and turn waits that expired",
        );
        let conflicts_total = register_counter(
            &registry,
            names::CONFLICTS_TOTAL,
            "Requests rejected because a side was already in flight",
        );
        let active_sessions = IntGauge::with_opts(Opts::new(
            names::ACTIVE_SESSIONS,
            "Sessions currently in the directory",
        ))
        .expect("valid gauge opts");
        registry
            .register(Box::new(active_sessions.clone()))
            .expect("register gauge");

        Self {
            registry,
            requests_total,
            turns_completed_total,
            timeouts_total,
            conflicts_total,
            active_sessions,
        }
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

impl Default for ProxyMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn register_counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::with_opts(Opts::new(name, help)).expect("valid counter opts");
    registry
        .register(Box::new(counter.clone()))
        .expect("register counter");
    counter
}
