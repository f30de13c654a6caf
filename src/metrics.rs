use anyhow::Result;
use metrics::{describe_counter, describe_gauge, describe_histogram, Counter, Gauge, Histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
pub use metrics_exporter_prometheus::PrometheusHandle;
use once_cell::sync::OnceCell;

/// Global metrics handle to ensure single initialization
static METRICS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Finished relay queries by outcome
pub fn relay_queries(outcome: &'static str) -> Counter {
    metrics::counter!("relay_queries_total", "outcome" => outcome)
}

/// Events received from relays and returned to callers
pub fn relay_events_received() -> Counter {
    metrics::counter!("relay_events_received")
}

/// Relay queries currently holding an outbound connection
pub fn active_relay_queries() -> Gauge {
    metrics::gauge!("active_relay_queries")
}

/// Wall time of a relay query in milliseconds
pub fn relay_query_duration() -> Histogram {
    metrics::histogram!("relay_query_duration_ms")
}

/// Keeps `active_relay_queries` balanced even when the query future is dropped.
pub struct ActiveQueryGuard;

impl ActiveQueryGuard {
    pub fn new() -> Self {
        active_relay_queries().increment(1.0);
        ActiveQueryGuard
    }
}

impl Default for ActiveQueryGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ActiveQueryGuard {
    fn drop(&mut self) {
        active_relay_queries().decrement(1.0);
    }
}

/// Sets up the Prometheus recorder and returns a handle that can be used
/// to expose the /metrics endpoint.
pub fn setup_metrics() -> Result<PrometheusHandle, anyhow::Error> {
    if let Some(handle) = METRICS_HANDLE.get() {
        return Ok(handle.clone());
    }

    METRICS_HANDLE
        .get_or_try_init(|| {
            let builder = PrometheusBuilder::new();
            let handle = builder.install_recorder()?;

            // Descriptions go to the recorder installed above
            describe_counter!(
                "relay_queries_total",
                "Total number of relay queries by outcome"
            );
            describe_counter!(
                "relay_events_received",
                "Total number of events collected from relays"
            );
            describe_gauge!(
                "active_relay_queries",
                "Number of relay queries with an open outbound connection"
            );
            describe_histogram!(
                "relay_query_duration_ms",
                "Relay query duration in milliseconds, connect to terminal response"
            );

            Ok(handle)
        })
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptions_reach_the_exporter() {
        let handle = setup_metrics().unwrap();
        relay_queries("success").increment(1);

        let rendered = handle.render();
        assert!(
            rendered.contains("# HELP relay_queries_total Total number of relay queries by outcome"),
            "{rendered}"
        );
    }
}
