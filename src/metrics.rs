//! Metrics initialization for Prometheus exporter, and the counters the
//! data plane records.

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config::MetricsConfig;
use crate::error::Result;

/// Initialize the metrics system based on configuration.
///
/// When metrics are enabled, this starts an HTTP server that exposes
/// a `/metrics` endpoint for Prometheus to scrape.
///
/// When metrics are disabled, this is a no-op. The `metrics` crate
/// handles unregistered metrics gracefully (they become no-ops).
pub fn init(config: &MetricsConfig) -> Result<()> {
    if !config.enabled {
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(config.listen)
        .install()
        .map_err(|err| crate::error::Error::Metrics(err.to_string()))?;

    Ok(())
}

/// One answered DNS query; `outcome` is `blocked`, `cached`, `forwarded` or
/// `servfail`.
pub fn record_dns_query(outcome: &'static str) {
    ::metrics::counter!("domainwall_dns_queries_total", "verdict" => outcome).increment(1);
}

/// One datagram dropped without an answer.
pub fn record_dns_dropped() {
    ::metrics::counter!("domainwall_dns_dropped_total").increment(1);
}

/// One proxied request; `kind` is `http` or `connect`.
pub fn record_proxy_request(kind: &'static str, verdict: &'static str) {
    ::metrics::counter!(
        "domainwall_proxy_requests_total",
        "kind" => kind,
        "verdict" => verdict
    )
    .increment(1);
}

pub fn record_refresh(success: bool, generation: u64) {
    let result = if success { "success" } else { "failure" };
    ::metrics::counter!("domainwall_refresh_total", "result" => result).increment(1);
    #[allow(clippy::cast_precision_loss)]
    ::metrics::gauge!("domainwall_snapshot_generation").set(generation as f64);
}
