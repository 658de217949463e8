use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. `debug` overrides `RUST_LOG`.
pub fn init_tracing(debug: bool, json: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Start the Prometheus listener when an address is configured, then
/// register metric descriptions.
pub fn init_metrics(addr: Option<SocketAddr>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    if let Some(addr) = addr {
        PrometheusBuilder::new().with_http_listener(addr).install()?;
        tracing::info!(%addr, "Prometheus metrics listener started");
    }

    metrics::describe_counter!("scrape_items_processed_total", "Products fetched, normalized and queued for storage");
    metrics::describe_counter!("scrape_items_failed_total", "Products that failed and went to the dead-letter file");
    metrics::describe_counter!("scrape_items_skipped_total", "Products skipped because they were already stored or had no identifier");
    metrics::describe_counter!("scrape_fetch_attempts_total", "Product API requests made, including retries");
    metrics::describe_counter!("scrape_fetch_retries_total", "Product API requests that were retried after a failure");
    metrics::describe_histogram!("scrape_fetch_seconds", "Duration of a single product API request");
    metrics::describe_counter!("discovery_runs_total", "Work list discoveries by origin (index, cache, fallback, unavailable)");
    metrics::describe_counter!("identity_evictions_total", "Proxy identities dropped after repeated failures");
    metrics::describe_gauge!("identity_pool_size", "Proxy identities currently in rotation");
    metrics::describe_gauge!("dead_letter_entries", "Entries in the dead-letter file");

    Ok(())
}
