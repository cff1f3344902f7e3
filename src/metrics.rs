//! Prometheus metrics for the request pipeline.
//!
//! Metrics are exposed via a dedicated HTTP listener (default: `0.0.0.0:9090`).
//!
//! # Available Metrics
//!
//! ## Counters
//! - `tracker_rate_limit_rejections_total` - Requests rejected with 429
//! - `tracker_auth_rejections_total` - Requests rejected by the authorization gate (label: reason)
//! - `tracker_idempotent_replays_total` - Creations answered from the idempotency cache (label: collection)
//!
//! ## Histograms
//! - `tracker_request_duration_seconds` - Request duration (labels: endpoint, method, status)
//!
//! ## Gauges
//! - `tracker_rate_limit_tracked_clients` - Client keys with a live rate limit window
//!
//! The recording functions are no-ops until [`init_metrics`] installs a recorder.

use std::net::SocketAddr;
use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::middleware::Next;
use axum::response::Response;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const RATE_LIMIT_REJECTIONS_TOTAL: &str = "tracker_rate_limit_rejections_total";
    pub const AUTH_REJECTIONS_TOTAL: &str = "tracker_auth_rejections_total";
    pub const IDEMPOTENT_REPLAYS_TOTAL: &str = "tracker_idempotent_replays_total";
    pub const REQUEST_DURATION_SECONDS: &str = "tracker_request_duration_seconds";
    pub const RATE_LIMIT_TRACKED_CLIENTS: &str = "tracker_rate_limit_tracked_clients";
}

/// Install the Prometheus exporter and describe all metrics.
///
/// # Errors
///
/// Returns an error message if the exporter cannot be installed (for example
/// when the listener address is already in use).
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        names::RATE_LIMIT_REJECTIONS_TOTAL,
        "Requests rejected because the client exhausted its rate limit window"
    );
    describe_counter!(
        names::AUTH_REJECTIONS_TOTAL,
        "Requests rejected by the authorization gate"
    );
    describe_counter!(
        names::IDEMPOTENT_REPLAYS_TOTAL,
        "Creation requests answered with a previously created resource"
    );
    describe_histogram!(
        names::REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_gauge!(
        names::RATE_LIMIT_TRACKED_CLIENTS,
        "Client keys currently holding a rate limit window"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

/// Middleware recording the duration of every routed request.
///
/// Labels use the matched route template so path parameters do not explode
/// label cardinality.
pub async fn track_request_duration(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().to_string();
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_owned())
        .unwrap_or_else(|| request.uri().path().to_owned());

    let response = next.run(request).await;

    record_request_duration(
        &endpoint,
        &method,
        response.status().as_str(),
        started.elapsed().as_secs_f64(),
    );
    response
}

/// Record HTTP request duration.
pub fn record_request_duration(endpoint: &str, method: &str, status: &str, duration_secs: f64) {
    histogram!(names::REQUEST_DURATION_SECONDS, "endpoint" => endpoint.to_string(), "method" => method.to_string(), "status" => status.to_string())
        .record(duration_secs);
}

/// Record a request rejected by the rate limiter.
pub fn record_rate_limit_rejection() {
    counter!(names::RATE_LIMIT_REJECTIONS_TOTAL).increment(1);
}

/// Record a request rejected by the authorization gate.
pub fn record_auth_rejection(reason: &'static str) {
    counter!(names::AUTH_REJECTIONS_TOTAL, "reason" => reason).increment(1);
}

/// Record a creation answered from the idempotency cache.
pub fn record_idempotent_replay(collection: &'static str) {
    counter!(names::IDEMPOTENT_REPLAYS_TOTAL, "collection" => collection).increment(1);
}

/// Update the tracked-clients gauge.
// Precision loss only past 2^52 clients
#[allow(clippy::cast_precision_loss)]
pub fn set_tracked_clients(count: usize) {
    gauge!(names::RATE_LIMIT_TRACKED_CLIENTS).set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    // These only verify recording is safe without an installed recorder.

    #[test]
    fn test_record_request_duration() {
        record_request_duration("/api/v1/projects", "POST", "201", 0.01);
    }

    #[test]
    fn test_record_counters() {
        record_rate_limit_rejection();
        record_auth_rejection("invalid_token");
        record_idempotent_replay("projects");
    }

    #[test]
    fn test_set_tracked_clients() {
        set_tracked_clients(0);
        set_tracked_clients(42);
    }
}
