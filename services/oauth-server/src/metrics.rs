//! Prometheus metrics exposition
//!
//! - `oauth_requests_total` (counter): labels `endpoint`, `status`
//! - `oauth_request_duration_seconds` (histogram): label `endpoint`
//! - `oauth_codes_issued_total` (counter)
//! - `oauth_tokens_issued_total` (counter)

use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

const DURATION_METRIC: &str = "oauth_request_duration_seconds";

/// Store round-trips dominate; memory backends answer in microseconds, file
/// backends in low milliseconds.
const DURATION_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
];

fn builder() -> Result<PrometheusBuilder, BuildError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(DURATION_METRIC.to_string()), DURATION_BUCKETS)
}

/// Install the global Prometheus recorder and return a handle for rendering.
///
/// Explicit buckets make the duration metric render as a histogram (with
/// `_bucket` lines) rather than the default summary.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    builder()?.install_recorder()
}

/// Record a completed protocol request.
pub fn record_request(endpoint: &'static str, status: u16, duration_secs: f64) {
    metrics::counter!("oauth_requests_total", "endpoint" => endpoint, "status" => status.to_string())
        .increment(1);
    metrics::histogram!(DURATION_METRIC, "endpoint" => endpoint).record(duration_secs);
}

pub fn record_code_issued() {
    metrics::counter!("oauth_codes_issued_total").increment(1);
}

pub fn record_token_issued() {
    metrics::counter!("oauth_tokens_issued_total").increment(1);
}
