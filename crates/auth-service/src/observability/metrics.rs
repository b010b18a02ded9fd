//! Metrics definitions for the auth service.
//!
//! All metrics use the `auth_` prefix; counters end in `_total` and
//! durations in `_seconds`.
//!
//! # Cardinality
//!
//! - `method`: HTTP methods
//! - `endpoint`: the fixed route set, anything else is `/other`
//! - `operation`: `login`, `rotate`
//! - `reason` / `outcome`: bounded by code

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the Prometheus recorder and return the handle served at `/metrics`.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("auth_http_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.150, 0.200, 0.300, 0.500, 1.000, 2.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

/// Metric: `auth_http_requests_total`, `auth_http_request_duration_seconds`
pub fn record_http_request(method: &str, path: &str, status_code: u16, duration: Duration) {
    let endpoint = normalize_endpoint(path);

    histogram!("auth_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => endpoint,
        "status" => categorize_status_code(status_code)
    )
    .record(duration.as_secs_f64());

    counter!("auth_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

/// Metric: `auth_tokens_issued_total`
pub fn record_tokens_issued(operation: &'static str) {
    counter!("auth_tokens_issued_total", "operation" => operation).increment(1);
}

/// Metric: `auth_refresh_rejected_total`
pub fn record_refresh_rejected(reason: &'static str) {
    counter!("auth_refresh_rejected_total", "reason" => reason).increment(1);
}

/// Metric: `auth_otp_requests_total`
pub fn record_otp_requested(outcome: &'static str) {
    counter!("auth_otp_requests_total", "outcome" => outcome).increment(1);
}

/// Metric: `auth_otp_verifications_total`
pub fn record_otp_verification(outcome: &'static str) {
    counter!("auth_otp_verifications_total", "outcome" => outcome).increment(1);
}

fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=299 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

fn normalize_endpoint(path: &str) -> &'static str {
    match path {
        "/health" => "/health",
        "/metrics" => "/metrics",
        "/api/v1/auth/otp/request" => "/api/v1/auth/otp/request",
        "/api/v1/auth/otp/verify" => "/api/v1/auth/otp/verify",
        "/api/v1/auth/refresh" => "/api/v1/auth/refresh",
        "/api/v1/auth/logout" => "/api/v1/auth/logout",
        _ => "/other",
    }
}
