//! Metrics definitions for the chat service.
//!
//! All metrics use the `chat_` prefix. Label values are bounded: endpoints
//! collapse to route templates and reasons come from fixed strings.

use metrics::{counter, gauge, histogram};
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
            Matcher::Prefix("chat_http_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.150, 0.200, 0.300, 0.500, 1.000, 2.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

/// Metric: `chat_http_requests_total`, `chat_http_request_duration_seconds`
pub fn record_http_request(method: &str, path: &str, status_code: u16, duration: Duration) {
    let endpoint = normalize_endpoint(path);

    histogram!("chat_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => endpoint,
        "status" => categorize_status_code(status_code)
    )
    .record(duration.as_secs_f64());

    counter!("chat_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

/// Metric: `chat_auth_failures_total`
pub fn record_auth_failure(reason: &'static str) {
    counter!("chat_auth_failures_total", "reason" => reason).increment(1);
}

/// Metric: `chat_authorization_denied_total`
pub fn record_authorization_denied(reason: &'static str) {
    counter!("chat_authorization_denied_total", "reason" => reason).increment(1);
}

/// Metric: `chat_messages_posted_total`
pub fn record_message_posted(transport: &'static str) {
    counter!("chat_messages_posted_total", "transport" => transport).increment(1);
}

/// Metric: `chat_rooms_active`
pub fn set_rooms_active(count: usize) {
    gauge!("chat_rooms_active").set(count as f64);
}

/// Metric: `chat_channel_connections`
pub fn channel_connected() {
    gauge!("chat_channel_connections").increment(1.0);
}

pub fn channel_disconnected() {
    gauge!("chat_channel_connections").decrement(1.0);
}

fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        100..=299 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

fn normalize_endpoint(path: &str) -> &'static str {
    match path {
        "/health" => "/health",
        "/metrics" => "/metrics",
        "/api/v1/channel" => "/api/v1/channel",
        p if is_messages_path(p) => "/api/v1/conversations/{id}/messages",
        _ => "/other",
    }
}

fn is_messages_path(path: &str) -> bool {
    path.strip_prefix("/api/v1/conversations/")
        .and_then(|rest| rest.strip_suffix("/messages"))
        .is_some_and(|id| !id.is_empty() && !id.contains('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_status_code() {
        assert_eq!(categorize_status_code(101), "success");
        assert_eq!(categorize_status_code(201), "success");
        assert_eq!(categorize_status_code(403), "error");
        assert_eq!(categorize_status_code(408), "timeout");
    }

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(
            normalize_endpoint("/api/v1/conversations/T1/messages"),
            "/api/v1/conversations/{id}/messages"
        );
        assert_eq!(normalize_endpoint("/api/v1/conversations//messages"), "/other");
        assert_eq!(
            normalize_endpoint("/api/v1/conversations/a/b/messages"),
            "/other"
        );
        assert_eq!(normalize_endpoint("/api/v1/channel"), "/api/v1/channel");
        assert_eq!(normalize_endpoint("/wp-admin"), "/other");
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_http_request("GET", "/health", 200, Duration::from_millis(1));
        record_auth_failure("expired");
        record_authorization_denied("forbidden");
        record_message_posted("http");
        set_rooms_active(2);
        channel_connected();
        channel_disconnected();
    }
}
