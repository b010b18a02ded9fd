//! Observability for the auth service: Prometheus metrics.

pub mod metrics;
