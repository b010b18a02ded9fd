//! HTTP request handlers for the auth service.

pub mod auth_handler;
pub mod health;
pub mod metrics;

pub use auth_handler::{logout, refresh, request_code, verify_code};
pub use health::health_check;
pub use metrics::metrics_handler;
