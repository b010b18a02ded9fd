//! Observability for the chat service.

pub mod metrics;
