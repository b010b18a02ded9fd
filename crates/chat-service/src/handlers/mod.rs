//! HTTP request handlers for the chat service.

pub mod health;
pub mod messages;
pub mod metrics;
pub mod ws;

pub use health::health_check;
pub use messages::{list_messages, post_message};
pub use metrics::metrics_handler;
pub use ws::channel_upgrade;
