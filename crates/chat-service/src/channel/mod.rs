//! Real-time channel: wire protocol and per-connection session loop.

pub mod protocol;
pub mod session;

pub use protocol::{ClientFrame, ServerFrame};
pub use session::ChannelSession;
