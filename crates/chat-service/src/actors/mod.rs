//! Room actors.
//!
//! ```text
//! RoomRegistry (one per service)
//! └── RoomActor (one per conversation with live subscribers)
//!     └── subscriber set: connection id -> outbound frame sender
//! ```
//!
//! Every mutation of a room's subscriber set, and every publish, goes through
//! that room's mailbox. Publish persists before it broadcasts, so subscribers
//! see messages in creation order.

pub mod messages;
pub mod registry;
pub mod room;

pub use messages::{RoomMessage, RoomState};
pub use registry::{spawn_reaper, RoomRegistry};
pub use room::{RoomActor, RoomHandle};
