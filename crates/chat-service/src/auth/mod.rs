pub mod channel;

pub use channel::{token_from_handshake, Authenticated, ChannelAuthenticator};
