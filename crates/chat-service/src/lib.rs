//! Wayfare chat service.
//!
//! Trip participants exchange messages over an authenticated WebSocket
//! channel or the HTTP message API. Both transports resolve the caller with
//! the same [`auth::ChannelAuthenticator`] and check conversation membership
//! before every read and write.

pub mod actors;
pub mod auth;
pub mod channel;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod repositories;
pub mod routes;
pub mod services;
