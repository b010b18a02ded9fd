//! Wayfare auth service.
//!
//! Issues (access, refresh) credential pairs after one-time-code login,
//! rotates refresh credentials single-use, and revokes them on logout.
//!
//! Exposed as a library so integration tests and harnesses can build the
//! router without the binary.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod routes;
pub mod services;
pub mod store;
