//! Fixed test ids.
//!
//! The seeded stores in [`crate::fixtures`] use these: trip `T1` has driver
//! `D1` and rider `U1`; `U2` exists but is not on `T1`.

/// Seeded trip / conversation.
pub const T1: &str = "T1";

/// Driver of `T1`.
pub const D1: &str = "D1";

/// Rider of `T1`.
pub const U1: &str = "U1";

/// Rider with no trips.
pub const U2: &str = "U2";

/// Subject that is never seeded.
pub const UNKNOWN_SUBJECT: &str = "ghost";
