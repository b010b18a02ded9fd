//! # Wayfare Test Utilities
//!
//! Shared test utilities for the Wayfare services.
//!
//! This crate provides:
//! - Deterministic crypto fixtures (seeded Ed25519 keys, ready-made codecs)
//! - Credential builders (expired, refresh-kind, tampered)
//! - Fixed test ids and seeded identity/trip stores
//! - Server harnesses (`TestAuthServer`, `TestChatServer`) on `127.0.0.1:0`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use wf_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let codec = test_codec(1);
//!     let token = TestTokenBuilder::new(&codec).for_subject(U1).build();
//!     let chat = TestChatServer::spawn().await.unwrap();
//!     // ...
//! }
//! ```

pub mod crypto_fixtures;
pub mod fixtures;
pub mod server_harness;
pub mod test_ids;
pub mod token_builders;

// Re-export commonly used items
pub use crypto_fixtures::*;
pub use fixtures::*;
pub use server_harness::*;
pub use test_ids::*;
pub use token_builders::*;
