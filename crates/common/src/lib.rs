//! Common utilities and types shared across Wayfare components.

#![warn(clippy::pedantic)]

/// Module for the shared error taxonomy
pub mod error;

/// Module for common data types (subject and conversation ids, roles)
pub mod types;

/// Module for common configuration
pub mod config;

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for low-level JWT helpers (size limits, kid extraction, iat checks)
pub mod jwt;

/// Module for the credential codec (issue and verify bearer credentials)
pub mod credential;

/// Module for the identity store collaborator
pub mod identity;
