//! Secret types for bearer credentials and key material.
//!
//! Re-exports [`secrecy`] so every crate in the workspace wraps access tokens,
//! refresh tokens, login codes, and signing keys the same way. `Debug` on
//! these types prints a redaction marker, so structs that derive `Debug` stay
//! safe to log.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct RefreshRequest {
//!     refresh_token: SecretString,
//! }
//!
//! let req = RefreshRequest {
//!     refresh_token: SecretString::from("eyJhbGciOiJFZERTQSJ9.e30.sig"),
//! };
//! assert!(!format!("{req:?}").contains("eyJ"));
//! assert!(req.refresh_token.expose_secret().starts_with("eyJ"));
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};

/// Format an `Authorization` header value for a bearer credential.
///
/// The returned string contains the raw credential; do not log it.
#[must_use]
pub fn bearer_header_value(token: &SecretString) -> String {
    format!("Bearer {}", token.expose_secret())
}

/// Extract the credential from an `Authorization: Bearer <token>` header value.
///
/// Returns `None` when the scheme is not `Bearer` or the token is empty.
#[must_use]
pub fn parse_bearer(header_value: &str) -> Option<&str> {
    let token = header_value.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// Compare two secrets by value without exposing them in the call site.
#[must_use]
pub fn secrets_equal(a: &SecretString, b: &SecretString) -> bool {
    a.expose_secret() == b.expose_secret()
}
