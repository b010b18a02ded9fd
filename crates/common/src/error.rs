//! Shared error taxonomy for Wayfare components.
//!
//! Every crate keeps its own `thiserror` enum, but each of those enums can
//! report one of these kinds through a `kind()` method. The kind is what
//! crosses crate and transport boundaries (HTTP error codes, channel error
//! frames, renewal outcomes).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of authentication and authorization failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Credential is past its `exp` claim.
    Expired,
    /// Credential signature or structure is invalid.
    Malformed,
    /// Credential carries no subject id.
    MissingSubject,
    /// Refresh credential was rejected during rotation.
    InvalidRefresh,
    /// Caller could not be authenticated.
    Unauthenticated,
    /// Credential is valid but the subject no longer exists.
    UnknownSubject,
    /// Subject is not a participant of the requested resource.
    Forbidden,
    /// Requested resource does not exist.
    NotFound,
    /// An operation did not complete within its deadline.
    Timeout,
}

impl ErrorKind {
    /// Wire code used in HTTP error bodies and channel error frames.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Expired => "expired",
            ErrorKind::Malformed => "malformed",
            ErrorKind::MissingSubject => "missing_subject",
            ErrorKind::InvalidRefresh => "invalid_refresh",
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::UnknownSubject => "unknown_subject",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Timeout => "timeout",
        }
    }

    /// Whether a client seeing this kind must discard its session and log in again.
    ///
    /// There is no partial-trust state: once the credential chain is broken
    /// the only way back is a fresh login.
    #[must_use]
    pub fn forces_reauthentication(self) -> bool {
        matches!(
            self,
            ErrorKind::Forbidden
                | ErrorKind::Unauthenticated
                | ErrorKind::InvalidRefresh
                | ErrorKind::UnknownSubject
        )
    }

    /// Whether this kind means the presented credential itself was rejected.
    #[must_use]
    pub fn is_credential_failure(self) -> bool {
        matches!(
            self,
            ErrorKind::Expired
                | ErrorKind::Malformed
                | ErrorKind::MissingSubject
                | ErrorKind::Unauthenticated
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_codes_match_serde() {
        for kind in [
            ErrorKind::Expired,
            ErrorKind::Malformed,
            ErrorKind::MissingSubject,
            ErrorKind::InvalidRefresh,
            ErrorKind::Unauthenticated,
            ErrorKind::UnknownSubject,
            ErrorKind::Forbidden,
            ErrorKind::NotFound,
            ErrorKind::Timeout,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn test_reauthentication_kinds() {
        assert!(ErrorKind::Forbidden.forces_reauthentication());
        assert!(ErrorKind::Unauthenticated.forces_reauthentication());
        assert!(ErrorKind::InvalidRefresh.forces_reauthentication());
        assert!(!ErrorKind::NotFound.forces_reauthentication());
        assert!(!ErrorKind::Timeout.forces_reauthentication());
    }

    #[test]
    fn test_credential_failure_kinds() {
        assert!(ErrorKind::Expired.is_credential_failure());
        assert!(ErrorKind::Malformed.is_credential_failure());
        assert!(!ErrorKind::Forbidden.is_credential_failure());
    }
}
