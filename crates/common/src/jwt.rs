//! Low-level JWS helpers used by the credential codec.
//!
//! Wayfare credentials are compact Ed25519 JWS tokens. The checks here run
//! before or after signature verification:
//!
//! - tokens are size-checked before any decoding
//! - the `kid` header selects the verifying key
//! - `iat` may not sit further in the future than the configured clock skew
//!
//! Errors are coarse on purpose for callers: everything here collapses to
//! [`crate::error::ErrorKind::Malformed`] once it leaves the codec. The
//! detail is only logged at debug level under the `common.jwt` target.

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine,
};
use std::time::Duration;
use thiserror::Error;

/// Maximum accepted credential size in bytes (8 KiB).
///
/// Issued credentials are a few hundred bytes. Anything larger is rejected
/// before base64 decoding or signature work.
pub const MAX_JWT_SIZE_BYTES: usize = 8192;

/// Default tolerance for `iat` values in the future.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(300);

/// Upper bound on configurable clock skew.
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(600);

/// Length of a raw Ed25519 public key.
pub const ED25519_PUBLIC_KEY_LEN: usize = 32;

/// Failures detected by the pre- and post-verification checks.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtCheckError {
    #[error("token exceeds maximum size")]
    TooLarge,

    #[error("token is not a compact JWS")]
    Malformed,

    #[error("token header has no kid")]
    MissingKid,

    #[error("token iat is too far in the future")]
    IatInFuture,
}

/// Extract the `kid` header without verifying the signature.
///
/// The returned value is only good for picking a verifying key. The token
/// still has to be verified with that key.
///
/// # Errors
///
/// - `TooLarge` if the token exceeds [`MAX_JWT_SIZE_BYTES`]
/// - `Malformed` if the token is not three dot-separated segments or the
///   header is not base64url JSON
/// - `MissingKid` if `kid` is absent, empty, or not a string
pub fn extract_kid(token: &str) -> Result<String, JwtCheckError> {
    check_size(token)?;

    let mut parts = token.split('.');
    let header_part = parts.next().ok_or(JwtCheckError::Malformed)?;
    if parts.count() != 2 {
        tracing::debug!(target: "common.jwt", "Token rejected: expected three segments");
        return Err(JwtCheckError::Malformed);
    }

    let header_bytes = URL_SAFE_NO_PAD.decode(header_part).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to decode token header");
        JwtCheckError::Malformed
    })?;

    let header: serde_json::Value = serde_json::from_slice(&header_bytes).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to parse token header");
        JwtCheckError::Malformed
    })?;

    header
        .get("kid")
        .and_then(serde_json::Value::as_str)
        .filter(|kid| !kid.is_empty())
        .map(ToString::to_string)
        .ok_or(JwtCheckError::MissingKid)
}

/// Reject tokens larger than [`MAX_JWT_SIZE_BYTES`].
///
/// # Errors
///
/// Returns `TooLarge` when the limit is exceeded.
pub fn check_size(token: &str) -> Result<(), JwtCheckError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum"
        );
        return Err(JwtCheckError::TooLarge);
    }
    Ok(())
}

/// Check `iat` against an explicit `now` (unix seconds).
///
/// `iat == now + skew` is the last accepted value.
///
/// # Errors
///
/// Returns `IatInFuture` when `iat > now + skew`.
pub fn validate_iat_at(iat: i64, clock_skew: Duration, now: i64) -> Result<(), JwtCheckError> {
    // clock_skew is bounded by MAX_CLOCK_SKEW
    #[allow(clippy::cast_possible_wrap)]
    let skew_secs = clock_skew.as_secs() as i64;
    let max_iat = now.saturating_add(skew_secs);

    if iat > max_iat {
        tracing::debug!(
            target: "common.jwt",
            iat = iat,
            now = now,
            max_allowed = max_iat,
            "Token rejected: iat too far in the future"
        );
        return Err(JwtCheckError::IatInFuture);
    }
    Ok(())
}

/// Clamp a configured clock skew to [`MAX_CLOCK_SKEW`].
#[must_use]
pub fn clamp_clock_skew(requested: Duration) -> Duration {
    requested.min(MAX_CLOCK_SKEW)
}

/// Decode a standard-base64 raw Ed25519 public key (32 bytes).
///
/// # Errors
///
/// Returns `Malformed` if the input is not base64 or has the wrong length.
pub fn decode_ed25519_public_key(b64: &str) -> Result<Vec<u8>, JwtCheckError> {
    let bytes = STANDARD.decode(b64.trim()).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to decode public key");
        JwtCheckError::Malformed
    })?;
    if bytes.len() != ED25519_PUBLIC_KEY_LEN {
        tracing::debug!(
            target: "common.jwt",
            len = bytes.len(),
            "Public key has unexpected length"
        );
        return Err(JwtCheckError::Malformed);
    }
    Ok(bytes)
}
