//! Credential codec: issue and verify signed bearer credentials.
//!
//! A credential is a compact Ed25519 JWS carrying [`Claims`]. The codec holds
//! at most one signing key plus any number of verifying keys selected by the
//! `kid` header, so a verify-only codec (chat service) and a signing codec
//! (auth service) share one implementation.
//!
//! Verification order:
//! 1. size limit and `kid` lookup (`Malformed`)
//! 2. signature and claim structure (`Malformed`)
//! 3. subject presence (`MissingSubject`)
//! 4. expiry, `now >= exp` (`Expired`)
//! 5. `iat` not beyond the clock skew (`Malformed`)

use crate::error::ErrorKind;
use crate::jwt::{self, JwtCheckError};
use crate::secret::{ExposeSecret, SecretBox, SecretString};
use crate::types::{Role, SubjectId, SubjectIdentity};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use ring::signature::{Ed25519KeyPair, KeyPair};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;

/// Errors produced by the credential codec.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("credential has expired")]
    Expired,

    #[error("credential is malformed")]
    Malformed,

    #[error("credential has no subject")]
    MissingSubject,

    /// The codec has no signing key, or the key was rejected when signing.
    #[error("signing key unavailable")]
    SigningKeyUnavailable,

    /// Key material supplied at construction could not be parsed.
    #[error("invalid key material: {0}")]
    InvalidKey(String),
}

impl CredentialError {
    /// Shared taxonomy kind, if this error belongs to it.
    #[must_use]
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            CredentialError::Expired => Some(ErrorKind::Expired),
            CredentialError::Malformed => Some(ErrorKind::Malformed),
            CredentialError::MissingSubject => Some(ErrorKind::MissingSubject),
            CredentialError::SigningKeyUnavailable | CredentialError::InvalidKey(_) => None,
        }
    }
}

impl From<JwtCheckError> for CredentialError {
    fn from(_: JwtCheckError) -> Self {
        CredentialError::Malformed
    }
}

/// Whether a credential authorizes ordinary calls or only renewal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    Access,
    Refresh,
}

impl CredentialKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CredentialKind::Access => "access",
            CredentialKind::Refresh => "refresh",
        }
    }
}

/// Claims carried inside every credential.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject id. Empty when the token carried none.
    #[serde(default)]
    pub sub: String,
    pub role: Role,
    pub kind: CredentialKind,
    /// Issued-at, unix seconds.
    pub iat: i64,
    /// Expiry, unix seconds. The credential is invalid once `now >= exp`.
    pub exp: i64,
    /// Unique credential id, used by the revocation list.
    pub jti: String,
}

impl fmt::Debug for Claims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Claims")
            .field("sub", &"[REDACTED]")
            .field("role", &self.role)
            .field("kind", &self.kind)
            .field("iat", &self.iat)
            .field("exp", &self.exp)
            .field("jti", &"[REDACTED]")
            .finish()
    }
}

impl Claims {
    #[must_use]
    pub fn subject_id(&self) -> SubjectId {
        SubjectId::new(self.sub.clone())
    }

    #[must_use]
    pub fn identity(&self) -> SubjectIdentity {
        SubjectIdentity {
            subject_id: self.subject_id(),
            role: self.role,
        }
    }

    /// Whether the credential is expired at `now` (unix seconds).
    #[must_use]
    pub fn is_expired_at(&self, now: i64) -> bool {
        now >= self.exp
    }
}

/// An issued credential: the opaque bearer string and the claims inside it.
#[derive(Debug, Clone)]
pub struct Credential {
    pub token: SecretString,
    pub claims: Claims,
}

/// Ed25519 private key in PKCS#8 form, tagged with its key id.
pub struct SigningKey {
    kid: String,
    pkcs8: SecretBox<Vec<u8>>,
    public_key: Vec<u8>,
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("pkcs8", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl SigningKey {
    /// Parse a PKCS#8 (v1 or v2) Ed25519 private key.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` if the bytes are not an Ed25519 PKCS#8 document.
    pub fn from_pkcs8(kid: impl Into<String>, pkcs8: &[u8]) -> Result<Self, CredentialError> {
        let key_pair = Ed25519KeyPair::from_pkcs8_maybe_unchecked(pkcs8)
            .map_err(|e| CredentialError::InvalidKey(format!("signing key rejected: {e}")))?;
        Ok(Self {
            kid: kid.into(),
            pkcs8: SecretBox::new(Box::new(pkcs8.to_vec())),
            public_key: key_pair.public_key().as_ref().to_vec(),
        })
    }

    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Verifying half of this key, under the same key id.
    #[must_use]
    pub fn verifying_key(&self) -> VerifyingKey {
        VerifyingKey {
            kid: self.kid.clone(),
            public_key: self.public_key.clone(),
        }
    }
}

/// Raw Ed25519 public key (32 bytes), tagged with its key id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyingKey {
    kid: String,
    public_key: Vec<u8>,
}

impl VerifyingKey {
    /// # Errors
    ///
    /// Returns `InvalidKey` unless `public_key` is exactly 32 bytes.
    pub fn from_raw(kid: impl Into<String>, public_key: &[u8]) -> Result<Self, CredentialError> {
        if public_key.len() != jwt::ED25519_PUBLIC_KEY_LEN {
            return Err(CredentialError::InvalidKey(format!(
                "public key must be {} bytes, got {}",
                jwt::ED25519_PUBLIC_KEY_LEN,
                public_key.len()
            )));
        }
        Ok(Self {
            kid: kid.into(),
            public_key: public_key.to_vec(),
        })
    }

    /// Decode a standard-base64 raw public key.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` if the value is not base64 of a 32-byte key.
    pub fn from_base64(kid: impl Into<String>, b64: &str) -> Result<Self, CredentialError> {
        let bytes = jwt::decode_ed25519_public_key(b64)
            .map_err(|_| CredentialError::InvalidKey("public key is not valid base64".into()))?;
        Self::from_raw(kid, &bytes)
    }

    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    #[must_use]
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }
}

/// Issues and verifies credentials.
#[derive(Debug)]
pub struct CredentialCodec {
    signing_key: Option<SigningKey>,
    verifying_keys: HashMap<String, VerifyingKey>,
    clock_skew: Duration,
}

impl CredentialCodec {
    /// Codec that can both issue and verify, using `signing_key` for both.
    #[must_use]
    pub fn new(signing_key: SigningKey, clock_skew: Duration) -> Self {
        let verifying = signing_key.verifying_key();
        let mut verifying_keys = HashMap::new();
        verifying_keys.insert(verifying.kid.clone(), verifying);
        Self {
            signing_key: Some(signing_key),
            verifying_keys,
            clock_skew: jwt::clamp_clock_skew(clock_skew),
        }
    }

    /// Codec that only verifies. [`issue`](Self::issue) always fails.
    #[must_use]
    pub fn verify_only(keys: impl IntoIterator<Item = VerifyingKey>, clock_skew: Duration) -> Self {
        Self {
            signing_key: None,
            verifying_keys: keys.into_iter().map(|k| (k.kid.clone(), k)).collect(),
            clock_skew: jwt::clamp_clock_skew(clock_skew),
        }
    }

    /// Accept credentials signed by an additional key (e.g. the previous key
    /// during rotation).
    #[must_use]
    pub fn with_verifying_key(mut self, key: VerifyingKey) -> Self {
        self.verifying_keys.insert(key.kid.clone(), key);
        self
    }

    #[must_use]
    pub fn clock_skew(&self) -> Duration {
        self.clock_skew
    }

    /// Issue a credential for `identity` valid for `ttl` from now.
    ///
    /// # Errors
    ///
    /// Returns `SigningKeyUnavailable` if this codec cannot sign.
    pub fn issue(
        &self,
        identity: &SubjectIdentity,
        kind: CredentialKind,
        ttl: Duration,
    ) -> Result<Credential, CredentialError> {
        self.issue_at(identity, kind, ttl, chrono::Utc::now().timestamp())
    }

    /// [`issue`](Self::issue) against an explicit `now` (unix seconds).
    ///
    /// # Errors
    ///
    /// Returns `SigningKeyUnavailable` if this codec cannot sign.
    pub fn issue_at(
        &self,
        identity: &SubjectIdentity,
        kind: CredentialKind,
        ttl: Duration,
        now: i64,
    ) -> Result<Credential, CredentialError> {
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let claims = Claims {
            sub: identity.subject_id.as_str().to_string(),
            role: identity.role,
            kind,
            iat: now,
            exp: now.saturating_add(ttl_secs),
            jti: uuid::Uuid::new_v4().to_string(),
        };
        let token = self.encode(&claims)?;
        Ok(Credential {
            token: SecretString::from(token),
            claims,
        })
    }

    /// Sign `claims` into a compact token.
    ///
    /// Encoding is deterministic: equal claims under the same key produce
    /// the same token.
    ///
    /// # Errors
    ///
    /// Returns `SigningKeyUnavailable` if this codec cannot sign.
    #[instrument(skip_all)]
    pub fn encode(&self, claims: &Claims) -> Result<String, CredentialError> {
        let signing_key = self.signing_key.as_ref().ok_or_else(|| {
            tracing::error!(target: "common.credential", "Issue attempted on verify-only codec");
            CredentialError::SigningKeyUnavailable
        })?;

        let mut header = Header::new(Algorithm::EdDSA);
        header.typ = Some("JWT".to_string());
        header.kid = Some(signing_key.kid.clone());

        let encoding_key = EncodingKey::from_ed_der(signing_key.pkcs8.expose_secret());
        encode(&header, claims, &encoding_key).map_err(|e| {
            tracing::error!(target: "common.credential", error = %e, "Credential signing failed");
            CredentialError::SigningKeyUnavailable
        })
    }

    /// Verify `token` against the current time.
    ///
    /// # Errors
    ///
    /// `Expired`, `Malformed`, or `MissingSubject`; see the module docs for
    /// the order in which they are checked.
    pub fn verify(&self, token: &str) -> Result<Claims, CredentialError> {
        self.verify_at(token, chrono::Utc::now().timestamp())
    }

    /// [`verify`](Self::verify) against an explicit `now` (unix seconds).
    ///
    /// # Errors
    ///
    /// `Expired`, `Malformed`, or `MissingSubject`.
    #[instrument(skip_all)]
    pub fn verify_at(&self, token: &str, now: i64) -> Result<Claims, CredentialError> {
        let kid = jwt::extract_kid(token)?;
        let key = self.verifying_keys.get(&kid).ok_or_else(|| {
            tracing::debug!(target: "common.credential", kid = %kid, "Unknown signing key id");
            CredentialError::Malformed
        })?;

        let decoding_key = DecodingKey::from_ed_der(&key.public_key);
        let mut validation = Validation::new(Algorithm::EdDSA);
        // Expiry is checked below against `now` so the boundary is exact.
        validation.validate_exp = false;
        validation.leeway = 0;

        let claims = decode::<Claims>(token, &decoding_key, &validation)
            .map_err(|e| {
                tracing::debug!(target: "common.credential", error = %e, "Credential rejected");
                CredentialError::Malformed
            })?
            .claims;

        if claims.sub.trim().is_empty() {
            tracing::debug!(target: "common.credential", "Credential has no subject");
            return Err(CredentialError::MissingSubject);
        }

        if claims.is_expired_at(now) {
            tracing::debug!(
                target: "common.credential",
                exp = claims.exp,
                now = now,
                kind = claims.kind.as_str(),
                "Credential expired"
            );
            return Err(CredentialError::Expired);
        }

        jwt::validate_iat_at(claims.iat, self.clock_skew, now)?;

        Ok(claims)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    use ring::rand::SystemRandom;

    const NOW: i64 = 1_700_000_000;

    fn signing_key(kid: &str) -> SigningKey {
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&SystemRandom::new()).unwrap();
        SigningKey::from_pkcs8(kid, pkcs8.as_ref()).unwrap()
    }

    fn rider() -> SubjectIdentity {
        SubjectIdentity {
            subject_id: SubjectId::new("U1"),
            role: Role::Rider,
        }
    }

    fn codec() -> CredentialCodec {
        CredentialCodec::new(signing_key("wayfare-1"), jwt::DEFAULT_CLOCK_SKEW)
    }

    #[test]
    fn test_issue_then_verify() {
        let codec = codec();
        let credential = codec
            .issue_at(&rider(), CredentialKind::Access, Duration::from_secs(900), NOW)
            .unwrap();

        let claims = codec
            .verify_at(credential.token.expose_secret(), NOW + 10)
            .unwrap();
        assert_eq!(claims.sub, "U1");
        assert_eq!(claims.role, Role::Rider);
        assert_eq!(claims.kind, CredentialKind::Access);
        assert_eq!(claims.exp, NOW + 900);
        assert_eq!(claims, credential.claims);
    }

    #[test]
    fn test_expiry_boundary_is_exclusive() {
        let codec = codec();
        let credential = codec
            .issue_at(&rider(), CredentialKind::Access, Duration::from_secs(1), NOW)
            .unwrap();
        let token = credential.token.expose_secret();

        assert!(codec.verify_at(token, NOW).is_ok());
        assert_eq!(codec.verify_at(token, NOW + 1), Err(CredentialError::Expired));
        assert_eq!(codec.verify_at(token, NOW + 2), Err(CredentialError::Expired));
    }

    #[test]
    fn test_zero_ttl_is_already_expired() {
        let codec = codec();
        let credential = codec
            .issue_at(&rider(), CredentialKind::Access, Duration::ZERO, NOW)
            .unwrap();
        assert_eq!(
            codec.verify_at(credential.token.expose_secret(), NOW),
            Err(CredentialError::Expired)
        );
    }

    #[test]
    fn test_encode_is_deterministic() {
        let codec = codec();
        let claims = Claims {
            sub: "D1".to_string(),
            role: Role::Driver,
            kind: CredentialKind::Refresh,
            iat: NOW,
            exp: NOW + 60,
            jti: "fixed".to_string(),
        };
        assert_eq!(codec.encode(&claims).unwrap(), codec.encode(&claims).unwrap());
    }

    #[test]
    fn test_tampered_payload_is_malformed() {
        let codec = codec();
        let credential = codec
            .issue_at(&rider(), CredentialKind::Access, Duration::from_secs(900), NOW)
            .unwrap();
        let token = credential.token.expose_secret();
        let parts: Vec<&str> = token.split('.').collect();

        let forged = serde_json::json!({
            "sub": "U2", "role": "admin", "kind": "access",
            "iat": NOW, "exp": NOW + 900, "jti": "x"
        });
        let forged_payload = URL_SAFE_NO_PAD.encode(forged.to_string());
        let tampered = format!("{}.{}.{}", parts[0], forged_payload, parts[2]);

        assert_eq!(codec.verify_at(&tampered, NOW), Err(CredentialError::Malformed));
    }

    #[test]
    fn test_wrong_key_with_same_kid_is_malformed() {
        let issuer = codec();
        let verifier = CredentialCodec::verify_only(
            [signing_key("wayfare-1").verifying_key()],
            jwt::DEFAULT_CLOCK_SKEW,
        );
        let credential = issuer
            .issue_at(&rider(), CredentialKind::Access, Duration::from_secs(900), NOW)
            .unwrap();
        assert_eq!(
            verifier.verify_at(credential.token.expose_secret(), NOW),
            Err(CredentialError::Malformed)
        );
    }

    #[test]
    fn test_unknown_kid_is_malformed() {
        let issuer = CredentialCodec::new(signing_key("other"), jwt::DEFAULT_CLOCK_SKEW);
        let verifier = codec();
        let credential = issuer
            .issue_at(&rider(), CredentialKind::Access, Duration::from_secs(900), NOW)
            .unwrap();
        assert_eq!(
            verifier.verify_at(credential.token.expose_secret(), NOW),
            Err(CredentialError::Malformed)
        );
    }

    #[test]
    fn test_additional_verifying_key_is_accepted() {
        let old = CredentialCodec::new(signing_key("wayfare-0"), jwt::DEFAULT_CLOCK_SKEW);
        let old_key = old.signing_key.as_ref().unwrap().verifying_key();
        let current = codec().with_verifying_key(old_key);

        let credential = old
            .issue_at(&rider(), CredentialKind::Access, Duration::from_secs(900), NOW)
            .unwrap();
        assert!(current
            .verify_at(credential.token.expose_secret(), NOW)
            .is_ok());
    }

    #[test]
    fn test_missing_subject() {
        let codec = codec();
        let claims = Claims {
            sub: String::new(),
            role: Role::Rider,
            kind: CredentialKind::Access,
            iat: NOW,
            exp: NOW + 900,
            jti: "j".to_string(),
        };
        let token = codec.encode(&claims).unwrap();
        assert_eq!(codec.verify_at(&token, NOW), Err(CredentialError::MissingSubject));
    }

    #[test]
    fn test_absent_subject_field() {
        #[derive(Serialize)]
        struct NoSubject {
            role: Role,
            kind: CredentialKind,
            iat: i64,
            exp: i64,
            jti: String,
        }
        let key = signing_key("wayfare-1");
        let codec = CredentialCodec::verify_only([key.verifying_key()], jwt::DEFAULT_CLOCK_SKEW);

        let mut header = Header::new(Algorithm::EdDSA);
        header.kid = Some("wayfare-1".to_string());
        let token = encode(
            &header,
            &NoSubject {
                role: Role::Rider,
                kind: CredentialKind::Access,
                iat: NOW,
                exp: NOW + 900,
                jti: "j".to_string(),
            },
            &EncodingKey::from_ed_der(key.pkcs8.expose_secret()),
        )
        .unwrap();

        assert_eq!(codec.verify_at(&token, NOW), Err(CredentialError::MissingSubject));
    }

    #[test]
    fn test_iat_beyond_skew_is_malformed() {
        let codec = codec();
        let credential = codec
            .issue_at(&rider(), CredentialKind::Access, Duration::from_secs(3600), NOW + 301)
            .unwrap();
        assert_eq!(
            codec.verify_at(credential.token.expose_secret(), NOW),
            Err(CredentialError::Malformed)
        );

        let credential = codec
            .issue_at(&rider(), CredentialKind::Access, Duration::from_secs(3600), NOW + 300)
            .unwrap();
        assert!(codec.verify_at(credential.token.expose_secret(), NOW).is_ok());
    }

    #[test]
    fn test_oversized_and_garbage_tokens() {
        let codec = codec();
        let oversized = "a".repeat(jwt::MAX_JWT_SIZE_BYTES + 1);
        assert_eq!(codec.verify_at(&oversized, NOW), Err(CredentialError::Malformed));
        assert_eq!(codec.verify_at("", NOW), Err(CredentialError::Malformed));
        assert_eq!(codec.verify_at("abc.def.ghi", NOW), Err(CredentialError::Malformed));
    }

    #[test]
    fn test_verify_only_codec_cannot_issue() {
        let codec = CredentialCodec::verify_only(
            [signing_key("wayfare-1").verifying_key()],
            jwt::DEFAULT_CLOCK_SKEW,
        );
        let result = codec.issue(&rider(), CredentialKind::Access, Duration::from_secs(60));
        assert!(matches!(result, Err(CredentialError::SigningKeyUnavailable)));
        assert_eq!(CredentialError::SigningKeyUnavailable.kind(), None);
    }

    #[test]
    fn test_claims_debug_redacts_subject_and_jti() {
        let codec = codec();
        let credential = codec
            .issue_at(&rider(), CredentialKind::Refresh, Duration::from_secs(60), NOW)
            .unwrap();
        let debug = format!("{:?}", credential.claims);
        assert!(!debug.contains("U1"));
        assert!(!debug.contains(&credential.claims.jti));

        let debug = format!("{credential:?}");
        assert!(!debug.contains(credential.token.expose_secret()));
    }

    #[test]
    fn test_jti_is_unique_per_issue() {
        let codec = codec();
        let a = codec
            .issue_at(&rider(), CredentialKind::Refresh, Duration::from_secs(60), NOW)
            .unwrap();
        let b = codec
            .issue_at(&rider(), CredentialKind::Refresh, Duration::from_secs(60), NOW)
            .unwrap();
        assert_ne!(a.claims.jti, b.claims.jti);
        assert_ne!(a.token.expose_secret(), b.token.expose_secret());
    }

    #[test]
    fn test_invalid_key_material() {
        assert!(matches!(
            SigningKey::from_pkcs8("k", &[0u8; 10]),
            Err(CredentialError::InvalidKey(_))
        ));
        assert!(matches!(
            VerifyingKey::from_raw("k", &[0u8; 31]),
            Err(CredentialError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(CredentialError::Expired.kind(), Some(ErrorKind::Expired));
        assert_eq!(CredentialError::Malformed.kind(), Some(ErrorKind::Malformed));
        assert_eq!(
            CredentialError::MissingSubject.kind(),
            Some(ErrorKind::MissingSubject)
        );
    }
}
