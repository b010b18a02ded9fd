//! Credential pair issue, rotation and logout.
//!
//! Rotation is single-use: the presented refresh credential's `jti` is
//! recorded in the revocation store (atomically, until its own expiry) before
//! the new pair is issued, so two concurrent rotations of the same refresh
//! credential cannot both succeed. Other refresh credentials of the same
//! subject are unaffected.

use crate::errors::AuthError;
use crate::observability::metrics;
use crate::store::{keys, EphemeralStore, StoreError};
use async_trait::async_trait;
use common::credential::{Claims, Credential, CredentialCodec, CredentialKind};
use common::identity::IdentityStore;
use common::types::SubjectIdentity;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Lifetimes for issued credentials.
#[derive(Debug, Clone, Copy)]
pub struct TokenPolicy {
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

/// A freshly issued (access, refresh) pair.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access: Credential,
    pub refresh: Credential,
    /// Access credential lifetime in seconds.
    pub expires_in: u64,
}

/// Record of refresh credentials that may no longer be used.
#[async_trait]
pub trait RevocationStore: Send + Sync {
    /// Revoke `jti` until `expires_at` (unix seconds). Returns `false` if it
    /// was already revoked.
    async fn revoke(&self, jti: &str, expires_at: i64) -> Result<bool, StoreError>;

    async fn is_revoked(&self, jti: &str) -> Result<bool, StoreError>;
}

/// [`RevocationStore`] over the ephemeral store (`revoked-refresh:<jti>`).
pub struct EphemeralRevocationStore {
    store: Arc<dyn EphemeralStore>,
}

impl EphemeralRevocationStore {
    pub fn new(store: Arc<dyn EphemeralStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RevocationStore for EphemeralRevocationStore {
    async fn revoke(&self, jti: &str, expires_at: i64) -> Result<bool, StoreError> {
        let remaining = expires_at.saturating_sub(chrono::Utc::now().timestamp());
        // Entries must outlive the credential; keep at least one second.
        let ttl = Duration::from_secs(u64::try_from(remaining).unwrap_or(0).max(1));
        self.store
            .put_if_absent(&keys::revoked_refresh(jti), "1".to_string(), ttl)
            .await
    }

    async fn is_revoked(&self, jti: &str) -> Result<bool, StoreError> {
        Ok(self
            .store
            .get(&keys::revoked_refresh(jti))
            .await?
            .is_some())
    }
}

pub struct TokenIssuer {
    codec: Arc<CredentialCodec>,
    policy: TokenPolicy,
    revocations: Arc<dyn RevocationStore>,
    identities: Arc<dyn IdentityStore>,
}

impl TokenIssuer {
    pub fn new(
        codec: Arc<CredentialCodec>,
        policy: TokenPolicy,
        revocations: Arc<dyn RevocationStore>,
        identities: Arc<dyn IdentityStore>,
    ) -> Self {
        Self {
            codec,
            policy,
            revocations,
            identities,
        }
    }

    pub fn policy(&self) -> TokenPolicy {
        self.policy
    }

    /// Issue a fresh pair for `identity`.
    #[instrument(skip_all, fields(role = %identity.role))]
    pub fn login(&self, identity: &SubjectIdentity) -> Result<TokenPair, AuthError> {
        let pair = self.issue_pair(identity)?;
        metrics::record_tokens_issued("login");
        info!(target: "auth.token", role = %identity.role, "Issued credential pair");
        Ok(pair)
    }

    /// Exchange a refresh credential for a brand-new pair.
    ///
    /// Fails with `InvalidRefresh` if the credential does not verify, is not
    /// a refresh credential, was already rotated or revoked, or its subject
    /// no longer exists.
    #[instrument(skip_all)]
    pub async fn rotate(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let claims = self.verify_refresh(refresh_token, "rotate")?;

        let newly_revoked = self.revocations.revoke(&claims.jti, claims.exp).await?;
        if !newly_revoked {
            warn!(target: "auth.token", "Refresh credential reused after rotation or logout");
            metrics::record_refresh_rejected("reused");
            return Err(AuthError::InvalidRefresh);
        }

        if self.identities.find_subject(&claims.subject_id()).await?.is_none() {
            debug!(target: "auth.token", "Refresh subject no longer exists");
            metrics::record_refresh_rejected("unknown_subject");
            return Err(AuthError::InvalidRefresh);
        }

        let pair = self.issue_pair(&claims.identity())?;
        metrics::record_tokens_issued("rotate");
        debug!(target: "auth.token", role = %claims.role, "Rotated credential pair");
        Ok(pair)
    }

    /// Revoke a refresh credential. Credentials that no longer verify are
    /// already unusable, so this succeeds for them too.
    #[instrument(skip_all)]
    pub async fn logout(&self, refresh_token: &str) -> Result<(), AuthError> {
        let Ok(claims) = self.verify_refresh(refresh_token, "logout") else {
            return Ok(());
        };
        self.revocations.revoke(&claims.jti, claims.exp).await?;
        debug!(target: "auth.token", "Refresh credential revoked on logout");
        Ok(())
    }

    /// Whether a refresh credential has been rotated or revoked.
    pub async fn is_revoked(&self, claims: &Claims) -> Result<bool, AuthError> {
        Ok(self.revocations.is_revoked(&claims.jti).await?)
    }

    fn verify_refresh(&self, token: &str, operation: &str) -> Result<Claims, AuthError> {
        let claims = self.codec.verify(token).map_err(|e| {
            debug!(target: "auth.token", operation, error = %e, "Refresh credential rejected");
            metrics::record_refresh_rejected(e.kind().map_or("malformed", |k| k.as_str()));
            AuthError::InvalidRefresh
        })?;

        if claims.kind != CredentialKind::Refresh {
            debug!(target: "auth.token", operation, "Access credential presented as refresh");
            metrics::record_refresh_rejected("wrong_kind");
            return Err(AuthError::InvalidRefresh);
        }

        Ok(claims)
    }

    fn issue_pair(&self, identity: &SubjectIdentity) -> Result<TokenPair, AuthError> {
        let access = self
            .codec
            .issue(identity, CredentialKind::Access, self.policy.access_ttl)?;
        let refresh = self
            .codec
            .issue(identity, CredentialKind::Refresh, self.policy.refresh_ttl)?;
        Ok(TokenPair {
            access,
            refresh,
            expires_in: self.policy.access_ttl.as_secs(),
        })
    }
}
