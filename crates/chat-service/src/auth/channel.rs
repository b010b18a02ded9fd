//! Credential verification for both transports.
//!
//! A bearer credential is accepted only if it verifies as an access
//! credential and its subject still exists in the identity store. The same
//! authenticator runs at WebSocket handshake time and in the HTTP middleware,
//! so an identity means the same thing on both.

use crate::errors::ChatError;
use crate::observability::metrics;
use axum::http::HeaderMap;
use common::credential::{CredentialCodec, CredentialKind};
use common::identity::IdentityStore;
use common::secret::parse_bearer;
use common::types::SubjectIdentity;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// A verified connection identity and the expiry of the credential that
/// produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authenticated {
    pub identity: SubjectIdentity,
    /// Unix seconds.
    pub expires_at: i64,
}

pub struct ChannelAuthenticator {
    codec: Arc<CredentialCodec>,
    identities: Arc<dyn IdentityStore>,
}

impl ChannelAuthenticator {
    pub fn new(codec: Arc<CredentialCodec>, identities: Arc<dyn IdentityStore>) -> Self {
        Self { codec, identities }
    }

    /// Verify `token` and resolve it to a live subject.
    ///
    /// # Errors
    ///
    /// - `Unauthenticated` for any verification failure, including a refresh
    ///   credential presented in place of an access credential
    /// - `UnknownSubject` if the subject no longer exists
    #[instrument(skip_all)]
    pub async fn authenticate(&self, token: &str) -> Result<Authenticated, ChatError> {
        self.authenticate_at(token, chrono::Utc::now().timestamp())
            .await
    }

    /// [`authenticate`](Self::authenticate) against an explicit `now`.
    pub async fn authenticate_at(&self, token: &str, now: i64) -> Result<Authenticated, ChatError> {
        let claims = self.codec.verify_at(token, now).map_err(|e| {
            let reason = e.kind().map_or("invalid_key", |k| k.as_str());
            debug!(target: "chat.auth", reason, "Credential rejected");
            metrics::record_auth_failure(reason);
            ChatError::Unauthenticated(e.to_string())
        })?;

        if claims.kind != CredentialKind::Access {
            debug!(target: "chat.auth", "Refresh credential presented as access credential");
            metrics::record_auth_failure("wrong_kind");
            return Err(ChatError::Unauthenticated(
                "not an access credential".to_string(),
            ));
        }

        self.ensure_subject_exists(&claims.identity()).await?;

        Ok(Authenticated {
            identity: claims.identity(),
            expires_at: claims.exp,
        })
    }

    /// Re-check a connection identity: the credential must not have expired
    /// and the subject must still exist.
    pub async fn reverify(&self, authenticated: &Authenticated) -> Result<(), ChatError> {
        if chrono::Utc::now().timestamp() >= authenticated.expires_at {
            metrics::record_auth_failure("expired");
            return Err(ChatError::Unauthenticated(
                "credential expired".to_string(),
            ));
        }
        self.ensure_subject_exists(&authenticated.identity).await
    }

    async fn ensure_subject_exists(&self, identity: &SubjectIdentity) -> Result<(), ChatError> {
        match self.identities.find_subject(&identity.subject_id).await {
            Ok(Some(_)) => Ok(()),
            Ok(None) => {
                debug!(target: "chat.auth", "Credential subject no longer exists");
                metrics::record_auth_failure("unknown_subject");
                Err(ChatError::UnknownSubject)
            }
            Err(e) => {
                warn!(target: "chat.auth", error = %e, "Identity store lookup failed");
                Err(ChatError::Internal(e.to_string()))
            }
        }
    }
}

/// Credential from `Authorization: Bearer`, falling back to `?token=`.
pub fn token_from_handshake<'a>(
    headers: &'a HeaderMap,
    query_token: Option<&'a str>,
) -> Option<&'a str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(parse_bearer)
        .or_else(|| query_token.map(str::trim).filter(|t| !t.is_empty()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::identity::{InMemoryIdentityStore, SubjectRecord};
    use common::secret::ExposeSecret;
    use common::types::{Role, SubjectId};
    use std::time::Duration;

    fn generate_codec() -> Arc<CredentialCodec> {
        Arc::new(wf_test_utils::test_codec(1))
    }

    fn rider() -> SubjectIdentity {
        SubjectIdentity {
            subject_id: SubjectId::new("U1"),
            role: Role::Rider,
        }
    }

    fn authenticator(codec: Arc<CredentialCodec>) -> (ChannelAuthenticator, Arc<InMemoryIdentityStore>) {
        let identities = Arc::new(InMemoryIdentityStore::with_subjects([SubjectRecord {
            id: SubjectId::new("U1"),
            role: Role::Rider,
            display_name: "Rider One".to_string(),
            contact: "u1@example.com".to_string(),
        }]));
        (
            ChannelAuthenticator::new(codec, identities.clone()),
            identities,
        )
    }

    #[tokio::test]
    async fn test_valid_access_credential() {
        let codec = generate_codec();
        let (auth, _) = authenticator(codec.clone());
        let credential = codec
            .issue(&rider(), CredentialKind::Access, Duration::from_secs(60))
            .unwrap();

        let authenticated = auth
            .authenticate(credential.token.expose_secret())
            .await
            .unwrap();
        assert_eq!(authenticated.identity, rider());
        assert_eq!(authenticated.expires_at, credential.claims.exp);
    }

    #[tokio::test]
    async fn test_expired_credential_is_unauthenticated() {
        let codec = generate_codec();
        let (auth, _) = authenticator(codec.clone());
        let credential = codec
            .issue_at(&rider(), CredentialKind::Access, Duration::from_secs(60), 1_000)
            .unwrap();

        let result = auth.authenticate(credential.token.expose_secret()).await;
        assert!(matches!(result, Err(ChatError::Unauthenticated(_))));
    }

    #[tokio::test]
    async fn test_refresh_credential_rejected() {
        let codec = generate_codec();
        let (auth, _) = authenticator(codec.clone());
        let credential = codec
            .issue(&rider(), CredentialKind::Refresh, Duration::from_secs(60))
            .unwrap();

        let result = auth.authenticate(credential.token.expose_secret()).await;
        assert!(matches!(result, Err(ChatError::Unauthenticated(_))));
    }

    #[tokio::test]
    async fn test_deleted_subject_is_unknown() {
        let codec = generate_codec();
        let (auth, identities) = authenticator(codec.clone());
        let credential = codec
            .issue(&rider(), CredentialKind::Access, Duration::from_secs(60))
            .unwrap();

        identities.remove(&SubjectId::new("U1")).await;
        let result = auth.authenticate(credential.token.expose_secret()).await;
        assert_eq!(result, Err(ChatError::UnknownSubject));
    }

    #[tokio::test]
    async fn test_reverify() {
        let codec = generate_codec();
        let (auth, identities) = authenticator(codec);
        let live = Authenticated {
            identity: rider(),
            expires_at: chrono::Utc::now().timestamp() + 60,
        };
        assert!(auth.reverify(&live).await.is_ok());

        let expired = Authenticated {
            identity: rider(),
            expires_at: chrono::Utc::now().timestamp() - 1,
        };
        assert!(matches!(
            auth.reverify(&expired).await,
            Err(ChatError::Unauthenticated(_))
        ));

        identities.remove(&SubjectId::new("U1")).await;
        assert_eq!(auth.reverify(&live).await, Err(ChatError::UnknownSubject));
    }

    #[test]
    fn test_token_from_handshake() {
        let mut headers = HeaderMap::new();
        assert_eq!(token_from_handshake(&headers, None), None);
        assert_eq!(token_from_handshake(&headers, Some("q")), Some("q"));
        assert_eq!(token_from_handshake(&headers, Some("  ")), None);

        headers.insert("authorization", "Bearer h".parse().unwrap());
        assert_eq!(token_from_handshake(&headers, Some("q")), Some("h"));

        headers.insert("authorization", "Basic abc".parse().unwrap());
        assert_eq!(token_from_handshake(&headers, Some("q")), Some("q"));
    }
}
