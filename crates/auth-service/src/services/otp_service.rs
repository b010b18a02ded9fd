//! One-time-code login with failed-attempt lockout.
//!
//! Only an HMAC of each code is stored. Codes are single-use and expire
//! after the configured TTL. Failed verifications count against a fixed
//! window; once the count reaches the limit every verification fails with
//! `RateLimited` until the window ends.

use crate::errors::AuthError;
use crate::observability::metrics;
use crate::services::notification::NotificationSender;
use crate::services::token_service::{TokenIssuer, TokenPair};
use crate::store::{keys, EphemeralStore};
use base64::{engine::general_purpose, Engine as _};
use common::identity::IdentityStore;
use common::secret::{ExposeSecret, SecretString};
use common::types::{SubjectId, SubjectIdentity};
use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

/// Number of digits in a login code.
pub const CODE_DIGITS: usize = 6;

const CODE_SPACE: u32 = 1_000_000;

/// Largest multiple of `CODE_SPACE` that fits in a `u32`; draws at or above
/// it are rejected so every code is equally likely.
const CODE_REJECTION_BOUND: u32 = (u32::MAX / CODE_SPACE) * CODE_SPACE;

#[derive(Debug, Clone, Copy)]
pub struct OtpPolicy {
    pub code_ttl: Duration,
    pub max_attempts: u32,
    pub lockout_window: Duration,
}

pub struct OtpService {
    identities: Arc<dyn IdentityStore>,
    store: Arc<dyn EphemeralStore>,
    notifier: Arc<dyn NotificationSender>,
    issuer: Arc<TokenIssuer>,
    key: hmac::Key,
    rng: SystemRandom,
    policy: OtpPolicy,
}

impl OtpService {
    pub fn new(
        identities: Arc<dyn IdentityStore>,
        store: Arc<dyn EphemeralStore>,
        notifier: Arc<dyn NotificationSender>,
        issuer: Arc<TokenIssuer>,
        hmac_key: &[u8],
        policy: OtpPolicy,
    ) -> Self {
        Self {
            identities,
            store,
            notifier,
            issuer,
            key: hmac::Key::new(hmac::HMAC_SHA256, hmac_key),
            rng: SystemRandom::new(),
            policy,
        }
    }

    /// Generate, store and dispatch a login code for `subject_id`.
    ///
    /// Unknown subjects get the same `Ok(())` without a code being sent.
    #[instrument(skip_all)]
    pub async fn request_code(&self, subject_id: &SubjectId) -> Result<(), AuthError> {
        let Some(record) = self.identities.find_subject(subject_id).await? else {
            debug!(target: "auth.otp", "Login code requested for unknown subject");
            metrics::record_otp_requested("unknown_subject");
            return Ok(());
        };

        let code = self.generate_code()?;
        let digest = self.digest(subject_id, &code);
        self.store
            .put(&keys::otp(subject_id.as_str()), digest, self.policy.code_ttl)
            .await?;

        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            notifier.send_login_code(&record, &code).await;
        });

        metrics::record_otp_requested("sent");
        debug!(target: "auth.otp", "Login code issued");
        Ok(())
    }

    /// Check `code` for `subject_id` and, if it matches, issue a pair.
    #[instrument(skip_all)]
    pub async fn verify_code(
        &self,
        subject_id: &SubjectId,
        code: &SecretString,
    ) -> Result<TokenPair, AuthError> {
        let attempts_key = keys::login_attempts(subject_id.as_str());
        let otp_key = keys::otp(subject_id.as_str());

        let failures: u64 = self
            .store
            .get(&attempts_key)
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        if failures >= u64::from(self.policy.max_attempts) {
            warn!(target: "auth.otp", "Login locked out after repeated failures");
            metrics::record_otp_verification("locked_out");
            return Err(AuthError::RateLimited);
        }

        let matches = match self.store.get(&otp_key).await? {
            Some(stored) => self.matches_digest(subject_id, code, &stored),
            None => false,
        };
        if !matches {
            let failures = self
                .store
                .increment(&attempts_key, self.policy.lockout_window)
                .await?;
            debug!(target: "auth.otp", failures, "Login code rejected");
            metrics::record_otp_verification("invalid");
            return Err(AuthError::InvalidCode);
        }

        // Consume; a concurrent verification may have taken it first.
        if self.store.take(&otp_key).await?.is_none() {
            metrics::record_otp_verification("invalid");
            return Err(AuthError::InvalidCode);
        }
        self.store.remove(&attempts_key).await?;

        let Some(record) = self.identities.find_subject(subject_id).await? else {
            debug!(target: "auth.otp", "Subject deleted before code verification");
            metrics::record_otp_verification("invalid");
            return Err(AuthError::InvalidCode);
        };

        let pair = self.issuer.login(&SubjectIdentity {
            subject_id: record.id,
            role: record.role,
        })?;
        metrics::record_otp_verification("success");
        Ok(pair)
    }

    fn generate_code(&self) -> Result<SecretString, AuthError> {
        loop {
            let mut bytes = [0u8; 4];
            self.rng.fill(&mut bytes).map_err(|_| {
                error!(target: "auth.otp", "System RNG failure");
                AuthError::Internal
            })?;
            let value = u32::from_be_bytes(bytes);
            if value < CODE_REJECTION_BOUND {
                let code = format!("{:0width$}", value % CODE_SPACE, width = CODE_DIGITS);
                return Ok(SecretString::from(code));
            }
        }
    }

    fn digest(&self, subject_id: &SubjectId, code: &SecretString) -> String {
        let tag = hmac::sign(&self.key, &message(subject_id, code));
        general_purpose::STANDARD.encode(tag.as_ref())
    }

    fn matches_digest(&self, subject_id: &SubjectId, code: &SecretString, stored: &str) -> bool {
        let Ok(tag) = general_purpose::STANDARD.decode(stored) else {
            return false;
        };
        hmac::verify(&self.key, &message(subject_id, code), &tag).is_ok()
    }
}

fn message(subject_id: &SubjectId, code: &SecretString) -> Vec<u8> {
    format!("{}:{}", subject_id.as_str(), code.expose_secret()).into_bytes()
}
