//! Builders for test credentials.

use chrono::Utc;
use common::credential::{Claims, CredentialCodec, CredentialKind};
use common::types::Role;

/// Builder for signed test credentials.
///
/// # Example
/// ```rust,ignore
/// let codec = test_codec(1);
/// let expired = TestTokenBuilder::new(&codec).for_subject("U1").expired().build();
/// ```
pub struct TestTokenBuilder<'a> {
    codec: &'a CredentialCodec,
    claims: Claims,
}

impl<'a> TestTokenBuilder<'a> {
    /// Access credential for `U1` as a rider, valid for an hour.
    pub fn new(codec: &'a CredentialCodec) -> Self {
        let now = Utc::now().timestamp();
        Self {
            codec,
            claims: Claims {
                sub: crate::test_ids::U1.to_string(),
                role: Role::Rider,
                kind: CredentialKind::Access,
                iat: now,
                exp: now + 3600,
                jti: format!("test-jti-{now}-{}", next_jti_suffix()),
            },
        }
    }

    pub fn for_subject(mut self, subject: &str) -> Self {
        self.claims.sub = subject.to_string();
        self
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.claims.role = role;
        self
    }

    pub fn refresh(mut self) -> Self {
        self.claims.kind = CredentialKind::Refresh;
        self
    }

    /// Set expiration in seconds from now. Negative values are in the past.
    pub fn expires_in(mut self, seconds: i64) -> Self {
        self.claims.exp = Utc::now().timestamp() + seconds;
        self
    }

    /// Issued two hours ago, expired one hour ago.
    pub fn expired(mut self) -> Self {
        let now = Utc::now().timestamp();
        self.claims.iat = now - 7200;
        self.claims.exp = now - 3600;
        self
    }

    pub fn issued_at(mut self, timestamp: i64) -> Self {
        self.claims.iat = timestamp;
        self
    }

    pub fn without_subject(mut self) -> Self {
        self.claims.sub = String::new();
        self
    }

    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    pub fn build(self) -> String {
        self.codec.encode(&self.claims).expect("test codec must sign")
    }
}

fn next_jti_suffix() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Corrupt the signature of a compact token while keeping it well formed.
pub fn tamper(token: &str) -> String {
    let signature_start = token.rfind('.').expect("compact token") + 1;
    let mut bytes = token.as_bytes().to_vec();
    bytes[signature_start] = if bytes[signature_start] == b'A' { b'B' } else { b'A' };
    String::from_utf8(bytes).expect("token is ascii")
}
