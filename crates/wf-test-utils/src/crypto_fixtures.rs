//! Deterministic cryptographic fixtures.
//!
//! The same seed always yields the same Ed25519 keypair, so tokens signed in
//! one process can be checked against keys built in another.

use base64::engine::general_purpose;
use base64::Engine;
use common::credential::{CredentialCodec, SigningKey, VerifyingKey};
use common::jwt::DEFAULT_CLOCK_SKEW;
use ring::signature::{Ed25519KeyPair, KeyPair};
use thiserror::Error;

/// Key id used by every fixture codec and harness.
pub const TEST_KEY_ID: &str = "wayfare-test-1";

#[derive(Error, Debug)]
pub enum FixtureError {
    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),
}

/// 32-byte Ed25519 seed derived from `seed`.
pub fn test_seed_bytes(seed: u8) -> [u8; 32] {
    let mut seed_bytes = [0u8; 32];
    seed_bytes[0] = seed;
    for (i, byte) in seed_bytes.iter_mut().enumerate().skip(1) {
        *byte = seed.wrapping_mul(i as u8).wrapping_add(i as u8);
    }
    seed_bytes
}

/// Deterministic keypair as `(pkcs8_v1_der, raw_public_key)`.
pub fn test_keypair(seed: u8) -> Result<(Vec<u8>, Vec<u8>), FixtureError> {
    let seed_bytes = test_seed_bytes(seed);
    let key_pair = Ed25519KeyPair::from_seed_unchecked(&seed_bytes)
        .map_err(|e| FixtureError::Crypto(format!("Failed to generate test keypair: {e:?}")))?;
    let public_key = key_pair.public_key().as_ref().to_vec();
    Ok((build_pkcs8_from_seed(&seed_bytes), public_key))
}

/// PKCS#8 v1 document (RFC 5208) wrapping an Ed25519 seed.
fn build_pkcs8_from_seed(seed: &[u8; 32]) -> Vec<u8> {
    let mut pkcs8 = Vec::with_capacity(48);
    // SEQUENCE, 46 bytes
    pkcs8.extend_from_slice(&[0x30, 0x2e]);
    // version INTEGER 0
    pkcs8.extend_from_slice(&[0x02, 0x01, 0x00]);
    // AlgorithmIdentifier SEQUENCE { OID 1.3.101.112 }
    pkcs8.extend_from_slice(&[0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70]);
    // privateKey OCTET STRING { OCTET STRING seed }
    pkcs8.extend_from_slice(&[0x04, 0x22, 0x04, 0x20]);
    pkcs8.extend_from_slice(seed);
    pkcs8
}

pub fn test_signing_key(seed: u8) -> SigningKey {
    let (pkcs8, _) = test_keypair(seed).expect("test keypair");
    SigningKey::from_pkcs8(TEST_KEY_ID, &pkcs8).expect("test signing key")
}

pub fn test_verifying_key(seed: u8) -> VerifyingKey {
    test_signing_key(seed).verifying_key()
}

/// Codec that issues and verifies with the seeded key.
pub fn test_codec(seed: u8) -> CredentialCodec {
    CredentialCodec::new(test_signing_key(seed), DEFAULT_CLOCK_SKEW)
}

/// Codec that only verifies against the seeded key, as the chat service does.
pub fn test_verify_only_codec(seed: u8) -> CredentialCodec {
    CredentialCodec::verify_only([test_verifying_key(seed)], DEFAULT_CLOCK_SKEW)
}

/// Value for `AUTH_SIGNING_KEY`.
pub fn signing_key_b64(seed: u8) -> String {
    let (pkcs8, _) = test_keypair(seed).expect("test keypair");
    general_purpose::STANDARD.encode(pkcs8)
}

/// Value for `AUTH_PUBLIC_KEY`.
pub fn public_key_b64(seed: u8) -> String {
    let (_, public_key) = test_keypair(seed).expect("test keypair");
    general_purpose::STANDARD.encode(public_key)
}

/// Value for `AUTH_OTP_SECRET`.
pub fn otp_secret_b64() -> String {
    general_purpose::STANDARD.encode([0x5au8; 32])
}
