//! Auth service configuration.
//!
//! Configuration is loaded from environment variables. Key material is held
//! in `SecretString` and redacted in Debug output.

use base64::{engine::general_purpose, Engine as _};
use common::credential::{CredentialCodec, SigningKey};
use common::jwt::{DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW};
use common::secret::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8082";

/// Default key id stamped into issued credentials.
pub const DEFAULT_SIGNING_KEY_ID: &str = "wayfare-1";

/// Default access credential lifetime (15 minutes).
pub const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: u64 = 900;

/// Default refresh credential lifetime (30 days).
pub const DEFAULT_REFRESH_TOKEN_TTL_SECONDS: u64 = 2_592_000;

/// Default one-time code lifetime.
pub const DEFAULT_OTP_TTL_SECONDS: u64 = 300;

/// Default number of failed code verifications before lockout.
pub const DEFAULT_MAX_LOGIN_ATTEMPTS: u32 = 5;

/// Default lockout window.
pub const DEFAULT_LOCKOUT_WINDOW_SECONDS: u64 = 900;

/// Default interval between ephemeral store purges.
pub const DEFAULT_STORE_PURGE_INTERVAL_SECONDS: u64 = 60;

/// Minimum HMAC key length for one-time codes.
pub const MIN_OTP_SECRET_BYTES: usize = 32;

/// Auth service configuration.
#[derive(Clone)]
pub struct Config {
    /// Server bind address (default: "0.0.0.0:8082").
    pub bind_address: String,

    /// Base64 PKCS#8 Ed25519 private key.
    pub signing_key: SecretString,

    /// Key id written into the credential header.
    pub signing_key_id: String,

    /// Base64 HMAC key for one-time codes (at least 32 bytes decoded).
    pub otp_secret: SecretString,

    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    pub otp_ttl: Duration,
    pub max_login_attempts: u32,
    pub lockout_window: Duration,

    /// Tolerance for `iat` in the future when verifying refresh credentials.
    pub clock_skew: Duration,

    pub store_purge_interval: Duration,

    /// Optional JSON file with `SubjectRecord`s loaded into the identity store.
    pub identity_seed_path: Option<String>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("signing_key", &"[REDACTED]")
            .field("signing_key_id", &self.signing_key_id)
            .field("otp_secret", &"[REDACTED]")
            .field("access_token_ttl", &self.access_token_ttl)
            .field("refresh_token_ttl", &self.refresh_token_ttl)
            .field("otp_ttl", &self.otp_ttl)
            .field("max_login_attempts", &self.max_login_attempts)
            .field("lockout_window", &self.lockout_window)
            .field("clock_skew", &self.clock_skew)
            .field("store_purge_interval", &self.store_purge_interval)
            .field("identity_seed_path", &self.identity_seed_path)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("AUTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let signing_key_id = vars
            .get("AUTH_SIGNING_KEY_ID")
            .cloned()
            .unwrap_or_else(|| DEFAULT_SIGNING_KEY_ID.to_string());

        let signing_key = vars
            .get("AUTH_SIGNING_KEY")
            .ok_or_else(|| ConfigError::MissingEnvVar("AUTH_SIGNING_KEY".to_string()))?;
        let signing_key = SecretString::from(signing_key.clone());
        // Fail at startup rather than on the first login.
        decode_signing_key(&signing_key_id, &signing_key)?;

        let otp_secret = vars
            .get("AUTH_OTP_SECRET")
            .ok_or_else(|| ConfigError::MissingEnvVar("AUTH_OTP_SECRET".to_string()))?;
        let otp_secret = SecretString::from(otp_secret.clone());
        decode_otp_secret(&otp_secret)?;

        let access_token_ttl = parse_seconds(
            vars,
            "AUTH_ACCESS_TOKEN_TTL_SECONDS",
            DEFAULT_ACCESS_TOKEN_TTL_SECONDS,
        )?;
        let refresh_token_ttl = parse_seconds(
            vars,
            "AUTH_REFRESH_TOKEN_TTL_SECONDS",
            DEFAULT_REFRESH_TOKEN_TTL_SECONDS,
        )?;
        if access_token_ttl >= refresh_token_ttl {
            return Err(ConfigError::InvalidValue(format!(
                "AUTH_ACCESS_TOKEN_TTL_SECONDS ({}) must be less than AUTH_REFRESH_TOKEN_TTL_SECONDS ({})",
                access_token_ttl.as_secs(),
                refresh_token_ttl.as_secs()
            )));
        }

        let otp_ttl = parse_seconds(vars, "AUTH_OTP_TTL_SECONDS", DEFAULT_OTP_TTL_SECONDS)?;

        let max_login_attempts = if let Some(value_str) = vars.get("AUTH_MAX_LOGIN_ATTEMPTS") {
            let value: u32 = value_str.parse().map_err(|e| {
                ConfigError::InvalidValue(format!(
                    "AUTH_MAX_LOGIN_ATTEMPTS must be a valid positive integer, got '{value_str}': {e}"
                ))
            })?;
            if value == 0 {
                return Err(ConfigError::InvalidValue(
                    "AUTH_MAX_LOGIN_ATTEMPTS must be greater than 0".to_string(),
                ));
            }
            value
        } else {
            DEFAULT_MAX_LOGIN_ATTEMPTS
        };

        let lockout_window = parse_seconds(
            vars,
            "AUTH_LOCKOUT_WINDOW_SECONDS",
            DEFAULT_LOCKOUT_WINDOW_SECONDS,
        )?;

        let clock_skew = parse_seconds(
            vars,
            "AUTH_CLOCK_SKEW_SECONDS",
            DEFAULT_CLOCK_SKEW.as_secs(),
        )?;
        if clock_skew > MAX_CLOCK_SKEW {
            return Err(ConfigError::InvalidValue(format!(
                "AUTH_CLOCK_SKEW_SECONDS must not exceed {} seconds, got {}",
                MAX_CLOCK_SKEW.as_secs(),
                clock_skew.as_secs()
            )));
        }

        let store_purge_interval = parse_seconds(
            vars,
            "AUTH_STORE_PURGE_INTERVAL_SECONDS",
            DEFAULT_STORE_PURGE_INTERVAL_SECONDS,
        )?;

        let identity_seed_path = vars.get("AUTH_IDENTITY_SEED_PATH").cloned();

        Ok(Config {
            bind_address,
            signing_key,
            signing_key_id,
            otp_secret,
            access_token_ttl,
            refresh_token_ttl,
            otp_ttl,
            max_login_attempts,
            lockout_window,
            clock_skew,
            store_purge_interval,
            identity_seed_path,
        })
    }

    /// Build the signing codec from the configured key.
    pub fn credential_codec(&self) -> Result<CredentialCodec, ConfigError> {
        let key = decode_signing_key(&self.signing_key_id, &self.signing_key)?;
        Ok(CredentialCodec::new(key, self.clock_skew))
    }

    /// Decoded HMAC key bytes for one-time codes.
    pub fn otp_key_bytes(&self) -> Result<Vec<u8>, ConfigError> {
        decode_otp_secret(&self.otp_secret)
    }
}

fn decode_signing_key(kid: &str, b64: &SecretString) -> Result<SigningKey, ConfigError> {
    let pkcs8 = general_purpose::STANDARD
        .decode(b64.expose_secret())
        .map_err(|e| ConfigError::InvalidValue(format!("AUTH_SIGNING_KEY is not base64: {e}")))?;
    SigningKey::from_pkcs8(kid, &pkcs8)
        .map_err(|e| ConfigError::InvalidValue(format!("AUTH_SIGNING_KEY: {e}")))
}

fn decode_otp_secret(b64: &SecretString) -> Result<Vec<u8>, ConfigError> {
    let bytes = general_purpose::STANDARD
        .decode(b64.expose_secret())
        .map_err(|e| ConfigError::InvalidValue(format!("AUTH_OTP_SECRET is not base64: {e}")))?;
    if bytes.len() < MIN_OTP_SECRET_BYTES {
        return Err(ConfigError::InvalidValue(format!(
            "AUTH_OTP_SECRET must decode to at least {MIN_OTP_SECRET_BYTES} bytes, got {}",
            bytes.len()
        )));
    }
    Ok(bytes)
}

fn parse_seconds(
    vars: &HashMap<String, String>,
    name: &str,
    default: u64,
) -> Result<Duration, ConfigError> {
    let Some(value_str) = vars.get(name) else {
        return Ok(Duration::from_secs(default));
    };
    let value: u64 = value_str.parse().map_err(|e| {
        ConfigError::InvalidValue(format!(
            "{name} must be a valid positive integer, got '{value_str}': {e}"
        ))
    })?;
    if value == 0 {
        return Err(ConfigError::InvalidValue(format!(
            "{name} must be greater than 0"
        )));
    }
    Ok(Duration::from_secs(value))
}
