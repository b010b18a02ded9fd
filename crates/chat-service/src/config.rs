//! Chat service configuration.
//!
//! Configuration is loaded from environment variables. The service only
//! verifies credentials, so it holds the public half of the signing key.

use common::credential::{CredentialCodec, VerifyingKey};
use common::jwt::{DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW};
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8084";

/// Default key id expected in credential headers.
pub const DEFAULT_SIGNING_KEY_ID: &str = "wayfare-1";

/// Default maximum message length, in characters, after trimming.
pub const DEFAULT_MAX_MESSAGE_CHARS: usize = 2000;

/// Default interval between empty-room sweeps.
pub const DEFAULT_ROOM_REAP_INTERVAL_SECONDS: u64 = 60;

#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (default: "0.0.0.0:8084").
    pub bind_address: String,

    /// Base64 raw Ed25519 public key of the auth service.
    pub public_key: String,

    pub signing_key_id: String,

    pub clock_skew: Duration,

    pub max_message_chars: usize,

    pub room_reap_interval: Duration,

    /// How often open channels re-check their credential. `None` disables.
    pub channel_reverify_interval: Option<Duration>,

    /// Optional JSON file with `SubjectRecord`s loaded into the identity store.
    pub identity_seed_path: Option<String>,

    /// Optional JSON file with `TripRecord`s loaded into the conversation store.
    pub trips_seed_path: Option<String>,
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
            .get("CHAT_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let signing_key_id = vars
            .get("AUTH_SIGNING_KEY_ID")
            .cloned()
            .unwrap_or_else(|| DEFAULT_SIGNING_KEY_ID.to_string());

        let public_key = vars
            .get("AUTH_PUBLIC_KEY")
            .ok_or_else(|| ConfigError::MissingEnvVar("AUTH_PUBLIC_KEY".to_string()))?
            .clone();
        VerifyingKey::from_base64(signing_key_id.as_str(), &public_key)
            .map_err(|e| ConfigError::InvalidValue(format!("AUTH_PUBLIC_KEY: {e}")))?;

        let clock_skew = parse_seconds(vars, "CHAT_CLOCK_SKEW_SECONDS")?
            .unwrap_or(DEFAULT_CLOCK_SKEW);
        if clock_skew > MAX_CLOCK_SKEW {
            return Err(ConfigError::InvalidValue(format!(
                "CHAT_CLOCK_SKEW_SECONDS must not exceed {} seconds, got {}",
                MAX_CLOCK_SKEW.as_secs(),
                clock_skew.as_secs()
            )));
        }

        let max_message_chars = if let Some(value_str) = vars.get("CHAT_MAX_MESSAGE_CHARS") {
            let value: usize = value_str.parse().map_err(|e| {
                ConfigError::InvalidValue(format!(
                    "CHAT_MAX_MESSAGE_CHARS must be a valid positive integer, got '{value_str}': {e}"
                ))
            })?;
            if value == 0 {
                return Err(ConfigError::InvalidValue(
                    "CHAT_MAX_MESSAGE_CHARS must be greater than 0".to_string(),
                ));
            }
            value
        } else {
            DEFAULT_MAX_MESSAGE_CHARS
        };

        let room_reap_interval = parse_seconds(vars, "CHAT_ROOM_REAP_INTERVAL_SECONDS")?
            .unwrap_or(Duration::from_secs(DEFAULT_ROOM_REAP_INTERVAL_SECONDS));

        let channel_reverify_interval = parse_seconds(vars, "CHAT_CHANNEL_REVERIFY_SECONDS")?;

        Ok(Config {
            bind_address,
            public_key,
            signing_key_id,
            clock_skew,
            max_message_chars,
            room_reap_interval,
            channel_reverify_interval,
            identity_seed_path: vars.get("CHAT_IDENTITY_SEED_PATH").cloned(),
            trips_seed_path: vars.get("CHAT_TRIPS_SEED_PATH").cloned(),
        })
    }

    /// Build the verify-only codec from the configured public key.
    pub fn credential_codec(&self) -> Result<CredentialCodec, ConfigError> {
        let key = VerifyingKey::from_base64(self.signing_key_id.as_str(), &self.public_key)
            .map_err(|e| ConfigError::InvalidValue(format!("AUTH_PUBLIC_KEY: {e}")))?;
        Ok(CredentialCodec::verify_only([key], self.clock_skew))
    }
}

/// Parse an optional positive number of seconds.
fn parse_seconds(
    vars: &HashMap<String, String>,
    name: &str,
) -> Result<Option<Duration>, ConfigError> {
    let Some(value_str) = vars.get(name) else {
        return Ok(None);
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
    Ok(Some(Duration::from_secs(value)))
}
