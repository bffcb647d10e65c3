//! # Configuration Management
//!
//! Loads the runner's settings from multiple sources:
//! - TOML configuration file (config.toml)
//! - Environment variables (with STREAMER prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `AUTH_TOKEN` environment variable (credential token only)
//! 2. Environment variables (STREAMER__ACCOUNT__CHANNEL, STREAMER__CONNECTION__TIMEOUT_MS, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! Nested keys are separated by a double underscore so that field names
//! containing underscores (`timeout_ms`, `expires_at`) survive the mapping.

use crate::error::{StreamError, StreamResult};
use crate::session::{Credential, SessionSettings};
use chrono::{DateTime, Utc};
use config::builder::DefaultState;
use config::ConfigBuilder;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Where to connect, who to log on as, and which token proves it change
/// independently: the endpoint per deployment, the account per operator,
/// the token on every run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub connection: ConnectionConfig,
    pub account: AccountConfig,
    pub credential: CredentialConfig,
}

/// Where and how patiently to connect.
///
/// ## Fields:
/// - `endpoint`: WebSocket URL of the channel server (`ws://` or `wss://`)
/// - `timeout_ms`: budget for connecting, each handshake step, stop and close
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub endpoint: String,
    pub timeout_ms: u64,
}

/// Account and channel used for logon.
#[derive(Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub username: String,
    pub password: String,
    pub channel: String,
}

/// Pre-issued authentication token.
///
/// ## Fields:
/// - `token`: signed token, usually supplied through `AUTH_TOKEN`
/// - `expires_at`: optional RFC 3339 expiry; an expired token is refused before connecting
#[derive(Clone, Serialize, Deserialize)]
pub struct CredentialConfig {
    pub token: String,
    pub expires_at: Option<String>,
}

// Secrets stay out of logs.
impl std::fmt::Debug for AccountConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountConfig")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("channel", &self.channel)
            .finish()
    }
}

impl std::fmt::Debug for CredentialConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialConfig")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Provides default configuration values.
///
/// ## Why defaults matter:
/// The endpoint and timeout work out of the box; account fields are left
/// empty so that `validate` points at exactly what still has to be supplied.
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig {
                endpoint: "wss://zello.io/ws".to_string(),
                timeout_ms: 2000,
            },
            account: AccountConfig {
                username: String::new(),
                password: String::new(),
                channel: String::new(),
            },
            credential: CredentialConfig {
                token: String::new(),
                expires_at: None,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with STREAMER
    /// 4. Override the credential token with `AUTH_TOKEN` if set
    ///
    /// ## Environment Variable Examples:
    /// - `STREAMER__CONNECTION__ENDPOINT=wss://zello.io/ws`
    /// - `STREAMER__ACCOUNT__CHANNEL=Dispatch`
    /// - `AUTH_TOKEN=eyJhbGciOi...`
    pub fn load() -> StreamResult<Self> {
        let mut settings = Self::defaults()?
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("STREAMER").separator("__"));

        if let Ok(token) = env::var("AUTH_TOKEN") {
            settings = settings.set_override("credential.token", token)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Builder seeded with the built-in defaults.
    fn defaults() -> StreamResult<ConfigBuilder<DefaultState>> {
        Ok(config::Config::builder().add_source(config::Config::try_from(&AppConfig::default())?))
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Endpoint is a `ws://` or `wss://` URL
    /// - Timeout is greater than 0
    /// - Username, channel and token are present
    /// - Expiry, if given, is a valid RFC 3339 timestamp
    pub fn validate(&self) -> StreamResult<()> {
        let endpoint = self.connection.endpoint.as_str();
        if !(endpoint.starts_with("ws://") || endpoint.starts_with("wss://")) {
            return Err(StreamError::Config(format!(
                "Endpoint must be a ws:// or wss:// URL, got '{}'",
                endpoint
            )));
        }

        if self.connection.timeout_ms == 0 {
            return Err(StreamError::Config("Timeout must be greater than 0".to_string()));
        }

        if self.account.username.trim().is_empty() {
            return Err(StreamError::Config("Username is required".to_string()));
        }

        if self.account.channel.trim().is_empty() {
            return Err(StreamError::Config("Channel is required".to_string()));
        }

        if self.credential.token.trim().is_empty() {
            return Err(StreamError::Config(
                "Credential token is required (set AUTH_TOKEN)".to_string(),
            ));
        }

        self.expiry()?;
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.connection.timeout_ms)
    }

    /// Session settings for one streaming session.
    pub fn session_settings(&self) -> StreamResult<SessionSettings> {
        let mut credential = Credential::new(self.credential.token.clone());
        if let Some(expiry) = self.expiry()? {
            credential = credential.with_expiry(expiry);
        }

        Ok(SessionSettings::new(
            credential,
            self.account.username.clone(),
            self.account.password.clone(),
            self.account.channel.clone(),
        )
        .with_timeout(self.timeout()))
    }

    fn expiry(&self) -> StreamResult<Option<DateTime<Utc>>> {
        match self.credential.expires_at.as_deref() {
            None => Ok(None),
            Some(raw) => DateTime::parse_from_rfc3339(raw)
                .map(|at| Some(at.with_timezone(&Utc)))
                .map_err(|e| StreamError::Config(format!("Invalid credential expiry '{}': {}", raw, e))),
        }
    }
}
