//! # Session Settings
//!
//! Read-only inputs of a session: the pre-issued credential, the account and
//! channel to log on with, and the wait budget shared by every bounded step.
//! Settings are cloned per session, so concurrent sessions share nothing
//! mutable.

use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

/// Default wait budget for connect, each handshake step, stop and close.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Signed authentication token issued outside this crate.
///
/// The token is opaque here. It must still be valid when the session starts;
/// it is never refreshed mid-stream.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            expires_at: None,
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Whether the credential is past its expiry at `now`. Credentials without an expiry never expire.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expiry| expiry <= now)
    }
}

// Keeps tokens out of logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Everything a session needs besides its connector and audio.
#[derive(Clone)]
pub struct SessionSettings {
    pub credential: Credential,
    pub username: String,
    pub password: String,
    pub channel: String,
    pub timeout: Duration,
}

impl SessionSettings {
    pub fn new(
        credential: Credential,
        username: impl Into<String>,
        password: impl Into<String>,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            credential,
            username: username.into(),
            password: password.into(),
            channel: channel.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl fmt::Debug for SessionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSettings")
            .field("credential", &self.credential)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("channel", &self.channel)
            .field("timeout", &self.timeout)
            .finish()
    }
}
