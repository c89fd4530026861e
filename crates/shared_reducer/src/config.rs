//! Configuration for the shared reducer.

use crate::error::{SyncError, SyncResult};
use shared_reducer_protocol::DEFAULT_PING_INTERVAL;
use std::time::Duration;
use url::Url;

/// Connection settings for a shared reducer.
#[derive(Debug, Clone)]
pub struct ReducerConfig {
    /// WebSocket URL of the shared resource (`ws://` or `wss://`).
    pub url: String,
    /// Optional auth token, sent as the first frame after connecting.
    pub token: Option<String>,
    /// Inbound silence tolerated before a keepalive ping is sent.
    pub ping_interval: Duration,
    /// Maximum time allowed for the connection handshake.
    pub connect_timeout: Duration,
}

impl ReducerConfig {
    /// Creates a new configuration for the given URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: None,
            ping_interval: DEFAULT_PING_INTERVAL,
            connect_timeout: Duration::from_secs(30),
        }
    }

    /// Sets the auth token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Sets the keepalive interval.
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Sets the connection timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Checks the configuration, returning the parsed URL.
    pub fn validate(&self) -> SyncResult<Url> {
        let url = Url::parse(&self.url)
            .map_err(|e| SyncError::Config(format!("invalid url {:?}: {e}", self.url)))?;

        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(SyncError::Config(format!(
                "unsupported url scheme {:?}, expected ws or wss",
                url.scheme()
            )));
        }

        if self.ping_interval.is_zero() {
            return Err(SyncError::Config("ping interval must be non-zero".into()));
        }

        if self.connect_timeout.is_zero() {
            return Err(SyncError::Config("connect timeout must be non-zero".into()));
        }

        if matches!(self.token.as_deref(), Some("")) {
            return Err(SyncError::Config("token must not be empty".into()));
        }

        Ok(url)
    }
}
