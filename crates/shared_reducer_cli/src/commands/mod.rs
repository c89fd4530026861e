//! CLI command implementations.

pub mod apply;
pub mod watch;

use serde_json::Value;
use shared_reducer::{ReducerConfig, SyncError};
use std::time::Duration;
use thiserror::Error;

/// Errors that end a command.
#[derive(Error, Debug)]
pub enum CliError {
    /// Engine failure, including rejection of the applied delta.
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// The delta argument was not valid.
    #[error("invalid delta: {0}")]
    InvalidDelta(#[from] serde_json::Error),

    /// The connection failed.
    #[error("{0}")]
    Connection(String),

    /// No confirmation arrived in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Settings shared by every command.
pub struct Options {
    /// Auth token.
    pub token: Option<String>,
    /// Keepalive interval.
    pub ping_interval: Duration,
    /// Pretty-print JSON output.
    pub pretty: bool,
}

impl Options {
    /// Builds the reducer configuration for `url`.
    pub fn config(&self, url: &str) -> ReducerConfig {
        let config = ReducerConfig::new(url).with_ping_interval(self.ping_interval);
        match &self.token {
            Some(token) => config.with_token(token.clone()),
            None => config,
        }
    }

    /// Prints a state on stdout.
    pub fn print(&self, state: &Value) -> Result<(), CliError> {
        let text = if self.pretty {
            serde_json::to_string_pretty(state)?
        } else {
            serde_json::to_string(state)?
        };
        println!("{}", text);
        Ok(())
    }
}
