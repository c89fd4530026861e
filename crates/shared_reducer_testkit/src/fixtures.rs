//! Observers that record into channels, and helpers to await them.

use crate::error::{TestkitError, TestkitResult};
use serde_json::{json, Value};
use shared_reducer::Observers;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// How long helpers wait before giving up.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(5);

/// The state every end-to-end test starts from.
pub fn initial_state() -> Value {
    json!({"foo": "v1", "bar": 10})
}

/// Awaits `future` for at most [`DEFAULT_WAIT`].
pub async fn within<F: Future>(what: &'static str, future: F) -> TestkitResult<F::Output> {
    tokio::time::timeout(DEFAULT_WAIT, future)
        .await
        .map_err(|_| TestkitError::Timeout(what))
}

/// Receiving side of [`Probe::observers`].
#[derive(Debug)]
pub struct Probe<T> {
    changes: mpsc::UnboundedReceiver<Arc<T>>,
    warnings: mpsc::UnboundedReceiver<String>,
    errors: mpsc::UnboundedReceiver<String>,
}

impl<T: Send + Sync + 'static> Probe<T> {
    /// Creates observers that forward everything to the returned probe.
    pub fn observers() -> (Observers<T>, Self) {
        let (change_tx, changes) = mpsc::unbounded_channel();
        let (warning_tx, warnings) = mpsc::unbounded_channel();
        let (error_tx, errors) = mpsc::unbounded_channel();

        let observers = Observers::new()
            .with_change_handler(move |state| {
                let _ = change_tx.send(state);
            })
            .with_warning_handler(move |text| {
                let _ = warning_tx.send(text.to_string());
            })
            .with_error_handler(move |text| {
                let _ = error_tx.send(text.to_string());
            });

        (
            observers,
            Self {
                changes,
                warnings,
                errors,
            },
        )
    }

    /// Waits for the next observed state.
    pub async fn next_change(&mut self) -> TestkitResult<Arc<T>> {
        within("state change", self.changes.recv())
            .await?
            .ok_or(TestkitError::ChannelClosed("change"))
    }

    /// Waits for the next warning.
    pub async fn next_warning(&mut self) -> TestkitResult<String> {
        within("warning", self.warnings.recv())
            .await?
            .ok_or(TestkitError::ChannelClosed("warning"))
    }

    /// Waits for the next connection error.
    pub async fn next_error(&mut self) -> TestkitResult<String> {
        within("error", self.errors.recv())
            .await?
            .ok_or(TestkitError::ChannelClosed("error"))
    }

    /// Observed states not yet taken.
    pub fn pending_changes(&mut self) -> Vec<Arc<T>> {
        let mut pending = Vec::new();
        while let Ok(state) = self.changes.try_recv() {
            pending.push(state);
        }
        pending
    }

    /// Warnings not yet taken.
    pub fn pending_warnings(&mut self) -> Vec<String> {
        let mut pending = Vec::new();
        while let Ok(text) = self.warnings.try_recv() {
            pending.push(text);
        }
        pending
    }

    /// Errors not yet taken.
    pub fn pending_errors(&mut self) -> Vec<String> {
        let mut pending = Vec::new();
        while let Ok(text) = self.errors.try_recv() {
            pending.push(text);
        }
        pending
    }
}
