//! Transport layer abstraction.
//!
//! A transport carries JSON values between the engine and the server. It
//! owns the text framing and keepalive; the engine only sees decoded values.

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};

/// Sends encoded client messages to the server.
///
/// Sends happen while the engine holds its lock, so they must not block on
/// the network.
pub trait Transport: Send + Sync {
    /// Queues one message for delivery.
    fn send(&self, message: Value) -> SyncResult<()>;

    /// Closes the connection. Further sends fail.
    fn close(&self);

    /// Checks if the transport has been closed.
    fn is_closed(&self) -> bool;
}

/// Receives what arrives on a connection.
pub trait ConnectionHandler: Send + Sync {
    /// A message decoded from one text frame.
    fn on_message(&self, message: Value);

    /// A frame that was not valid JSON.
    fn on_malformed(&self, frame: &str, error: &str);

    /// The connection failed or was lost.
    fn on_error(&self, error: &str);
}

/// A transport that records what it is asked to send.
#[derive(Debug, Default)]
pub struct MockTransport {
    sent: Mutex<Vec<Value>>,
    closed: AtomicBool,
    failing: AtomicBool,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages sent so far.
    pub fn sent(&self) -> Vec<Value> {
        self.sent.lock().clone()
    }

    /// Returns and clears the messages sent so far.
    pub fn take_sent(&self) -> Vec<Value> {
        std::mem::take(&mut *self.sent.lock())
    }

    /// Makes subsequent sends fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl Transport for MockTransport {
    fn send(&self, message: Value) -> SyncResult<()> {
        if self.is_closed() {
            return Err(SyncError::Closed);
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(SyncError::Transport("mock send failure".into()));
        }
        self.sent.lock().push(message);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
