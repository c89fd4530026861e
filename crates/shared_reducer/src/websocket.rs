//! WebSocket transport.
//!
//! One background task owns the socket. It sends the auth token first when
//! one is configured, then forwards queued outbound messages, delivers
//! inbound text frames, and keeps the connection alive with the `P`/`p`
//! sentinels whenever the server has been quiet for the ping interval.

use crate::config::ReducerConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::{ConnectionHandler, Transport};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use shared_reducer_protocol::{PING, PONG};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, trace, warn};
use url::Url;

enum Command {
    Send(String),
    Close,
}

struct ConnectionParams {
    url: Url,
    token: Option<String>,
    ping_interval: Duration,
    connect_timeout: Duration,
}

/// A [`Transport`] over a single WebSocket connection.
///
/// There is no reconnection: once the connection fails the handler's
/// `on_error` is called and further sends fail with
/// [`SyncError::Connection`].
pub struct WebSocketTransport {
    commands: mpsc::UnboundedSender<Command>,
    closed: AtomicBool,
}

impl WebSocketTransport {
    /// Starts connecting to `url` on `runtime`.
    ///
    /// Returns immediately; messages sent before the handshake completes
    /// are queued.
    pub fn connect(
        url: Url,
        config: &ReducerConfig,
        handler: Arc<dyn ConnectionHandler>,
        runtime: &Handle,
    ) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let params = ConnectionParams {
            url,
            token: config.token.clone(),
            ping_interval: config.ping_interval,
            connect_timeout: config.connect_timeout,
        };
        runtime.spawn(run_connection(params, receiver, handler));

        Self {
            commands,
            closed: AtomicBool::new(false),
        }
    }
}

impl Transport for WebSocketTransport {
    fn send(&self, message: Value) -> SyncResult<()> {
        if self.is_closed() {
            return Err(SyncError::Closed);
        }
        self.commands
            .send(Command::Send(message.to_string()))
            .map_err(|_| SyncError::Connection("connection task has stopped".into()))
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            // The task may already be gone.
            let _ = self.commands.send(Command::Close);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_connection(
    params: ConnectionParams,
    mut commands: mpsc::UnboundedReceiver<Command>,
    handler: Arc<dyn ConnectionHandler>,
) {
    let connected = timeout(params.connect_timeout, connect_async(params.url.as_str())).await;
    let mut socket = match connected {
        Ok(Ok((socket, _response))) => socket,
        Ok(Err(e)) => {
            warn!(url = %params.url, error = %e, "websocket connect failed");
            handler.on_error(&format!("Failed to connect: {e}"));
            return;
        }
        Err(_) => {
            warn!(url = %params.url, "websocket connect timed out");
            handler.on_error("Failed to connect: timed out");
            return;
        }
    };
    debug!(url = %params.url, "websocket connected");

    if let Some(token) = params.token {
        if let Err(e) = socket.send(Message::Text(token)).await {
            handler.on_error(&format!("Failed to send token: {e}"));
            return;
        }
    }

    let ping = sleep(params.ping_interval);
    tokio::pin!(ping);

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Send(text)) => {
                    if let Err(e) = socket.send(Message::Text(text)).await {
                        handler.on_error(&format!("Connection lost: {e}"));
                        return;
                    }
                }
                Some(Command::Close) | None => {
                    let _ = socket.close(None).await;
                    debug!(url = %params.url, "websocket closed");
                    return;
                }
            },
            frame = socket.next() => {
                ping.as_mut().reset(Instant::now() + params.ping_interval);
                match frame {
                    Some(Ok(Message::Text(text))) => deliver(handler.as_ref(), &text),
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => deliver(handler.as_ref(), &text),
                        Err(e) => handler.on_malformed("<binary>", &e.to_string()),
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        handler.on_error("Connection closed by server");
                        return;
                    }
                    // Protocol-level ping/pong only count as activity.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        handler.on_error(&format!("Connection lost: {e}"));
                        return;
                    }
                }
            }
            () = &mut ping => {
                trace!("sending keepalive ping");
                if let Err(e) = socket.send(Message::Text(PING.to_string())).await {
                    handler.on_error(&format!("Connection lost: {e}"));
                    return;
                }
                ping.as_mut().reset(Instant::now() + params.ping_interval);
            }
        }
    }
}

fn deliver(handler: &dyn ConnectionHandler, text: &str) {
    if text == PONG {
        return;
    }
    match serde_json::from_str::<Value>(text) {
        Ok(message) => handler.on_message(message),
        Err(e) => handler.on_malformed(text, &e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl ConnectionHandler for Recorder {
        fn on_message(&self, message: Value) {
            self.events.lock().push(format!("message {message}"));
        }

        fn on_malformed(&self, frame: &str, _error: &str) {
            self.events.lock().push(format!("malformed {frame}"));
        }

        fn on_error(&self, error: &str) {
            self.events.lock().push(format!("error {error}"));
        }
    }

    #[test]
    fn deliver_skips_pong_and_flags_bad_json() {
        let recorder = Recorder::default();
        deliver(&recorder, PONG);
        deliver(&recorder, r#"{"init":1}"#);
        deliver(&recorder, "nope");

        assert_eq!(
            *recorder.events.lock(),
            vec![r#"message {"init":1}"#, "malformed nope"]
        );
    }

    #[tokio::test]
    async fn unreachable_server_reports_failed_to_connect() {
        let recorder = Arc::new(Recorder::default());
        // Port 9 on loopback is the discard port; nothing listens there in CI.
        let url = Url::parse("ws://127.0.0.1:9/").unwrap();
        let config = ReducerConfig::new(url.as_str()).with_connect_timeout(Duration::from_secs(5));
        let transport = WebSocketTransport::connect(
            url,
            &config,
            Arc::clone(&recorder) as Arc<dyn ConnectionHandler>,
            &Handle::current(),
        );

        for _ in 0..100 {
            if !recorder.events.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let events = recorder.events.lock().clone();
        assert_eq!(events.len(), 1);
        assert!(events[0].starts_with("error Failed to connect"));

        // The task exits right after reporting; sends then fail.
        let mut outcome = transport.send(Value::Null);
        for _ in 0..100 {
            if outcome.is_err() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            outcome = transport.send(Value::Null);
        }
        assert!(matches!(outcome, Err(SyncError::Connection(_))));
        assert!(outcome.unwrap_err().is_fatal());

        transport.close();
        assert_eq!(transport.send(Value::Null), Err(SyncError::Closed));
    }
}
