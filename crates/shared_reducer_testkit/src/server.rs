//! A WebSocket front end for a [`Broadcaster`].
//!
//! Routes:
//! - `/{resource}` subscribes read-write
//! - `/{resource}/read` subscribes read-only
//!
//! When a token is configured the first frame of each connection must
//! carry it. `P` frames are answered with `p` and never reach the
//! broadcaster.

use crate::broadcaster::{Broadcaster, Permission, Subscription};
use crate::error::TestkitResult;
use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use shared_reducer::Context;
use shared_reducer_protocol::{PING, PONG};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tracing::{debug, warn};

/// Test server configuration.
#[derive(Debug, Clone, Default)]
pub struct TestServerConfig {
    /// Required first frame of every connection.
    pub token: Option<String>,
}

impl TestServerConfig {
    /// Creates a configuration that accepts every connection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires `token` as the first frame.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

/// Counters shared with connection tasks.
#[derive(Debug, Default)]
struct Counters {
    pings: AtomicUsize,
    connections: AtomicUsize,
}

/// A running server on a loopback port.
///
/// Dropping it stops the listener and every connection.
pub struct TestServer {
    addr: SocketAddr,
    counters: Arc<Counters>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl TestServer {
    /// Binds to `127.0.0.1:0` and starts serving `broadcaster`.
    pub async fn start<C>(
        broadcaster: Arc<Broadcaster<C>>,
        config: TestServerConfig,
    ) -> TestkitResult<Self>
    where
        C: Context,
        C::State: Serialize,
        C::Delta: Serialize + DeserializeOwned,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let counters = Arc::new(Counters::default());
        let (shutdown, mut stopped) = oneshot::channel();

        let shared = Arc::clone(&counters);
        let task = tokio::spawn(async move {
            let mut connections = JoinSet::new();
            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            debug!("accepted connection from {}", peer);
                            shared.connections.fetch_add(1, Ordering::SeqCst);
                            connections.spawn(serve(
                                stream,
                                Arc::clone(&broadcaster),
                                config.token.clone(),
                                Arc::clone(&shared),
                            ));
                        }
                        Err(e) => warn!("accept failed: {}", e),
                    },
                }
            }
            connections.shutdown().await;
        });

        Ok(Self {
            addr,
            counters,
            shutdown: Some(shutdown),
            task,
        })
    }

    /// Listening address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `ws://` URL of a read-write subscription to `resource`.
    pub fn url(&self, resource: &str) -> String {
        format!("ws://{}/{}", self.addr, resource)
    }

    /// `ws://` URL of a read-only subscription to `resource`.
    pub fn read_only_url(&self, resource: &str) -> String {
        format!("ws://{}/{}/read", self.addr, resource)
    }

    /// Keepalive pings answered so far.
    pub fn pings(&self) -> usize {
        self.counters.pings.load(Ordering::SeqCst)
    }

    /// Connections accepted so far.
    pub fn connections(&self) -> usize {
        self.counters.connections.load(Ordering::SeqCst)
    }

    /// Stops the server and waits for it to finish.
    pub async fn shutdown(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        let _ = (&mut self.task).await;
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn route(path: &str) -> Option<(String, Permission)> {
    let path = path.split('?').next()?.trim_start_matches('/');
    match path.split('/').collect::<Vec<_>>().as_slice() {
        [resource] if !resource.is_empty() => Some((resource.to_string(), Permission::ReadWrite)),
        [resource, "read"] if !resource.is_empty() => {
            Some((resource.to_string(), Permission::ReadOnly))
        }
        _ => None,
    }
}

async fn serve<C>(
    stream: TcpStream,
    broadcaster: Arc<Broadcaster<C>>,
    token: Option<String>,
    counters: Arc<Counters>,
) where
    C: Context,
    C::State: Serialize,
    C::Delta: Serialize + DeserializeOwned,
{
    let mut path = String::new();
    let handshake = accept_hdr_async(stream, |request: &Request, response: Response| {
        path = request.uri().path().to_string();
        Ok(response)
    })
    .await;
    let mut socket = match handshake {
        Ok(socket) => socket,
        Err(e) => {
            warn!("handshake failed: {}", e);
            return;
        }
    };

    let Some((resource, permission)) = route(&path) else {
        warn!("no route for {}", path);
        let _ = socket.close(None).await;
        return;
    };

    if let Some(expected) = token {
        match socket.next().await {
            Some(Ok(Message::Text(text))) if text == expected => {}
            _ => {
                debug!("rejecting connection to {} without a valid token", resource);
                let _ = socket.close(None).await;
                return;
            }
        }
    }

    let subscription = match broadcaster.subscribe(&resource) {
        Ok(subscription) => subscription,
        Err(e) => {
            warn!("{}", e);
            let _ = socket.close(None).await;
            return;
        }
    };

    let id = subscription.id;
    pump(&mut socket, subscription, broadcaster.as_ref(), permission, &counters).await;
    broadcaster.unsubscribe(&resource, id);
    debug!("subscriber {} left {}", id, resource);
}

async fn pump<C>(
    socket: &mut WebSocketStream<TcpStream>,
    mut subscription: Subscription,
    broadcaster: &Broadcaster<C>,
    permission: Permission,
    counters: &Counters,
) where
    C: Context,
    C::State: Serialize,
    C::Delta: Serialize + DeserializeOwned,
{
    loop {
        tokio::select! {
            outgoing = subscription.receiver.recv() => {
                let Some(message) = outgoing else { return };
                if socket.send(Message::Text(message.to_string())).await.is_err() {
                    return;
                }
            }
            incoming = socket.next() => match incoming {
                Some(Ok(Message::Text(text))) if text == PING => {
                    counters.pings.fetch_add(1, Ordering::SeqCst);
                    if socket.send(Message::Text(PONG.to_string())).await.is_err() {
                        return;
                    }
                }
                Some(Ok(Message::Text(text))) => {
                    let handled = serde_json::from_str::<Value>(&text)
                        .map_err(|e| e.to_string())
                        .and_then(|message| {
                            broadcaster
                                .handle(&subscription.resource, subscription.id, permission, message)
                                .map_err(|e| e.to_string())
                        });
                    if let Err(e) = handled {
                        warn!("bad message on {}: {}", subscription.resource, e);
                    }
                }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => {}
            },
        }
    }
}
