//! The accepting primitive behind every event router.
//!
//! A [`SocketServer`] completes WebSocket handshakes, tracks the live
//! connections it produced, and runs one read/write loop per connection,
//! reporting every transport notification to a single
//! [`ConnectionHandler`] fixed at construction time.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use axum::extract::ws::{Message, WebSocketUpgrade};
use axum::response::Response;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::RwLock;
use tokio::sync::mpsc;

use super::connection::{Connection, ConnectionInfo};
use super::connection_id::ConnectionId;
use super::request::UpgradeRequest;
use crate::config::SocketConfig;

/// Close code reported when a close frame carried no status.
pub const CLOSE_NO_STATUS: u16 = 1005;

/// Close code reported when the transport went away without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Receives the transport-level notifications of every connection a
/// [`SocketServer`] accepts.
///
/// All methods run on the connection's own task, one notification at a
/// time, in the order the transport delivers them.
pub trait ConnectionHandler: Send + Sync {
    /// A handshake completed; `connection` is open and tracked.
    fn on_accept(&self, connection: &Arc<Connection>);

    /// A text (`is_binary == false`) or binary frame arrived.
    fn on_message(&self, connection: &Arc<Connection>, payload: &[u8], is_binary: bool);

    /// The connection ended. Fires exactly once per accepted connection,
    /// unless another method of this handler panicked first.
    fn on_close(&self, connection: &Arc<Connection>, code: u16, reason: &str);

    /// The transport reported an error. The connection closes afterwards.
    fn on_error(&self, connection: &Arc<Connection>, error: &axum::Error);
}

/// Completes upgrades and owns the set of live connections.
pub struct SocketServer {
    config: SocketConfig,
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
    handler: Weak<dyn ConnectionHandler>,
}

impl std::fmt::Debug for SocketServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketServer")
            .field("config", &self.config)
            .field("connections", &self.connection_count())
            .finish_non_exhaustive()
    }
}

impl SocketServer {
    /// Creates a server that reports to `handler`.
    ///
    /// The handler is held weakly; connections accepted after it is
    /// dropped are closed immediately.
    #[must_use]
    pub fn new(config: SocketConfig, handler: Weak<dyn ConnectionHandler>) -> Self {
        Self {
            config,
            connections: RwLock::new(HashMap::new()),
            handler,
        }
    }

    /// Limits applied to every handshake.
    #[must_use]
    pub fn config(&self) -> SocketConfig {
        self.config
    }

    /// Completes the protocol handshake for `request`.
    ///
    /// The returned response is the `101 Switching Protocols` answer; the
    /// connection itself is served on a task spawned by the HTTP server
    /// once the upgrade finishes.
    pub fn accept(self: &Arc<Self>, upgrade: WebSocketUpgrade, request: UpgradeRequest) -> Response {
        let server = Arc::clone(self);
        let request = Arc::new(request);
        upgrade
            .max_message_size(self.config.max_message_size)
            .max_frame_size(self.config.max_frame_size)
            .on_failed_upgrade(|err| {
                tracing::warn!(error = %err, "websocket handshake failed");
            })
            .on_upgrade(move |socket| server.serve_socket(socket, request))
    }

    /// Runs one accepted connection to completion.
    ///
    /// Registers the connection, fires [`ConnectionHandler::on_accept`],
    /// then pumps inbound frames to the handler and queued outbound frames
    /// to the socket until either side closes.
    pub async fn serve_socket<S>(self: Arc<Self>, socket: S, request: Arc<UpgradeRequest>)
    where
        S: Stream<Item = Result<Message, axum::Error>>
            + Sink<Message, Error = axum::Error>
            + Send
            + 'static,
    {
        let Some(handler) = self.handler.upgrade() else {
            tracing::warn!(path = request.path(), "router dropped; refusing connection");
            return;
        };

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
        let connection = Arc::new(Connection::new(
            ConnectionInfo::from_request(request),
            outbound_tx,
        ));
        let conn_id = connection.id();
        let tracked = Tracked::register(&self, Arc::clone(&connection));
        connection.mark_open();

        tracing::info!(
            conn_id = %conn_id,
            remote = %connection.info().remote,
            path = connection.info().request.path(),
            "connection accepted"
        );
        handler.on_accept(&connection);

        let (mut ws_tx, mut ws_rx) = socket.split();

        let (code, reason) = loop {
            tokio::select! {
                // Incoming frame from the peer
                inbound = ws_rx.next() => {
                    match inbound {
                        Some(Ok(Message::Text(text))) => {
                            handler.on_message(&connection, text.as_str().as_bytes(), false);
                        }
                        Some(Ok(Message::Binary(bytes))) => {
                            handler.on_message(&connection, bytes.as_ref(), true);
                        }
                        Some(Ok(Message::Close(frame))) => {
                            break frame.map_or((CLOSE_NO_STATUS, String::new()), |f| {
                                (f.code, f.reason.as_str().to_string())
                            });
                        }
                        // Ping/pong are answered by the transport.
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            tracing::warn!(conn_id = %conn_id, error = %err, "websocket read failed");
                            handler.on_error(&connection, &err);
                            break (CLOSE_ABNORMAL, String::new());
                        }
                        None => break (CLOSE_ABNORMAL, String::new()),
                    }
                }
                // Frame queued by a hook, a subscriber or a broadcast
                Some(message) = outbound_rx.recv() => {
                    if let Err(err) = ws_tx.send(message).await {
                        tracing::warn!(conn_id = %conn_id, error = %err, "websocket write failed");
                        handler.on_error(&connection, &err);
                        break (CLOSE_ABNORMAL, String::new());
                    }
                }
            }
        };

        drop(tracked);
        // Flushes the close reply to a peer-initiated close.
        let _ = ws_tx.close().await;

        tracing::debug!(conn_id = %conn_id, code, reason = %reason, "connection closed");
        handler.on_close(&connection, code, &reason);
    }

    /// Snapshot of the currently tracked connections.
    #[must_use]
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.connections.read().values().cloned().collect()
    }

    /// Looks up a tracked connection.
    #[must_use]
    pub fn connection(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.read().get(&id).cloned()
    }

    /// Number of tracked connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    pub(crate) fn track(&self, connection: Arc<Connection>) {
        self.connections.write().insert(connection.id(), connection);
    }

    fn untrack(&self, id: ConnectionId) {
        self.connections.write().remove(&id);
    }
}

/// Keeps a connection in its server's set for as long as its pump runs.
///
/// Dropping it, by returning or by unwinding out of a handler, marks the
/// connection closed and untracks it.
struct Tracked<'a> {
    server: &'a SocketServer,
    connection: Arc<Connection>,
}

impl<'a> Tracked<'a> {
    fn register(server: &'a SocketServer, connection: Arc<Connection>) -> Self {
        server.track(Arc::clone(&connection));
        Self { server, connection }
    }
}

impl Drop for Tracked<'_> {
    fn drop(&mut self) {
        self.connection.mark_closed();
        self.server.untrack(self.connection.id());
    }
}
