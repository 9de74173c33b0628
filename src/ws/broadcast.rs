//! Envelope fan-out to the connections a router is tracking.
//!
//! [`Broadcaster`] shares the router's lazily created socket server, so a
//! handle taken before `init()` starts seeing connections as soon as the
//! server exists.

use std::sync::{Arc, OnceLock};

use axum::extract::ws::Message;
use serde::Serialize;

use super::connection::Connection;
use super::envelope;
use super::server::SocketServer;
use crate::error::EnvelopeError;

/// Cloneable handle for sending envelopes on behalf of one router.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    server: Arc<OnceLock<Arc<SocketServer>>>,
}

impl Broadcaster {
    pub(crate) fn new(server: Arc<OnceLock<Arc<SocketServer>>>) -> Self {
        Self { server }
    }

    /// Sends one envelope to `connection` if it is open.
    ///
    /// Returns `Ok(false)` without encoding anything when the connection
    /// is not open.
    ///
    /// # Errors
    ///
    /// Returns an [`EnvelopeError`] if the envelope cannot be encoded.
    pub fn emit<T: Serialize + ?Sized>(
        &self,
        connection: &Connection,
        event: &str,
        data: &T,
    ) -> Result<bool, EnvelopeError> {
        if !connection.is_open() {
            return Ok(false);
        }
        let text = envelope::encode(event, data)?;
        Ok(connection.send(Message::text(text)))
    }

    /// Sends one envelope to every open connection.
    ///
    /// Returns the number of connections the envelope was queued to.
    ///
    /// # Errors
    ///
    /// Returns an [`EnvelopeError`] if the envelope cannot be encoded.
    pub fn broadcast<T: Serialize + ?Sized>(
        &self,
        event: &str,
        data: &T,
    ) -> Result<usize, EnvelopeError> {
        self.broadcast_filtered(event, data, |_| true)
    }

    /// Sends one envelope to every open connection for which `predicate`
    /// returns `true`.
    ///
    /// The envelope is encoded once. Before the router is initialized there
    /// are no tracked connections and nothing is encoded.
    ///
    /// # Errors
    ///
    /// Returns an [`EnvelopeError`] if the envelope cannot be encoded.
    pub fn broadcast_filtered<T, F>(
        &self,
        event: &str,
        data: &T,
        predicate: F,
    ) -> Result<usize, EnvelopeError>
    where
        T: Serialize + ?Sized,
        F: Fn(&Connection) -> bool,
    {
        let Some(server) = self.server.get() else {
            return Ok(0);
        };
        let message = Message::text(envelope::encode(event, data)?);

        let mut recipients = 0;
        for connection in server.connections() {
            if connection.is_open() && predicate(&connection) && connection.send(message.clone())
            {
                recipients += 1;
            }
        }
        tracing::debug!(event, recipients, "broadcast event");
        Ok(recipients)
    }

    /// Number of connections currently tracked by the router.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.server.get().map_or(0, |server| server.connection_count())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::Weak;

    use serde_json::json;

    use super::*;
    use crate::config::SocketConfig;
    use crate::ws::connection::tests::open_connection;
    use crate::ws::server::ConnectionHandler;

    fn detached_server() -> Arc<SocketServer> {
        let handler: Weak<dyn ConnectionHandler> = Weak::<crate::ws::EventRouter>::new();
        Arc::new(SocketServer::new(SocketConfig::default(), handler))
    }

    fn expect_text(rx: &mut tokio::sync::mpsc::UnboundedReceiver<Message>) -> String {
        let Ok(Message::Text(text)) = rx.try_recv() else {
            panic!("expected a text frame");
        };
        text.as_str().to_string()
    }

    #[test]
    fn emit_sends_envelope_to_open_connection() {
        let broadcaster = Broadcaster::new(Arc::new(OnceLock::new()));
        let (conn, mut rx) = open_connection();
        let sent = broadcaster.emit(&conn, "greet", &json!({ "hi": true }));
        assert!(matches!(sent, Ok(true)));
        assert_eq!(expect_text(&mut rx), r#"{"event":"greet","data":{"hi":true}}"#);
    }

    #[test]
    fn emit_to_closed_connection_is_noop() {
        let broadcaster = Broadcaster::new(Arc::new(OnceLock::new()));
        let (conn, mut rx) = open_connection();
        conn.mark_closed();
        assert!(matches!(broadcaster.emit(&conn, "greet", &1), Ok(false)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn broadcast_before_init_reaches_nobody() {
        let broadcaster = Broadcaster::new(Arc::new(OnceLock::new()));
        assert!(matches!(broadcaster.broadcast("tick", &1), Ok(0)));
        assert_eq!(broadcaster.connection_count(), 0);
    }

    #[test]
    fn broadcast_filtered_skips_excluded_connection() {
        let cell = Arc::new(OnceLock::new());
        let server = detached_server();
        let (a, mut rx_a) = open_connection();
        let (b, mut rx_b) = open_connection();
        let (c, mut rx_c) = open_connection();
        server.track(Arc::clone(&a));
        server.track(Arc::clone(&b));
        server.track(Arc::clone(&c));
        let _ = cell.set(server);

        let broadcaster = Broadcaster::new(cell);
        let excluded = c.id();
        let Ok(count) = broadcaster.broadcast_filtered("news", &json!("hello"), |conn| {
            conn.id() != excluded
        }) else {
            panic!("broadcast failed");
        };

        assert_eq!(count, 2);
        let expected = r#"{"event":"news","data":"hello"}"#;
        assert_eq!(expect_text(&mut rx_a), expected);
        assert_eq!(expect_text(&mut rx_b), expected);
        assert!(rx_a.try_recv().is_err());
        assert!(rx_c.try_recv().is_err());
    }

    #[test]
    fn broadcast_skips_connections_that_are_not_open() {
        let cell = Arc::new(OnceLock::new());
        let server = detached_server();
        let (open, mut rx_open) = open_connection();
        let (closing, mut rx_closing) = open_connection();
        closing.close(1000, "done");
        let _ = rx_closing.try_recv();
        server.track(Arc::clone(&open));
        server.track(Arc::clone(&closing));
        let _ = cell.set(server);

        let broadcaster = Broadcaster::new(cell);
        assert!(matches!(broadcaster.broadcast("tick", &1), Ok(1)));
        assert_eq!(expect_text(&mut rx_open), r#"{"event":"tick","data":1}"#);
        assert!(rx_closing.try_recv().is_err());
    }
}
