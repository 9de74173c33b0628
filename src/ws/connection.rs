//! Accepted connections and the metadata attached to them at accept time.
//!
//! A [`Connection`] is the handle handed to every hook and subscriber. It
//! never touches the socket directly: outgoing frames are queued on an
//! unbounded channel that the connection's task drains into the socket.

use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use axum::extract::ws::{CloseFrame, Message};
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use super::connection_id::ConnectionId;
use super::request::UpgradeRequest;

/// Read-only facts about the peer, derived once when the connection is
/// accepted.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Peer IP address.
    pub remote_address: IpAddr,
    /// Peer TCP port.
    pub remote_port: u16,
    /// `"{address}:{port}"`.
    pub remote: String,
    /// The upgrade request that produced this connection.
    pub request: Arc<UpgradeRequest>,
    /// When the handshake completed.
    pub connected_at: DateTime<Utc>,
}

impl ConnectionInfo {
    /// Derives connection metadata from the originating request.
    #[must_use]
    pub fn from_request(request: Arc<UpgradeRequest>) -> Self {
        let addr = request.remote_addr();
        Self {
            remote_address: addr.ip(),
            remote_port: addr.port(),
            remote: format!("{}:{}", addr.ip(), addr.port()),
            request,
            connected_at: Utc::now(),
        }
    }
}

/// Lifecycle state of a connection, mirroring the WebSocket ready state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Accepted but the accept callback has not run yet.
    Connecting = 0,
    /// Frames can be sent.
    Open = 1,
    /// A close frame has been queued; no further sends.
    Closing = 2,
    /// The socket is gone.
    Closed = 3,
}

impl ConnectionState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// A live WebSocket connection as seen by hooks and subscribers.
pub struct Connection {
    id: ConnectionId,
    info: ConnectionInfo,
    state: AtomicU8,
    outbound: mpsc::UnboundedSender<Message>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("remote", &self.info.remote)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Creates a connection in the [`ConnectionState::Connecting`] state
    /// whose outgoing frames are delivered to `outbound`.
    #[must_use]
    pub fn new(info: ConnectionInfo, outbound: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            id: ConnectionId::new(),
            info,
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            outbound,
        }
    }

    /// Unique identifier of this connection.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Metadata attached at accept time.
    #[must_use]
    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Returns `true` while frames can be sent.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open && !self.outbound.is_closed()
    }

    /// Queues a frame for sending.
    ///
    /// Returns `false` without sending if the connection is not open.
    pub fn send(&self, message: Message) -> bool {
        self.is_open() && self.outbound.send(message).is_ok()
    }

    /// Queues a text frame for sending.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.send(Message::text(text.into()))
    }

    /// Queues a close frame and stops accepting further sends.
    ///
    /// No-op unless the connection is open.
    pub fn close(&self, code: u16, reason: &str) {
        if self
            .state
            .compare_exchange(
                ConnectionState::Open as u8,
                ConnectionState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            let frame = CloseFrame {
                code,
                reason: reason.into(),
            };
            let _ = self.outbound.send(Message::Close(Some(frame)));
        }
    }

    pub(crate) fn mark_open(&self) {
        let _ = self.state.compare_exchange(
            ConnectionState::Connecting as u8,
            ConnectionState::Open as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub(crate) fn mark_closed(&self) {
        self.state
            .store(ConnectionState::Closed as u8, Ordering::Release);
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
pub(crate) mod tests {
    use std::net::{Ipv4Addr, SocketAddr};

    use axum::http::{HeaderMap, Method, Uri};

    use super::*;

    pub(crate) fn test_info(port: u16) -> ConnectionInfo {
        let request = UpgradeRequest::new(
            Method::GET,
            Uri::from_static("/test"),
            HeaderMap::new(),
            SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)), port),
        );
        ConnectionInfo::from_request(Arc::new(request))
    }

    pub(crate) fn open_connection() -> (Arc<Connection>, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Arc::new(Connection::new(test_info(5000), tx));
        conn.mark_open();
        (conn, rx)
    }

    #[test]
    fn info_formats_remote() {
        let info = test_info(5001);
        assert_eq!(info.remote_address, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)));
        assert_eq!(info.remote_port, 5001);
        assert_eq!(info.remote, "10.0.0.7:5001");
        assert_eq!(info.request.path(), "/test");
    }

    #[test]
    fn send_before_open_is_refused() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = Connection::new(test_info(1), tx);
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert!(!conn.send_text("early"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn send_when_open_queues_frame() {
        let (conn, mut rx) = open_connection();
        assert!(conn.send_text("hi"));
        let Ok(Message::Text(text)) = rx.try_recv() else {
            panic!("expected queued text frame");
        };
        assert_eq!(text.as_str(), "hi");
    }

    #[test]
    fn close_queues_frame_once_and_blocks_sends() {
        let (conn, mut rx) = open_connection();
        conn.close(1000, "bye");
        conn.close(1001, "again");
        assert_eq!(conn.state(), ConnectionState::Closing);
        assert!(!conn.send_text("late"));

        let Ok(Message::Close(Some(frame))) = rx.try_recv() else {
            panic!("expected close frame");
        };
        assert_eq!(frame.code, 1000);
        assert_eq!(frame.reason.as_str(), "bye");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dropped_receiver_reports_not_open() {
        let (conn, rx) = open_connection();
        drop(rx);
        assert!(!conn.is_open());
        assert!(!conn.send_text("gone"));
    }
}
