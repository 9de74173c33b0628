//! # socket-events
//!
//! Named-event routing over WebSocket connections, with path-based upgrade
//! dispatch in front of several independently configured routers.
//!
//! Every text frame is expected to carry an envelope
//! `{"event": <string>, "data": <json>}`. An [`EventRouter`](ws::EventRouter)
//! calls the subscribers registered for the envelope's event name, plus
//! optional per-connection lifecycle hooks. A [`RouteTable`](ws::RouteTable)
//! maps URL paths to routers; the upgrade handler looks up the path,
//! authenticates, lazily initializes the router and completes the handshake.
//!
//! ## Architecture
//!
//! ```text
//! HTTP upgrade request
//!     │
//!     ├── handle_upgrade (ws/upgrade)   path lookup, auth, lazy init
//!     │
//!     ├── SocketServer (ws/server)      handshake, connection set, pump
//!     │
//!     ├── EventRouter (ws/router)       hooks + subscription table
//!     │
//!     └── Envelope codec (ws/envelope)
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use socket_events::app::build_app;
//! use socket_events::ws::{EventRouter, RouteTable};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let chat = EventRouter::new();
//! let peers = chat.broadcaster();
//! let chat = chat.subscribe("message", move |conn, data, _| {
//!     let sender = conn.id();
//!     peers.broadcast_filtered("message", data, |c| c.id() != sender)?;
//!     Ok(())
//! });
//!
//! let routes = RouteTable::new().route("/chat", Arc::new(chat));
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
//! axum::serve(
//!     listener,
//!     build_app(routes).into_make_service_with_connect_info::<std::net::SocketAddr>(),
//! )
//! .await?;
//! # Ok(())
//! # }
//! ```

pub mod app;
pub mod config;
pub mod error;
pub mod ws;
