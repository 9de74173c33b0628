//! WebSocket layer: envelope codec, connections, event routing and
//! upgrade dispatch.
//!
//! The [`handle_upgrade`] dispatcher in front of a
//! [`RouteTable`] hands each upgrade to the [`EventRouter`] registered for
//! its path. Routers decode inbound text frames as [`Envelope`]s and call
//! the subscribers of the envelope's event name.

pub mod broadcast;
pub mod connection;
pub mod connection_id;
pub mod envelope;
pub mod request;
pub mod router;
pub mod server;
pub mod upgrade;

pub use broadcast::Broadcaster;
pub use connection::{Connection, ConnectionInfo, ConnectionState};
pub use connection_id::ConnectionId;
pub use envelope::Envelope;
pub use request::{QueryParams, UpgradeRequest};
pub use router::EventRouter;
pub use server::{ConnectionHandler, SocketServer};
pub use upgrade::{RouteTable, authorize, handle_upgrade};
