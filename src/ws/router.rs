//! Named-event routing on top of a lazily created [`SocketServer`].
//!
//! An [`EventRouter`] is configured once, builder style, and then shared
//! behind an [`Arc`]. Each inbound text frame is decoded as an
//! [`Envelope`](super::envelope::Envelope) and handed to the subscribers
//! of its event name, in subscription order.
//!
//! # Handler errors
//!
//! Hooks and subscribers return [`anyhow::Result`]. An `Err` or a panic
//! aborts only that one invocation: it is logged at `warn` level, the
//! remaining subscribers of the same event still run, and the connection
//! stays open.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock, Weak};

use serde::Serialize;

use super::broadcast::Broadcaster;
use super::connection::Connection;
use super::envelope;
use super::request::{QueryParams, UpgradeRequest};
use super::server::{ConnectionHandler, SocketServer};
use crate::config::SocketConfig;
use crate::error::EnvelopeError;

/// Decides whether an upgrade request may proceed.
pub type Authenticator = Box<dyn Fn(&UpgradeRequest, &QueryParams) -> bool + Send + Sync>;

/// Runs once per accepted connection, with the originating request.
pub type OpenHook =
    Box<dyn Fn(&Arc<Connection>, &UpgradeRequest) -> anyhow::Result<()> + Send + Sync>;

/// Runs once when a connection ends, with its close code and reason.
pub type CloseHook = Box<dyn Fn(&Arc<Connection>, u16, &str) -> anyhow::Result<()> + Send + Sync>;

/// Runs when the transport reports an error on a connection.
pub type ErrorHook =
    Box<dyn Fn(&Arc<Connection>, &axum::Error) -> anyhow::Result<()> + Send + Sync>;

/// Runs for every inbound frame, before any named-event dispatch.
pub type MessageHook = Box<dyn Fn(&Arc<Connection>, &[u8], bool) -> anyhow::Result<()> + Send + Sync>;

/// Subscriber for one event name.
pub type EventHandler =
    Box<dyn Fn(&Arc<Connection>, &serde_json::Value, bool) -> anyhow::Result<()> + Send + Sync>;

/// Subscription table, connection lifecycle hooks and the lazily created
/// socket server for one socket path.
pub struct EventRouter {
    config: SocketConfig,
    authenticator: Option<Authenticator>,
    open_hook: Option<OpenHook>,
    close_hook: Option<CloseHook>,
    error_hook: Option<ErrorHook>,
    message_hook: Option<MessageHook>,
    subscriptions: HashMap<String, Vec<EventHandler>>,
    server: Arc<OnceLock<Arc<SocketServer>>>,
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRouter")
            .field("config", &self.config)
            .field("authenticated", &self.authenticator.is_some())
            .field("events", &self.subscribed_events())
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRouter {
    /// Creates a router with no hooks, no subscriptions and default socket
    /// limits.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: SocketConfig::default(),
            authenticator: None,
            open_hook: None,
            close_hook: None,
            error_hook: None,
            message_hook: None,
            subscriptions: HashMap::new(),
            server: Arc::new(OnceLock::new()),
        }
    }

    /// Sets the limits applied to connections accepted by this router.
    #[must_use]
    pub fn with_config(mut self, config: SocketConfig) -> Self {
        self.config = config;
        self
    }

    /// Installs the upgrade authenticator, replacing any previous one.
    ///
    /// Without an authenticator every upgrade is accepted.
    #[must_use]
    pub fn use_authenticator<F>(mut self, authenticator: F) -> Self
    where
        F: Fn(&UpgradeRequest, &QueryParams) -> bool + Send + Sync + 'static,
    {
        self.authenticator = Some(Box::new(authenticator));
        self
    }

    /// Sets the open hook, replacing any previous one.
    #[must_use]
    pub fn on_open<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Arc<Connection>, &UpgradeRequest) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.open_hook = Some(Box::new(hook));
        self
    }

    /// Sets the close hook, replacing any previous one.
    #[must_use]
    pub fn on_close<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Arc<Connection>, u16, &str) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.close_hook = Some(Box::new(hook));
        self
    }

    /// Sets the error hook, replacing any previous one.
    #[must_use]
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Arc<Connection>, &axum::Error) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.error_hook = Some(Box::new(hook));
        self
    }

    /// Sets the generic message hook, replacing any previous one.
    ///
    /// It sees every inbound frame, including ones that are not valid
    /// envelopes and binary frames.
    #[must_use]
    pub fn on_message<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Arc<Connection>, &[u8], bool) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.message_hook = Some(Box::new(hook));
        self
    }

    /// Appends `handler` to the subscribers of `event`.
    #[must_use]
    pub fn subscribe<F>(mut self, event: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Arc<Connection>, &serde_json::Value, bool) -> anyhow::Result<()>
            + Send
            + Sync
            + 'static,
    {
        self.subscriptions
            .entry(event.into())
            .or_default()
            .push(Box::new(handler));
        self
    }

    /// Returns a handle that can emit and broadcast on this router's
    /// connections, usable from inside its own subscribers.
    #[must_use]
    pub fn broadcaster(&self) -> Broadcaster {
        Broadcaster::new(Arc::clone(&self.server))
    }

    /// Creates the underlying socket server if it does not exist yet.
    ///
    /// Returns `true` if this call created it. Concurrent callers block
    /// until the single creation finishes.
    pub fn init(self: &Arc<Self>) -> bool {
        let mut created = false;
        self.server.get_or_init(|| {
            created = true;
            let handler: Weak<dyn ConnectionHandler> = Arc::<Self>::downgrade(self);
            Arc::new(SocketServer::new(self.config, handler))
        });
        if created {
            tracing::debug!(events = self.subscriptions.len(), "socket server created");
        }
        created
    }

    /// Returns `true` once [`init`](Self::init) has created the server.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.server.get().is_some()
    }

    /// The underlying socket server, if initialized.
    #[must_use]
    pub fn server(&self) -> Option<&Arc<SocketServer>> {
        self.server.get()
    }

    /// Evaluates the authenticator; `true` when none is installed.
    #[must_use]
    pub fn authenticate(&self, request: &UpgradeRequest, params: &QueryParams) -> bool {
        self.authenticator
            .as_ref()
            .is_none_or(|authenticator| authenticator(request, params))
    }

    /// Sends one envelope to `connection` if it is open.
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
        self.broadcaster().emit(connection, event, data)
    }

    /// Sends one envelope to every open connection of this router.
    ///
    /// # Errors
    ///
    /// Returns an [`EnvelopeError`] if the envelope cannot be encoded.
    pub fn broadcast<T: Serialize + ?Sized>(
        &self,
        event: &str,
        data: &T,
    ) -> Result<usize, EnvelopeError> {
        self.broadcaster().broadcast(event, data)
    }

    /// Sends one envelope to every open connection matching `predicate`.
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
        self.broadcaster().broadcast_filtered(event, data, predicate)
    }

    /// Number of connections currently open on this router.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.server.get().map_or(0, |server| server.connection_count())
    }

    /// Event names with at least one subscriber, sorted.
    #[must_use]
    pub fn subscribed_events(&self) -> Vec<&str> {
        let mut events: Vec<&str> = self.subscriptions.keys().map(String::as_str).collect();
        events.sort_unstable();
        events
    }

    /// Number of subscribers registered for `event`.
    #[must_use]
    pub fn handler_count(&self, event: &str) -> usize {
        self.subscriptions.get(event).map_or(0, Vec::len)
    }

    fn dispatch(&self, connection: &Arc<Connection>, payload: &[u8], is_binary: bool) {
        if is_binary {
            tracing::trace!(conn_id = %connection.id(), "binary frame skips event dispatch");
            return;
        }
        let envelope = match envelope::decode_bytes(payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::debug!(conn_id = %connection.id(), error = %err, "dropping unroutable message");
                return;
            }
        };
        let Some(handlers) = self.subscriptions.get(&envelope.event) else {
            tracing::trace!(conn_id = %connection.id(), event = %envelope.event, "no subscribers");
            return;
        };
        for handler in handlers {
            guarded(connection, &envelope.event, || {
                handler(connection, &envelope.data, is_binary)
            });
        }
    }
}

impl ConnectionHandler for EventRouter {
    fn on_accept(&self, connection: &Arc<Connection>) {
        if let Some(hook) = &self.open_hook {
            let request = Arc::clone(&connection.info().request);
            guarded(connection, "open", || hook(connection, &request));
        }
    }

    fn on_message(&self, connection: &Arc<Connection>, payload: &[u8], is_binary: bool) {
        if let Some(hook) = &self.message_hook {
            guarded(connection, "message", || hook(connection, payload, is_binary));
        }
        self.dispatch(connection, payload, is_binary);
    }

    fn on_close(&self, connection: &Arc<Connection>, code: u16, reason: &str) {
        if let Some(hook) = &self.close_hook {
            guarded(connection, "close", || hook(connection, code, reason));
        }
    }

    fn on_error(&self, connection: &Arc<Connection>, error: &axum::Error) {
        if let Some(hook) = &self.error_hook {
            guarded(connection, "error", || hook(connection, error));
        }
    }
}

/// Runs one hook or subscriber invocation, logging an `Err` or a panic.
fn guarded<F>(connection: &Connection, event: &str, invoke: F)
where
    F: FnOnce() -> anyhow::Result<()>,
{
    match panic::catch_unwind(AssertUnwindSafe(invoke)) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            tracing::warn!(conn_id = %connection.id(), event, error = %err, "event handler failed");
        }
        Err(payload) => {
            tracing::warn!(
                conn_id = %connection.id(),
                event,
                panic = panic_message(payload.as_ref()),
                "event handler panicked"
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
