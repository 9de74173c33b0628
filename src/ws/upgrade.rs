//! Path-based upgrade dispatch across several event routers.
//!
//! Every upgrade request is matched against a [`RouteTable`] by exact
//! path. The matched router is initialized on first use, its
//! authenticator is consulted, and only then is the WebSocket handshake
//! completed. Refused requests never start a handshake.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, Method, Uri};
use axum::response::{IntoResponse, Response};

use super::request::UpgradeRequest;
use super::router::EventRouter;
use crate::error::UpgradeError;

/// Exact-match mapping from URL path to the router serving it.
///
/// Cheap to clone; the table itself is immutable once built.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Arc<HashMap<String, Arc<EventRouter>>>,
}

impl RouteTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) the router for `path`.
    #[must_use]
    pub fn route(mut self, path: impl Into<String>, router: Arc<EventRouter>) -> Self {
        Arc::make_mut(&mut self.routes).insert(path.into(), router);
        self
    }

    /// Looks up the router for `path`. No normalization is applied.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Arc<EventRouter>> {
        self.routes.get(path)
    }

    /// Registered paths, sorted.
    #[must_use]
    pub fn paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        paths.sort_unstable();
        paths
    }

    /// Number of registered paths.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns `true` if no path is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl FromIterator<(String, Arc<EventRouter>)> for RouteTable {
    fn from_iter<I: IntoIterator<Item = (String, Arc<EventRouter>)>>(iter: I) -> Self {
        Self {
            routes: Arc::new(iter.into_iter().collect()),
        }
    }
}

/// Decides whether `request` may be upgraded, and by which router.
///
/// The matched router is initialized whether or not authentication
/// succeeds.
///
/// # Errors
///
/// - [`UpgradeError::UnknownRoute`] if no router serves the path; no
///   router is touched.
/// - [`UpgradeError::Unauthorized`] if the router's authenticator refuses.
pub fn authorize(
    routes: &RouteTable,
    request: &UpgradeRequest,
) -> Result<Arc<EventRouter>, UpgradeError> {
    let path = request.path();
    let Some(router) = routes.get(path) else {
        return Err(UpgradeError::UnknownRoute(path.to_string()));
    };

    let params = request.query_params();
    let authenticated = router.authenticate(request, &params);

    router.init();

    if authenticated {
        Ok(Arc::clone(router))
    } else {
        Err(UpgradeError::Unauthorized(path.to_string()))
    }
}

/// Axum handler for every socket path: `GET <path>` upgrades to a
/// WebSocket served by the router registered for `<path>`.
///
/// Mount it as a fallback so unmatched HTTP paths reach the route table.
/// The server must be started with
/// `into_make_service_with_connect_info::<SocketAddr>()`.
pub async fn handle_upgrade(
    State(routes): State<RouteTable>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let request = UpgradeRequest::new(method, uri, headers, remote_addr);

    let router = match authorize(&routes, &request) {
        Ok(router) => router,
        Err(err) => {
            tracing::warn!(
                path = request.path(),
                remote = %remote_addr,
                reason = %err,
                "upgrade refused"
            );
            return err.into_response();
        }
    };

    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            tracing::debug!(path = request.path(), reason = %rejection, "not a websocket upgrade");
            return rejection.into_response();
        }
    };

    let Some(server) = router.server() else {
        return UpgradeError::NotInitialized(request.path().to_string()).into_response();
    };
    server.accept(upgrade, request)
}
