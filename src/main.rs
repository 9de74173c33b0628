//! socket-events demo server entry point.
//!
//! Serves two socket routes:
//! - `/chat`: open to everyone; relays `message` events to the other peers
//!   and answers `ping` with `pong`.
//! - `/admin`: requires `?token=<ADMIN_TOKEN>`; `stats` answers with the
//!   number of chat connections.

use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::json;
use tracing_subscriber::EnvFilter;

use socket_events::app::build_app;
use socket_events::config::ServerConfig;
use socket_events::ws::{EventRouter, RouteTable};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = ServerConfig::from_env()?;
    tracing::info!(addr = %config.listen_addr, "starting socket-events");

    let chat = Arc::new(chat_router(&config));
    let admin = Arc::new(admin_router(&config, Arc::clone(&chat)));

    let routes = RouteTable::new()
        .route("/chat", chat)
        .route("/admin", admin);

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, routes = ?routes.paths(), "server listening");

    axum::serve(
        listener,
        build_app(routes).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

fn chat_router(config: &ServerConfig) -> EventRouter {
    let router = EventRouter::new().with_config(config.socket);
    let peers = router.broadcaster();
    let replies = router.broadcaster();

    router
        .on_open(|conn, _request| {
            tracing::info!(conn_id = %conn.id(), remote = %conn.info().remote, "chat peer joined");
            Ok(())
        })
        .on_close(|conn, code, reason| {
            tracing::info!(conn_id = %conn.id(), code, reason, "chat peer left");
            Ok(())
        })
        .on_error(|conn, err| {
            tracing::warn!(conn_id = %conn.id(), error = %err, "chat transport error");
            Ok(())
        })
        .subscribe("message", move |conn, data, _| {
            let sender = conn.id();
            let payload = json!({ "from": conn.info().remote, "from_id": sender, "body": data });
            peers.broadcast_filtered("message", &payload, |peer| peer.id() != sender)?;
            Ok(())
        })
        .subscribe("ping", move |conn, data, _| {
            replies.emit(conn, "pong", data)?;
            Ok(())
        })
}

fn admin_router(config: &ServerConfig, chat: Arc<EventRouter>) -> EventRouter {
    let token = config.admin_token.clone();
    let router = EventRouter::new().with_config(config.socket);
    let replies = router.broadcaster();

    router
        .use_authenticator(move |_request, params| {
            token
                .as_deref()
                .is_some_and(|expected| params.get("token").map(String::as_str) == Some(expected))
        })
        .subscribe("stats", move |conn, _, _| {
            let stats = json!({ "chat_connections": chat.connection_count() });
            replies.emit(conn, "stats", &stats)?;
            Ok(())
        })
}
