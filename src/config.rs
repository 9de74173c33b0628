//! Server configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`).

use std::net::SocketAddr;

/// Default ceiling for a reassembled message (64 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 << 20;

/// Default ceiling for a single frame (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 << 20;

/// Top-level server configuration.
///
/// Loaded once at startup via [`ServerConfig::from_env`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address to bind the HTTP server to (e.g. `0.0.0.0:3000`).
    pub listen_addr: SocketAddr,

    /// Limits applied to every socket server built from this config.
    pub socket: SocketConfig,

    /// Shared secret for the demo `/admin` socket route. When unset, the
    /// route refuses every upgrade.
    pub admin_token: Option<String>,
}

/// Per-router WebSocket limits, applied when a handshake completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketConfig {
    /// Maximum size of a reassembled incoming message, in bytes.
    pub max_message_size: usize,
    /// Maximum size of a single incoming frame, in bytes.
    pub max_frame_size: usize,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to sensible defaults when a variable is not set.
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns an error if `LISTEN_ADDR` is set but cannot be parsed as
    /// a [`SocketAddr`].
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        dotenvy::dotenv().ok();

        let listen_addr: SocketAddr = std::env::var("LISTEN_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:3000".to_string())
            .parse()?;

        let socket = SocketConfig {
            max_message_size: parse_env("SOCKET_MAX_MESSAGE_SIZE", DEFAULT_MAX_MESSAGE_SIZE),
            max_frame_size: parse_env("SOCKET_MAX_FRAME_SIZE", DEFAULT_MAX_FRAME_SIZE),
        };

        let admin_token = std::env::var("ADMIN_TOKEN")
            .ok()
            .filter(|token| !token.is_empty());

        Ok(Self {
            listen_addr,
            socket,
            admin_token,
        })
    }
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
