//! Owned snapshot of the HTTP request that asked for a protocol upgrade.

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::extract::Query;
use axum::http::{HeaderMap, Method, Uri};

/// Parsed query-string mapping handed to authenticators.
pub type QueryParams = HashMap<String, String>;

/// The originating upgrade request, kept alongside every connection it
/// produced.
#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    remote_addr: SocketAddr,
}

impl UpgradeRequest {
    /// Captures the parts of an upgrade request the router exposes.
    #[must_use]
    pub fn new(method: Method, uri: Uri, headers: HeaderMap, remote_addr: SocketAddr) -> Self {
        Self {
            method,
            uri,
            headers,
            remote_addr,
        }
    }

    /// HTTP method of the request.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Full request target.
    #[must_use]
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Request headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns a header value if present and valid visible ASCII.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Peer address of the underlying TCP connection.
    #[must_use]
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Path component of the request target, used as the routing key.
    #[must_use]
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Raw query string, if any.
    #[must_use]
    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }

    /// Parses the query string into a key/value mapping.
    ///
    /// An absent or unparsable query yields an empty mapping; for repeated
    /// keys the last value wins.
    #[must_use]
    pub fn query_params(&self) -> QueryParams {
        match Query::<QueryParams>::try_from_uri(&self.uri) {
            Ok(Query(params)) => params,
            Err(err) => {
                tracing::debug!(uri = %self.uri, error = %err, "ignoring unparsable query string");
                QueryParams::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use super::*;

    fn request(target: &'static str) -> UpgradeRequest {
        UpgradeRequest::new(
            Method::GET,
            Uri::from_static(target),
            HeaderMap::new(),
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 40_000),
        )
    }

    #[test]
    fn path_excludes_query() {
        let req = request("/chat?room=lobby");
        assert_eq!(req.path(), "/chat");
        assert_eq!(req.query(), Some("room=lobby"));
    }

    #[test]
    fn query_params_are_decoded() {
        let req = request("/chat?token=a%20b&room=lobby");
        let params = req.query_params();
        assert_eq!(params.get("token").map(String::as_str), Some("a b"));
        assert_eq!(params.get("room").map(String::as_str), Some("lobby"));
    }

    #[test]
    fn missing_query_is_empty() {
        assert!(request("/chat").query_params().is_empty());
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", axum::http::HeaderValue::from_static("k1"));
        let req = UpgradeRequest::new(
            Method::GET,
            Uri::from_static("/"),
            headers,
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 1),
        );
        assert_eq!(req.header("X-Api-Key"), Some("k1"));
        assert_eq!(req.header("authorization"), None);
    }
}
