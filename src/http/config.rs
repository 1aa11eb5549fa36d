use super::codec::DEFAULT_MAX_HEADER_BYTES;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Port the server listens on unless told otherwise
pub const DEFAULT_PORT: u16 = 8080;

/// Configuration for the HTTP echo server
///
/// # Examples
///
/// ```rust
/// use http_echo::http::HttpConfig;
/// use std::time::Duration;
///
/// let config = HttpConfig {
///     bind_addr: "127.0.0.1:9000".parse().unwrap(),
///     read_timeout: Duration::from_secs(5),
///     ..Default::default()
/// };
/// assert_eq!(config.max_header_bytes, 1 << 20);
/// ```
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Network address to bind to
    pub bind_addr: SocketAddr,
    /// Maximum number of concurrent connections
    pub max_connections: usize,
    /// Limit for reading the first request head on a connection, and for
    /// reading any request body
    pub read_timeout: Duration,
    /// Limit for writing one response
    pub write_timeout: Duration,
    /// How long a kept-alive connection may wait for its next request
    pub idle_timeout: Duration,
    /// Maximum size of a request line plus headers
    pub max_header_bytes: usize,
    /// Grace period for in-flight requests once shutdown starts
    pub shutdown_timeout: Duration,
}

impl HttpConfig {
    /// Default configuration listening on all interfaces at `port`
    pub fn with_port(port: u16) -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
            ..Default::default()
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            max_connections: 1000,
            read_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(60),
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}
