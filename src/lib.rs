use crate::http::codec::HttpProtocolError;
use std::net::SocketAddr;
use thiserror::Error;

/// Error types for the http-echo library
#[derive(Error, Debug)]
pub enum EchoError {
    /// Socket-level errors on an established connection (read, write, accept)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The listener could not be bound
    #[error("Failed to listen on {addr}: {source}")]
    Listen {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// HTTP framing errors below the handler
    #[error("HTTP error: {0}")]
    Http(#[from] HttpProtocolError),

    /// The request body could not be read in full
    #[error(transparent)]
    BodyRead(#[from] inspect::BodyReadError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Timeout errors
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// Graceful shutdown did not finish within the grace period
    #[error("Shutdown error: {0}")]
    Shutdown(String),
}

/// Result type for the http-echo library
pub type Result<T> = std::result::Result<T, EchoError>;

pub mod common;
pub mod http;
pub mod inspect;

// Re-export main types for convenience
pub use common::EchoServerTrait;
pub use http::{EchoHandler, HttpConfig, HttpEchoClient, HttpEchoServer};
pub use inspect::{Environment, FixedEnvironment, ReportFormatter, RequestSnapshot, SystemEnvironment};
