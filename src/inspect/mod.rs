//! Request inspection and report formatting
//!
//! Turns one decoded request into a [`RequestSnapshot`] and renders it as the
//! plain-text diagnostic report sent back to the client.

pub mod environment;
pub mod form;
pub mod report;
pub mod snapshot;

pub use environment::{Environment, FixedEnvironment, SystemEnvironment};
pub use form::{FormParseError, FormValues};
pub use report::ReportFormatter;
pub use snapshot::{RequestSnapshot, RequestStart, resolve_client_addr};

use crate::http::codec::HttpProtocolError;
use std::time::Duration;

/// The request body could not be read in full
#[derive(Debug, thiserror::Error)]
pub enum BodyReadError {
    #[error("timed out after {0:?} reading request body")]
    Timeout(Duration),
    #[error("connection closed before the request body was complete")]
    Incomplete,
    #[error("malformed request body: {0}")]
    Malformed(String),
    #[error("failed to read request body: {0}")]
    Io(#[from] std::io::Error),
}

impl From<HttpProtocolError> for BodyReadError {
    fn from(err: HttpProtocolError) -> Self {
        match err {
            HttpProtocolError::Io(e) => BodyReadError::Io(e),
            HttpProtocolError::IncompleteBody => BodyReadError::Incomplete,
            other => BodyReadError::Malformed(other.to_string()),
        }
    }
}
