use super::codec::RequestHead;
use crate::inspect::{BodyReadError, Environment, ReportFormatter, RequestSnapshot, RequestStart, SystemEnvironment};
use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderValue};
use http::{Response, StatusCode};
use std::net::SocketAddr;
use std::sync::Arc;

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

/// One request as handed to the handler: head, fully read body, peer
#[derive(Debug)]
pub struct InboundRequest {
    pub head: RequestHead,
    pub body: Bytes,
    pub remote_addr: SocketAddr,
    pub start: RequestStart,
}

/// Answers every request, whatever its path or method, with the diagnostic report
///
/// # Examples
///
/// ```
/// use http_echo::EchoHandler;
/// use http_echo::common::test_utils::request_head;
/// use http_echo::http::InboundRequest;
/// use http_echo::inspect::{FixedEnvironment, RequestStart};
/// use std::sync::Arc;
///
/// let handler = EchoHandler::new(Arc::new(FixedEnvironment::new().with_hostname("box")));
/// let response = handler.handle(InboundRequest {
///     head: request_head(http::Method::GET, "/ping?x=1", &[("Host", "box")], 0),
///     body: bytes::Bytes::new(),
///     remote_addr: "127.0.0.1:5000".parse().unwrap(),
///     start: RequestStart::now(),
/// });
/// assert_eq!(response.status(), 200);
/// assert!(std::str::from_utf8(response.body()).unwrap().contains("  x = 1"));
/// ```
#[derive(Clone)]
pub struct EchoHandler {
    environment: Arc<dyn Environment>,
}

impl EchoHandler {
    pub fn new(environment: Arc<dyn Environment>) -> Self {
        Self { environment }
    }

    /// Builds the snapshot, renders the report and wraps it in a 200 response
    pub fn handle(&self, request: InboundRequest) -> Response<Bytes> {
        let snapshot = RequestSnapshot::capture(request.head, request.body, request.remote_addr, request.start);
        let report = ReportFormatter::new(self.environment.as_ref()).render(&snapshot);
        text_response(StatusCode::OK, report)
    }

    /// The 500 answer for a request whose body could not be read
    pub fn body_read_failed(&self, err: &BodyReadError) -> Response<Bytes> {
        text_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{err}\n"))
    }
}

impl Default for EchoHandler {
    fn default() -> Self {
        Self::new(Arc::new(SystemEnvironment))
    }
}

impl std::fmt::Debug for EchoHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EchoHandler").finish_non_exhaustive()
    }
}

/// A plain-text response with the given status
pub fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Bytes> {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_PLAIN));
    response
}
