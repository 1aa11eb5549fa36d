use super::headers::HeaderList;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use http::{Method, Response, StatusCode, Uri, Version};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

/// Header slots handed to httparse on the first attempt; doubled on overflow.
const INITIAL_HEADER_SLOTS: usize = 64;

/// Most header fields accepted in one request head; more is answered with 431.
pub const MAX_HEADER_FIELDS: usize = 8192;

/// Default cap on the size of a request head (request line plus headers).
pub const DEFAULT_MAX_HEADER_BYTES: usize = 1 << 20;

#[derive(Debug, thiserror::Error)]
pub enum HttpProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("HTTP parsing error: {0}")]
    HttpParse(String),
    #[error("Request head exceeds {limit} bytes")]
    HeadersTooLarge { limit: usize },
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Malformed request body: {0}")]
    MalformedBody(String),
    #[error("Connection closed before the request body was complete")]
    IncompleteBody,
}

impl HttpProtocolError {
    /// Status to answer with before closing the connection, for errors that
    /// reject a request before it reaches the handler
    pub fn rejection_status(&self) -> Option<StatusCode> {
        match self {
            HttpProtocolError::HeadersTooLarge { .. } => {
                Some(StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE)
            }
            HttpProtocolError::HttpParse(_) | HttpProtocolError::InvalidRequest(_) => {
                Some(StatusCode::BAD_REQUEST)
            }
            _ => None,
        }
    }
}

/// How the length of a request body is determined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyLength {
    /// `Content-Length`, or zero when neither framing header is present
    Known(u64),
    /// `Transfer-Encoding: chunked`
    Chunked,
}

/// A parsed request line plus headers
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    /// The request target exactly as it appeared on the request line
    pub target: String,
    /// `target` as a URI; `None` for targets `http::Uri` refuses, such as a
    /// query carrying `"`, `<` or `>`
    pub uri: Option<Uri>,
    pub version: Version,
    pub headers: HeaderList,
    pub body_length: BodyLength,
}

impl RequestHead {
    /// Whether the connection may carry another request after this one
    pub fn keep_alive(&self) -> bool {
        match self.version {
            Version::HTTP_11 => !self.headers.has_token("Connection", "close"),
            _ => self.headers.has_token("Connection", "keep-alive"),
        }
    }

    /// Whether the client waits for `100 Continue` before sending the body
    pub fn expects_continue(&self) -> bool {
        self.version == Version::HTTP_11
            && self
                .headers
                .get("Expect")
                .is_some_and(|v| v.trim().eq_ignore_ascii_case("100-continue"))
            && self.body_length != BodyLength::Known(0)
    }

    /// Path component of the target, without the query
    pub fn path(&self) -> &str {
        match &self.uri {
            Some(uri) => uri.path(),
            None => split_target(&self.target).0,
        }
    }

    /// Raw query string after the first `?`, if any
    pub fn query(&self) -> Option<&str> {
        match &self.uri {
            Some(uri) => uri.query(),
            None => split_target(&self.target).1,
        }
    }

    /// Authority of an absolute-form target
    pub fn authority(&self) -> Option<&str> {
        self.uri
            .as_ref()
            .and_then(Uri::authority)
            .map(|authority| authority.as_str())
    }

    /// The body length announced up front, `None` for chunked bodies
    pub fn declared_length(&self) -> Option<u64> {
        match self.body_length {
            BodyLength::Known(n) => Some(n),
            BodyLength::Chunked => None,
        }
    }
}

/// Items produced by [`HttpCodec`]: every `Head` is followed by exactly one `Body`
#[derive(Debug)]
pub enum RequestFrame {
    Head(RequestHead),
    Body(Bytes),
}

#[derive(Debug)]
enum DecodeState {
    Head,
    Body(BodyDecoder),
}

#[derive(Debug, Clone, Copy)]
enum ChunkPhase {
    Size,
    Data(u64),
    DataEnd,
    Trailer,
}

#[derive(Debug)]
enum BodyDecoder {
    Length { remaining: u64, body: BytesMut },
    Chunked { phase: ChunkPhase, body: BytesMut },
}

impl BodyDecoder {
    fn new(length: BodyLength) -> Self {
        match length {
            BodyLength::Known(n) => BodyDecoder::Length {
                remaining: n,
                body: BytesMut::with_capacity(n.min(64 * 1024) as usize),
            },
            BodyLength::Chunked => BodyDecoder::Chunked {
                phase: ChunkPhase::Size,
                body: BytesMut::new(),
            },
        }
    }

    fn decode(
        &mut self,
        src: &mut BytesMut,
        max_line: usize,
    ) -> Result<Option<Bytes>, HttpProtocolError> {
        match self {
            BodyDecoder::Length { remaining, body } => {
                let take = (*remaining).min(src.len() as u64) as usize;
                body.extend_from_slice(&src.split_to(take));
                *remaining -= take as u64;
                if *remaining == 0 {
                    Ok(Some(std::mem::take(body).freeze()))
                } else {
                    Ok(None)
                }
            }
            BodyDecoder::Chunked { phase, body } => loop {
                *phase = match *phase {
                    ChunkPhase::Size => match httparse::parse_chunk_size(src) {
                        Ok(httparse::Status::Complete((consumed, size))) => {
                            src.advance(consumed);
                            if size == 0 {
                                ChunkPhase::Trailer
                            } else {
                                ChunkPhase::Data(size)
                            }
                        }
                        Ok(httparse::Status::Partial) => {
                            if src.len() > max_line {
                                return Err(HttpProtocolError::MalformedBody(
                                    "chunk size line too long".to_string(),
                                ));
                            }
                            return Ok(None);
                        }
                        Err(_) => {
                            return Err(HttpProtocolError::MalformedBody(
                                "invalid chunk size".to_string(),
                            ));
                        }
                    },
                    ChunkPhase::Data(remaining) => {
                        if src.is_empty() {
                            return Ok(None);
                        }
                        let take = remaining.min(src.len() as u64) as usize;
                        body.extend_from_slice(&src.split_to(take));
                        match remaining - take as u64 {
                            0 => ChunkPhase::DataEnd,
                            left => ChunkPhase::Data(left),
                        }
                    }
                    ChunkPhase::DataEnd => {
                        if src.len() < 2 {
                            return Ok(None);
                        }
                        if &src[..2] != b"\r\n" {
                            return Err(HttpProtocolError::MalformedBody(
                                "missing CRLF after chunk data".to_string(),
                            ));
                        }
                        src.advance(2);
                        ChunkPhase::Size
                    }
                    // Trailer fields are read and discarded.
                    ChunkPhase::Trailer => match find_crlf(src) {
                        Some(0) => {
                            src.advance(2);
                            return Ok(Some(std::mem::take(body).freeze()));
                        }
                        Some(end) => {
                            src.advance(end + 2);
                            ChunkPhase::Trailer
                        }
                        None if src.len() > max_line => {
                            return Err(HttpProtocolError::MalformedBody(
                                "trailer section too long".to_string(),
                            ));
                        }
                        None => return Ok(None),
                    },
                };
            },
        }
    }
}

/// HTTP/1.1 server-side codec.
///
/// Decodes requests as a `Head` frame followed by a `Body` frame carrying the
/// complete body, and encodes `http::Response<Bytes>` values verbatim. The
/// split lets the connection answer `Expect: 100-continue` and apply its own
/// timeout to the body read.
#[derive(Debug)]
pub struct HttpCodec {
    max_header_bytes: usize,
    /// Slot count that last sufficed, reused while a head arrives in pieces
    header_slots: usize,
    state: DecodeState,
}

impl HttpCodec {
    pub fn new(max_header_bytes: usize) -> Self {
        Self {
            max_header_bytes,
            header_slots: INITIAL_HEADER_SLOTS,
            state: DecodeState::Head,
        }
    }

    /// True while a request head has been returned but its body has not
    pub fn is_reading_body(&self) -> bool {
        matches!(self.state, DecodeState::Body(_))
    }
}

impl Default for HttpCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HEADER_BYTES)
    }
}

impl Decoder for HttpCodec {
    type Item = RequestFrame;
    type Error = HttpProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<RequestFrame>, HttpProtocolError> {
        if let DecodeState::Body(body) = &mut self.state {
            return match body.decode(src, self.max_header_bytes)? {
                Some(bytes) => {
                    self.state = DecodeState::Head;
                    Ok(Some(RequestFrame::Body(bytes)))
                }
                None => Ok(None),
            };
        }

        // Empty lines ahead of a request line are ignored.
        while src.starts_with(b"\r\n") {
            src.advance(2);
        }
        if src.is_empty() {
            return Ok(None);
        }

        match parse_head(src, self.max_header_bytes, &mut self.header_slots)? {
            Some((head, len)) => {
                src.advance(len);
                self.header_slots = INITIAL_HEADER_SLOTS;
                self.state = DecodeState::Body(BodyDecoder::new(head.body_length));
                Ok(Some(RequestFrame::Head(head)))
            }
            None => Ok(None),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<RequestFrame>, HttpProtocolError> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        match self.state {
            DecodeState::Body(_) => Err(HttpProtocolError::IncompleteBody),
            DecodeState::Head if src.is_empty() => Ok(None),
            DecodeState::Head => Err(HttpProtocolError::HttpParse(
                "connection closed inside request head".to_string(),
            )),
        }
    }
}

impl Encoder<Response<Bytes>> for HttpCodec {
    type Error = HttpProtocolError;

    fn encode(&mut self, response: Response<Bytes>, dst: &mut BytesMut) -> Result<(), HttpProtocolError> {
        let (parts, body) = response.into_parts();
        let status = parts.status;

        dst.reserve(128 + parts.headers.len() * 32 + body.len());
        dst.put_slice(b"HTTP/1.1 ");
        dst.put_slice(status.as_str().as_bytes());
        dst.put_u8(b' ');
        dst.put_slice(status.canonical_reason().unwrap_or("").as_bytes());
        dst.put_slice(b"\r\n");
        for (name, value) in &parts.headers {
            dst.put_slice(name.as_str().as_bytes());
            dst.put_slice(b": ");
            dst.put_slice(value.as_bytes());
            dst.put_slice(b"\r\n");
        }
        dst.put_slice(b"\r\n");
        dst.put_slice(&body);
        Ok(())
    }
}

/// Formats `at` as an HTTP date (`Sun, 06 Nov 1994 08:49:37 GMT`)
pub fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn parse_head(
    src: &[u8],
    max_header_bytes: usize,
    slots: &mut usize,
) -> Result<Option<(RequestHead, usize)>, HttpProtocolError> {
    // Smallest possible header line is "a:\r\n".
    let max_slots = (max_header_bytes / 4).clamp(INITIAL_HEADER_SLOTS, MAX_HEADER_FIELDS);

    loop {
        let mut headers = vec![httparse::EMPTY_HEADER; *slots];
        let mut req = httparse::Request::new(&mut headers);
        match req.parse(src) {
            Ok(httparse::Status::Complete(len)) => {
                if len > max_header_bytes {
                    return Err(HttpProtocolError::HeadersTooLarge {
                        limit: max_header_bytes,
                    });
                }
                return build_head(&req).map(|head| Some((head, len)));
            }
            Ok(httparse::Status::Partial) => {
                if src.len() > max_header_bytes {
                    return Err(HttpProtocolError::HeadersTooLarge {
                        limit: max_header_bytes,
                    });
                }
                return Ok(None);
            }
            Err(httparse::Error::TooManyHeaders) if *slots < max_slots => {
                *slots = (*slots * 2).min(max_slots);
            }
            Err(httparse::Error::TooManyHeaders) => {
                return Err(HttpProtocolError::HeadersTooLarge {
                    limit: max_header_bytes,
                });
            }
            Err(e) => {
                return Err(HttpProtocolError::HttpParse(format!(
                    "Failed to parse request head: {e}"
                )));
            }
        }
    }
}

fn build_head(req: &httparse::Request<'_, '_>) -> Result<RequestHead, HttpProtocolError> {
    let missing = |what: &str| HttpProtocolError::HttpParse(format!("missing {what}"));

    let method = req.method.ok_or_else(|| missing("method"))?;
    let method = Method::from_bytes(method.as_bytes())
        .map_err(|e| HttpProtocolError::InvalidRequest(format!("bad method {method:?}: {e}")))?;

    let target = req.path.ok_or_else(|| missing("request target"))?.to_string();
    let uri = target.parse::<Uri>().ok();

    let version = match req.version.ok_or_else(|| missing("version"))? {
        0 => Version::HTTP_10,
        _ => Version::HTTP_11,
    };

    let headers: HeaderList = req
        .headers
        .iter()
        .map(|h| (h.name, String::from_utf8_lossy(h.value).into_owned()))
        .collect();

    let body_length = body_length(&headers)?;

    Ok(RequestHead {
        method,
        target,
        uri,
        version,
        headers,
        body_length,
    })
}

fn body_length(headers: &HeaderList) -> Result<BodyLength, HttpProtocolError> {
    if headers.contains("Transfer-Encoding") {
        let last = headers
            .get_all("Transfer-Encoding")
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .last();
        return match last {
            Some(coding) if coding.eq_ignore_ascii_case("chunked") => Ok(BodyLength::Chunked),
            _ => Err(HttpProtocolError::InvalidRequest(
                "unsupported transfer encoding".to_string(),
            )),
        };
    }

    let mut length = None;
    for value in headers.get_all("Content-Length") {
        let digits = value.trim();
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(HttpProtocolError::InvalidRequest(format!(
                "bad Content-Length {value:?}"
            )));
        }
        let parsed = digits
            .parse::<u64>()
            .map_err(|_| HttpProtocolError::InvalidRequest(format!("bad Content-Length {value:?}")))?;
        match length {
            Some(previous) if previous != parsed => {
                return Err(HttpProtocolError::InvalidRequest(
                    "conflicting Content-Length values".to_string(),
                ));
            }
            _ => length = Some(parsed),
        }
    }
    Ok(BodyLength::Known(length.unwrap_or(0)))
}

/// Splits a request target at the first `?` into path and query
fn split_target(target: &str) -> (&str, Option<&str>) {
    match target.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (target, None),
    }
}

fn find_crlf(src: &[u8]) -> Option<usize> {
    src.windows(2).position(|w| w == b"\r\n")
}
