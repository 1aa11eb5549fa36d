use super::codec::HttpProtocolError;
use super::headers::HeaderList;
use crate::{EchoError, Result};
use bytes::{Buf, Bytes, BytesMut};
use http::StatusCode;
use std::borrow::Cow;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Configuration for [`HttpEchoClient`]
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    /// Maximum response size to prevent memory exhaustion
    pub max_response_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(30),
            max_response_size: 10 * 1024 * 1024,
        }
    }
}

/// A response read back from the server
#[derive(Debug, Clone)]
pub struct EchoResponse {
    pub status: StatusCode,
    pub headers: HeaderList,
    pub body: Bytes,
}

impl EchoResponse {
    /// The body as text, lossily decoded
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }
}

/// Minimal HTTP/1.1 client for exercising the echo server
///
/// Requests can be issued one after another on the same connection as long as
/// the server keeps it open.
///
/// # Examples
///
/// ```no_run
/// use http_echo::HttpEchoClient;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut client = HttpEchoClient::connect("127.0.0.1:8080".parse()?).await?;
///     let response = client.request("GET", "/test?a=1", &[], b"").await?;
///     println!("{}", response.text());
///     Ok(())
/// }
/// ```
pub struct HttpEchoClient {
    stream: TcpStream,
    buffer: BytesMut,
    config: ClientConfig,
}

impl HttpEchoClient {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        Self::connect_with_config(addr, ClientConfig::default()).await
    }

    pub async fn connect_with_config(addr: SocketAddr, config: ClientConfig) -> Result<Self> {
        let stream = timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| EchoError::Timeout("Connection timeout".to_string()))??;
        Ok(Self {
            stream,
            buffer: BytesMut::with_capacity(8192),
            config,
        })
    }

    /// Sends a request with `Host` and `Content-Length` filled in and reads
    /// the response
    pub async fn request(
        &mut self,
        method: &str,
        target: &str,
        headers: &[(&str, &str)],
        body: &[u8],
    ) -> Result<EchoResponse> {
        let mut raw = format!("{method} {target} HTTP/1.1\r\n");
        if !headers.iter().any(|(n, _)| n.eq_ignore_ascii_case("Host")) {
            raw.push_str("Host: localhost\r\n");
        }
        for (name, value) in headers {
            raw.push_str(&format!("{name}: {value}\r\n"));
        }
        if !body.is_empty() {
            raw.push_str(&format!("Content-Length: {}\r\n", body.len()));
        }
        raw.push_str("\r\n");

        let mut bytes = raw.into_bytes();
        bytes.extend_from_slice(body);
        self.write(&bytes).await?;
        self.read_response(method.eq_ignore_ascii_case("HEAD")).await
    }

    /// Writes `raw` as-is and reads one response
    pub async fn send_raw(&mut self, raw: &[u8]) -> Result<EchoResponse> {
        self.write(raw).await?;
        self.read_response(false).await
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        timeout(self.config.write_timeout, self.stream.write_all(data))
            .await
            .map_err(|_| EchoError::Timeout("Write timeout".to_string()))??;
        Ok(())
    }

    /// Reads one final response, skipping interim `1xx` responses.
    async fn read_response(&mut self, head_only: bool) -> Result<EchoResponse> {
        loop {
            let (status, headers, head_len) = self.read_head().await?;
            self.buffer.advance(head_len);
            if status.is_informational() {
                continue;
            }

            let length = match headers.get("Content-Length") {
                Some(v) => Some(v.trim().parse::<usize>().map_err(|_| {
                    HttpProtocolError::HttpParse(format!("bad Content-Length {v:?}"))
                })?),
                None => None,
            };

            let body = if head_only {
                Bytes::new()
            } else {
                match length {
                    Some(n) => {
                        while self.buffer.len() < n {
                            if !self.fill().await? {
                                return Err(HttpProtocolError::IncompleteBody.into());
                            }
                        }
                        self.buffer.split_to(n).freeze()
                    }
                    None => {
                        while self.fill().await? {}
                        self.buffer.split().freeze()
                    }
                }
            };

            return Ok(EchoResponse {
                status,
                headers,
                body,
            });
        }
    }

    async fn read_head(&mut self) -> Result<(StatusCode, HeaderList, usize)> {
        loop {
            let mut slots = [httparse::EMPTY_HEADER; 64];
            let mut response = httparse::Response::new(&mut slots);
            match response.parse(&self.buffer) {
                Ok(httparse::Status::Complete(len)) => {
                    let code = response.code.unwrap_or_default();
                    let status = StatusCode::from_u16(code).map_err(|e| {
                        HttpProtocolError::HttpParse(format!("bad status code {code}: {e}"))
                    })?;
                    let headers = response
                        .headers
                        .iter()
                        .map(|h| (h.name, String::from_utf8_lossy(h.value).into_owned()))
                        .collect();
                    return Ok((status, headers, len));
                }
                Ok(httparse::Status::Partial) => {}
                Err(e) => {
                    return Err(HttpProtocolError::HttpParse(format!("Failed to parse response: {e}")).into());
                }
            }

            if !self.fill().await? {
                return Err(HttpProtocolError::HttpParse(
                    "connection closed before a response arrived".to_string(),
                )
                .into());
            }
        }
    }

    /// Reads more data into the buffer; false once the server closed the stream
    async fn fill(&mut self) -> Result<bool> {
        if self.buffer.len() >= self.config.max_response_size {
            return Err(EchoError::Config(format!(
                "Response exceeds {} bytes",
                self.config.max_response_size
            )));
        }
        let n = timeout(self.config.read_timeout, self.stream.read_buf(&mut self.buffer))
            .await
            .map_err(|_| EchoError::Timeout("Read timeout".to_string()))??;
        Ok(n > 0)
    }
}
