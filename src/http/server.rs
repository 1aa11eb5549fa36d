use super::HttpConfig;
use super::codec::{HttpCodec, RequestFrame, http_date};
use super::handler::{EchoHandler, InboundRequest, text_response};
use crate::common::EchoServerTrait;
use crate::inspect::{BodyReadError, RequestStart};
use crate::{EchoError, Result};
use bytes::Bytes;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use http::header::{CONNECTION, CONTENT_LENGTH, DATE, HeaderValue};
use http::{Method, Response, StatusCode, Version};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::signal;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};

/// HTTP/1.1 server that answers every request with the diagnostic report
///
/// # Examples
///
/// ```no_run
/// use http_echo::{EchoServerTrait, HttpConfig, HttpEchoServer};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let server = HttpEchoServer::new(HttpConfig::with_port(8080));
///     server.run().await?;
///     Ok(())
/// }
/// ```
pub struct HttpEchoServer {
    config: HttpConfig,
    handler: EchoHandler,
    shutdown: CancellationToken,
}

impl HttpEchoServer {
    /// Creates a server that reports on the real host environment
    pub fn new(config: HttpConfig) -> Self {
        Self::with_handler(config, EchoHandler::default())
    }

    pub fn with_handler(config: HttpConfig, handler: EchoHandler) -> Self {
        Self {
            config,
            handler,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    /// Serves connections from an already bound listener until a shutdown
    /// signal arrives, then drains in-flight connections.
    ///
    /// Returns [`EchoError::Shutdown`] when connections were still open at
    /// the end of the grace period and had to be aborted.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        info!(address = %local_addr, max_connections = self.config.max_connections, "HTTP echo server listening");

        let drain = self.shutdown.child_token();
        let mut connections = JoinSet::new();
        let termination = termination_signal();
        tokio::pin!(termination);

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => {
                            if connections.len() >= self.config.max_connections {
                                warn!(%addr, current = connections.len(), limit = self.config.max_connections, "Connection rejected: limit reached");
                                continue;
                            }

                            let connection = Connection {
                                config: self.config.clone(),
                                handler: self.handler.clone(),
                                drain: drain.clone(),
                            };
                            let span = tracing::info_span!("connection", %addr);
                            connections.spawn(
                                async move {
                                    debug!("Accepted connection");
                                    if let Err(e) = connection.run(stream, addr).await {
                                        warn!(error = %e, "Error handling connection");
                                    }
                                    debug!("Connection closed");
                                }
                                .instrument(span),
                            );
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!(error = %e, "Connection task panicked");
                        }
                    }
                }
                _ = &mut termination => {
                    info!("Received shutdown signal, stopping server");
                    break;
                }
                _ = self.shutdown.cancelled() => {
                    info!("Received internal shutdown signal, stopping server");
                    break;
                }
            }
        }

        drop(listener);
        drain.cancel();
        let result = drain_connections(connections, self.config.shutdown_timeout).await;
        info!("HTTP echo server stopped");
        result
    }
}

impl EchoServerTrait for HttpEchoServer {
    /// Binds the configured address and serves until shutdown
    async fn run(&self) -> Result<()> {
        let addr = self.config.bind_addr;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| EchoError::Listen { addr, source })?;
        self.serve(listener).await
    }

    fn shutdown_signal(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

/// Waits up to `grace` for every connection task, then aborts the rest
async fn drain_connections(mut connections: JoinSet<()>, grace: Duration) -> Result<()> {
    if connections.is_empty() {
        return Ok(());
    }

    info!(in_flight = connections.len(), ?grace, "Waiting for in-flight connections");
    let finished = timeout(grace, async {
        while connections.join_next().await.is_some() {}
    })
    .await;

    if finished.is_err() {
        let remaining = connections.len();
        connections.shutdown().await;
        return Err(EchoError::Shutdown(format!(
            "{remaining} connection(s) still open after {grace:?}"
        )));
    }
    Ok(())
}

/// Resolves on SIGINT or SIGTERM
async fn termination_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

type Transport = Framed<TcpStream, HttpCodec>;

/// Per-connection state: requests on one connection are served in order
struct Connection {
    config: HttpConfig,
    handler: EchoHandler,
    drain: CancellationToken,
}

impl Connection {
    async fn run(self, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        let mut transport = Framed::new(stream, HttpCodec::new(self.config.max_header_bytes));
        let mut served = 0u64;

        loop {
            let wait = if served == 0 {
                self.config.read_timeout
            } else {
                self.config.idle_timeout
            };

            let frame = tokio::select! {
                biased;
                _ = self.drain.cancelled() => {
                    debug!(served, "Closing idle connection for shutdown");
                    break;
                }
                frame = timeout(wait, transport.next()) => frame,
            };

            let head = match frame {
                Err(_) => {
                    debug!(served, timeout = ?wait, "No request before timeout");
                    break;
                }
                Ok(None) => {
                    debug!(served, "Client closed connection");
                    break;
                }
                Ok(Some(Ok(RequestFrame::Head(head)))) => head,
                Ok(Some(Ok(RequestFrame::Body(_)))) => {
                    return Err(EchoError::Config(
                        "request body decoded without a head".to_string(),
                    ));
                }
                Ok(Some(Err(e))) => {
                    let Some(status) = e.rejection_status() else {
                        return Err(e.into());
                    };
                    warn!(error = %e, status = status.as_u16(), "Rejecting request");
                    let response = prepare(
                        text_response(status, format!("{status}\n")),
                        &Method::GET,
                        Version::HTTP_11,
                        false,
                    );
                    if let Err(e) = self.send(&mut transport, response).await {
                        debug!(error = %e, "Failed to send rejection");
                    }
                    break;
                }
            };

            let start = RequestStart::now();
            let method = head.method.clone();
            let version = head.version;
            let target = head.target.clone();
            let wants_keep_alive = head.keep_alive();

            if head.expects_continue() {
                let mut interim = Response::new(Bytes::new());
                *interim.status_mut() = StatusCode::CONTINUE;
                self.send(&mut transport, interim).await?;
            }

            let (response, body_ok) = match self.read_body(&mut transport).await {
                Ok(body) => {
                    let request = InboundRequest {
                        head,
                        body,
                        remote_addr: addr,
                        start,
                    };
                    (self.handler.handle(request), true)
                }
                Err(e) => {
                    warn!(method = %method, path = %target, error = %e, "Failed to read request body");
                    (self.handler.body_read_failed(&e), false)
                }
            };

            let keep_alive = wants_keep_alive && body_ok && !self.drain.is_cancelled();
            let status = response.status();
            self.send(&mut transport, prepare(response, &method, version, keep_alive))
                .await?;
            served += 1;

            info!(
                method = %method,
                path = %target,
                status = status.as_u16(),
                elapsed = ?start.elapsed(),
                "Served request"
            );

            if !keep_alive {
                break;
            }
        }

        Ok(())
    }

    /// Reads the body frame that follows a head, bounded by the read timeout
    async fn read_body(&self, transport: &mut Transport) -> std::result::Result<Bytes, BodyReadError> {
        match timeout(self.config.read_timeout, transport.next()).await {
            Err(_) => Err(BodyReadError::Timeout(self.config.read_timeout)),
            Ok(None) => Err(BodyReadError::Incomplete),
            Ok(Some(Ok(RequestFrame::Body(body)))) => Ok(body),
            Ok(Some(Ok(RequestFrame::Head(_)))) => Err(BodyReadError::Malformed(
                "request head where a body was expected".to_string(),
            )),
            Ok(Some(Err(e))) => Err(e.into()),
        }
    }

    async fn send(&self, transport: &mut Transport, response: Response<Bytes>) -> Result<()> {
        match timeout(self.config.write_timeout, transport.send(response)).await {
            Ok(result) => result.map_err(EchoError::from),
            Err(_) => Err(EchoError::Timeout(format!(
                "writing response took longer than {:?}",
                self.config.write_timeout
            ))),
        }
    }
}

/// Adds the framing headers and strips the body of responses to `HEAD`
fn prepare(mut response: Response<Bytes>, method: &Method, version: Version, keep_alive: bool) -> Response<Bytes> {
    let length = response.body().len();
    let headers = response.headers_mut();
    headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
    if let Ok(date) = HeaderValue::from_str(&http_date(Utc::now())) {
        headers.insert(DATE, date);
    }
    if !keep_alive {
        headers.insert(CONNECTION, HeaderValue::from_static("close"));
    } else if version == Version::HTTP_10 {
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    }

    if *method == Method::HEAD {
        *response.body_mut() = Bytes::new();
    }
    response
}
