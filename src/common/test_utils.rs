use crate::common::EchoServerTrait;
use crate::http::codec::{BodyLength, RequestHead};
use crate::http::headers::HeaderList;
use crate::http::{EchoHandler, HttpConfig, HttpEchoServer};
use crate::inspect::Environment;
use crate::{EchoError, Result};
use http::{Method, Uri, Version};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A server running in the background on an ephemeral loopback port
pub struct TestServer {
    pub addr: SocketAddr,
    pub shutdown: CancellationToken,
    pub handle: JoinHandle<Result<()>>,
}

impl TestServer {
    /// Triggers graceful shutdown and waits for the server task to finish
    pub async fn stop(self) -> Result<()> {
        self.shutdown.cancel();
        self.handle
            .await
            .map_err(|e| EchoError::Config(format!("Server task failed: {e}")))?
    }
}

/// Starts an HTTP echo server for integration tests
///
/// The listener is bound before the server task starts, so the returned
/// address accepts connections immediately. `config.bind_addr` is ignored.
pub async fn spawn_test_server(
    config: HttpConfig,
    environment: Arc<dyn Environment>,
) -> Result<TestServer> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|e| EchoError::Config(format!("Failed to bind listener: {e}")))?;
    let addr = listener
        .local_addr()
        .map_err(|e| EchoError::Config(format!("Failed to get local address: {e}")))?;

    let config = HttpConfig {
        bind_addr: addr,
        ..config
    };
    let server = HttpEchoServer::with_handler(config, EchoHandler::new(environment));
    let shutdown = server.shutdown_signal();
    let handle = tokio::spawn(async move { server.serve(listener).await });

    Ok(TestServer {
        addr,
        shutdown,
        handle,
    })
}

/// Builds a decoded request head without going through the wire codec.
pub fn request_head(method: Method, target: &str, headers: &[(&str, &str)], body_len: u64) -> RequestHead {
    let headers: HeaderList = headers.iter().copied().collect();
    RequestHead {
        method,
        target: target.to_string(),
        uri: target.parse::<Uri>().ok(),
        version: Version::HTTP_11,
        headers,
        body_length: BodyLength::Known(body_len),
    }
}
