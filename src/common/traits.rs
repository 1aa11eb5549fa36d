use crate::Result;
use tokio_util::sync::CancellationToken;

/// Common trait for echo servers
///
/// Implemented by servers that run until told to stop, either by a process
/// signal or through the token returned by [`EchoServerTrait::shutdown_signal`].
pub trait EchoServerTrait {
    /// Starts the echo server and serves connections until shutdown
    async fn run(&self) -> Result<()>;

    /// Returns a token that stops the server gracefully once cancelled
    fn shutdown_signal(&self) -> CancellationToken;
}
