use color_eyre::eyre::{Result, WrapErr, eyre};
use http_echo::http::config::DEFAULT_PORT;
use http_echo::{EchoError, EchoServerTrait, HttpConfig, HttpEchoServer};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("http_echo=info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let port = match args.get(1).map(String::as_str) {
        None => DEFAULT_PORT,
        Some("-h" | "--help") => {
            print_usage(&args[0]);
            return Ok(());
        }
        Some(raw) => raw
            .parse::<u16>()
            .map_err(|e| eyre!("invalid port {raw:?}: {e}"))?,
    };

    let config = HttpConfig::with_port(port);
    info!(
        address = %config.bind_addr,
        read_timeout = ?config.read_timeout,
        write_timeout = ?config.write_timeout,
        idle_timeout = ?config.idle_timeout,
        "Starting HTTP echo server"
    );

    let server = HttpEchoServer::new(config);
    match server.run().await {
        Ok(()) => Ok(()),
        Err(EchoError::Shutdown(reason)) => {
            error!(%reason, "Server shutdown error");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Could not start server");
            Err(e).wrap_err("Could not start server")
        }
    }
}

fn print_usage(program: &str) {
    eprintln!("Usage: {program} [port]");
    eprintln!("  port: Port to listen on (default: {DEFAULT_PORT})");
    eprintln!();
    eprintln!("Every request, whatever its method or path, is answered with a");
    eprintln!("plain-text report of what the server observed about it.");
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  {program}          # Listen on 0.0.0.0:{DEFAULT_PORT}");
    eprintln!("  {program} 9000     # Listen on 0.0.0.0:9000");
    eprintln!("  RUST_LOG=http_echo=debug {program}");
}
