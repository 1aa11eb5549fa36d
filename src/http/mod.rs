//! HTTP echo server implementation
//!
//! This module frames HTTP/1.1 over TCP, reads each request in full and
//! answers it with the plain-text report built by [`crate::inspect`].

pub mod client;
pub mod codec;
pub mod config;
pub mod handler;
pub mod headers;
pub mod server;


pub use client::{ClientConfig, EchoResponse, HttpEchoClient};
pub use codec::{HttpCodec, HttpProtocolError, RequestFrame, RequestHead};
pub use config::HttpConfig;
pub use handler::{EchoHandler, InboundRequest};
pub use headers::HeaderList;
pub use server::HttpEchoServer;
