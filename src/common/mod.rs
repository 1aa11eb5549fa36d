//! Common traits and helpers used across the http-echo library
//!
//! This module contains the server trait and the helpers the test suites use
//! to start servers and build requests.

pub mod test_utils;
pub mod traits;

pub use test_utils::{TestServer, spawn_test_server};
pub use traits::EchoServerTrait;
