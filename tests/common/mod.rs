//! Common test utilities and helpers

#![allow(dead_code)]

pub mod fixtures;
pub mod mock_server;
pub mod test_helpers;

pub use mock_server::MockContentServer;
pub use test_helpers::*;
