//! Shared test support for delivery integration tests

pub mod mock_server;
