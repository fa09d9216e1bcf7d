//! Error types for the SMTP client.

use std::io;

use thiserror::Error;

/// Errors that can occur when talking to a remote mail exchanger.
#[derive(Error, Debug)]
pub enum ClientError {
    /// IO error occurred during network operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Failed to parse an SMTP response from the server.
    #[error("Failed to parse SMTP response: {0}")]
    ParseError(String),

    /// TLS/SSL error occurred.
    #[error("TLS error: {0}")]
    TlsError(String),

    /// The message could not be rendered.
    #[error("Invalid message: {0}")]
    BuilderError(String),

    /// Connection was closed unexpectedly.
    #[error("Connection closed unexpectedly")]
    ConnectionClosed,
}

/// Specialized `Result` type for SMTP client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
