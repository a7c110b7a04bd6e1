//! Error types for netpump
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

use crate::network::ConnectionId;

/// Result type alias using NetpumpError
pub type Result<T> = std::result::Result<T, NetpumpError>;

/// Unified error type for netpump operations
#[derive(Debug, Error)]
pub enum NetpumpError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Server Errors
    // -------------------------------------------------------------------------
    #[error("Server is not listening")]
    NotListening,

    #[error("Connection {0} not found")]
    ConnectionNotFound(ConnectionId),

    // -------------------------------------------------------------------------
    // Connection Errors
    // -------------------------------------------------------------------------
    #[error("Connection {0} is closed")]
    ConnectionClosed(ConnectionId),

    #[error("Client is not connected")]
    NotConnected,

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}
