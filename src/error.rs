//! Error types for embedcache

use thiserror::Error;

/// Main error type surfaced to the host
#[derive(Error, Debug)]
pub enum CacheError {
    /// Malformed key/value shape, no I/O was attempted
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown behavior flag, unsupported capability or bad configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network or protocol failure reported by the backend
    #[error("Cache error: {0}")]
    Transient(#[from] BackendError),

    /// Value outside the caller's numeric domain
    #[error("Range error: {0}")]
    Range(String),

    /// Operation attempted before the client was loaded
    #[error("memcache client is not initialized")]
    NotInitialized,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Reply parsing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid reply: {0}")]
    InvalidReply(String),

    #[error("Invalid flags")]
    InvalidFlags,

    #[error("Invalid bytes length")]
    InvalidBytesLength,

    #[error("Invalid numeric value")]
    InvalidNumericValue,

    #[error("Invalid magic byte: {0:#04x}")]
    InvalidMagic(u8),

    #[error("Unexpected opcode: {0:#04x}")]
    UnexpectedOpcode(u8),

    #[error("Unexpected data")]
    UnexpectedData,
}

/// Errors reported by a backend for a single request
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("No servers defined")]
    NoServers,

    #[error("Server {0} is marked dead")]
    ServerMarkedDead(String),

    #[error("Invalid server definition: {0}")]
    InvalidServer(String),

    #[error("Item not stored")]
    NotStored,

    #[error("Item exists")]
    Exists,

    #[error("Cannot increment or decrement non-numeric value")]
    NonNumeric,

    #[error("Invalid key for this protocol")]
    InvalidKey,

    #[error("Value too large")]
    ValueTooLarge,

    #[error("Server error: {0}")]
    Server(String),

    #[error("Client error: {0}")]
    Client(String),

    #[error("Unknown command")]
    UnknownCommand,

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Not supported by this backend: {0}")]
    Unsupported(String),
}

impl BackendError {
    /// Errors that leave the connection in an unknown state
    pub fn is_transport(&self) -> bool {
        matches!(self, BackendError::Io(_) | BackendError::Protocol(_))
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
