//! Error types for the tabula access layer

use thiserror::Error;

use crate::EngineType;

/// Core error type for tabula operations
#[derive(Error, Debug)]
pub enum AccessError {
    /// The encrypted credential envelope is structurally malformed.
    #[error("Invalid credentials format: {0}")]
    InvalidCredentialsFormat(String),

    /// Authentication tag mismatch or wrong key. Deterministic, never retried.
    #[error("Decryption failed: master password missing or incorrect")]
    DecryptionFailed,

    /// The engine exists but cannot honor this contract method.
    #[error("Operation '{operation}' is not supported for {engine}")]
    UnsupportedOperation {
        engine: EngineType,
        operation: &'static str,
    },

    /// No data access object is registered for the engine.
    #[error("No data access object registered for engine '{0}'")]
    UnsupportedEngine(EngineType),

    #[error("SSH tunnel failed: {0}")]
    TunnelFailed(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Internal(String),
}

impl AccessError {
    /// Shorthand used by engine implementations for contract methods
    /// they cannot honor. Callers can tell "no data" from "cannot answer".
    pub fn unsupported(engine: EngineType, operation: &'static str) -> Self {
        Self::UnsupportedOperation { engine, operation }
    }
}

/// Result type alias for tabula operations
pub type Result<T> = std::result::Result<T, AccessError>;
