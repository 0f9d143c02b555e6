//! Termdeck error types
//!
//! Centralized error handling using thiserror for type-safe errors.
//!
//! PTY I/O failures are contained at the session boundary: a read, write or
//! resize error on a live handle ends that session, never the multiplexer or
//! the bridge. Bridge transport failures surface through the
//! [`ConnectionState`](crate::remote::ConnectionState) channel rather than
//! through caller code.

use thiserror::Error;
use uuid::Uuid;

/// Top-level error type for termdeck
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("PTY error: {0}")]
    Pty(#[from] PtyError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// PTY-related errors
#[derive(Error, Debug)]
pub enum PtyError {
    /// Process creation failed. Surfaced to the caller; no session is
    /// registered when this is returned.
    #[error("Failed to spawn PTY: {reason}")]
    SpawnFailed { reason: String },

    #[error("PTY handle '{id}' not found")]
    NotFound { id: Uuid },

    #[error("PTY I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("PTY resize failed: {reason}")]
    ResizeFailed { reason: String },
}

/// Remote bridge errors
#[derive(Error, Debug)]
pub enum BridgeError {
    /// No bearer credential was available at connect time. The connect is
    /// aborted before any network activity.
    #[error("No remote-control credential available")]
    MissingCredential,

    /// Handshake or transport failure on the control connection.
    #[error("Control connection failed: {reason}")]
    Connection { reason: String },

    #[error("Bridge is not connected")]
    NotConnected,
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: std::path::PathBuf },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("I/O error reading configuration: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for termdeck operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Result type alias for PTY operations
pub type PtyResult<T> = std::result::Result<T, PtyError>;

/// Result type alias for bridge operations
pub type BridgeResult<T> = std::result::Result<T, BridgeError>;
