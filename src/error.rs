//! Error types for the campaign engine.

use crate::protocol::InteractableKind;

/// Top-level error type for the scheduler core.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// An actuation request did not take effect this tick. Retried next
    /// tick under the consecutive-failure counter.
    #[error("actuation failed: {0}")]
    Actuation(String),

    /// An interactable the current phase depends on could not be found.
    /// Retried with backoff before escalating to a full state reset.
    #[error("environment desync: no {0:?} found")]
    Desync(InteractableKind),

    /// Session/connectivity error (disconnect or reconnect request failed).
    #[error("session error: {0}")]
    Session(String),

    /// Configuration file could not be read or parsed.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Unrecoverable condition; triggers full shutdown.
    #[error("fatal: {0}")]
    Fatal(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, EngineError>;
