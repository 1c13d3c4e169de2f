//! Error types for the Palisade core.

use thiserror::Error;

/// Main error type for Palisade operations.
///
/// Expected runtime conditions (a denied admission check, an empty buffer,
/// an unknown flow id) are ordinary return values, not errors. Errors are
/// reserved for construction-time misconfiguration and config file I/O.
#[derive(Error, Debug)]
pub enum PalisadeError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A policy table that cannot satisfy lookups (e.g. missing the
    /// fallback policy, or a route naming an undefined policy)
    #[error("Policy error: {0}")]
    Policy(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Palisade operations.
pub type Result<T> = std::result::Result<T, PalisadeError>;
