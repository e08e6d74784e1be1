//! Error types for the service group API

use thiserror::Error;

/// Errors surfaced by the service group API
#[derive(Debug, Error)]
pub enum RosterError {
    /// Invalid or incomplete configuration; fatal at construction time
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Coordination backend failure that survived its bounded retry
    #[error("Coordination error: {0}")]
    Coordination(String),

    /// The driver could not produce any membership data
    #[error("Service group is temporarily unavailable from driver '{driver}'")]
    Unavailable {
        /// Name of the driver that failed to answer
        driver: &'static str,
    },

    /// The active driver does not implement the requested operation
    #[error("Driver '{driver}' does not support '{operation}'")]
    Unsupported {
        /// Name of the active driver
        driver: &'static str,
        /// The operation that was requested
        operation: &'static str,
    },
}

/// Convenience result type for service group operations
pub type Result<T> = std::result::Result<T, RosterError>;
