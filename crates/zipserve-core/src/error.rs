//! Error types for zipserve.

use crate::archive::ArchiveError;
use crate::config::ConfigError;
use thiserror::Error;

/// Core error type for zipserve operations.
#[derive(Error, Debug)]
pub enum ZipServeError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Archive build errors
    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    /// Failed to bind the listening socket
    #[error("Failed to bind to {address}: {source}")]
    Bind {
        /// Address the bind was attempted on.
        address: std::net::SocketAddr,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for zipserve operations.
pub type Result<T> = std::result::Result<T, ZipServeError>;
