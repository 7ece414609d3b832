//! Error types for mtls-sentry

use std::io;

use thiserror::Error;

/// Result type alias for mtls-sentry
pub type Result<T> = std::result::Result<T, Error>;

/// mtls-sentry errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Identity certificate or key could not be read, parsed, or paired
    #[error("Certificate error: {0}")]
    Certificate(String),

    /// Trust pool (CA bundle) could not be built
    #[error("Trust pool error: {0}")]
    Trust(String),

    /// No identity bundle has ever loaded successfully
    #[error("Identity not yet available: {0}")]
    NotYetAvailable(String),

    /// TLS layer error
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
