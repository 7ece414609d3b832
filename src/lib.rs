//! mtls-sentry library
//!
//! Mutual-TLS enforcement and its continuous verification.
//!
//! # Roles
//!
//! - **Guarded server** ([`guard`]): accepts only clients presenting a
//!   certificate that chains to the trust pool; its own identity hot-reloads
//!   from disk on every handshake.
//! - **Probe agent** ([`probe`]): repeatedly attempts certificate-less access
//!   and reports any success as a critical failure.
//! - **Authenticated caller** ([`caller`]): the legitimate client, presenting
//!   its own hot-reloaded identity.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod caller;
pub mod cli;
pub mod config;
pub mod error;
pub mod guard;
pub mod mtls;
pub mod probe;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// `RUST_LOG` takes precedence over `level`.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| Error::Config(format!("Invalid log level '{level}': {e}")))?;

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Internal(e.to_string())),
        Some("text") | None => subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| Error::Internal(e.to_string())),
        Some(other) => Err(Error::Config(format!(
            "Unknown log format '{other}' (expected text or json)"
        ))),
    }
}
