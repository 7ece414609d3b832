//! Mutual TLS (mTLS) plumbing.
//!
//! # Architecture
//!
//! ```text
//! sidecar writes PEM files
//!   → CertificateStore   (stat, reload on newer mtime, keep last good)
//!   → IdentityResolver   (consulted by rustls on every handshake)
//!   → ServerConfig       (WebPkiClientVerifier over the TrustPool)
//! ```
//!
//! # Modules
//!
//! - [`store`] - hot-reloading identity cache (`CertificateStore`, `CertificateBundle`)
//! - [`resolver`] - handshake-time identity supply (`IdentitySource`, `IdentityResolver`)
//! - [`trust`] - immutable root pool (`TrustPool`)
//! - [`cert_manager`] - rustls server/client config building
//! - [`identity`] - leaf certificate summary for logs (`CertSummary`)
//! - [`pem`] - PEM file loading

use std::sync::Arc;

use rustls::crypto::CryptoProvider;

pub mod cert_manager;
pub mod identity;
pub mod pem;
pub mod resolver;
pub mod store;
pub mod trust;

#[cfg(test)]
pub(crate) mod testing;

pub use cert_manager::{PROTOCOL_VERSIONS, build_client_config, build_server_config};
pub use identity::CertSummary;
pub use resolver::{IdentityResolver, IdentitySource};
pub use store::{CertificateBundle, CertificateStore, ReloadOutcome};
pub use trust::TrustPool;

/// The crypto provider every config in this crate is built with.
///
/// Passed explicitly so the process-wide default never has to be installed.
#[must_use]
pub fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::aws_lc_rs::default_provider())
}
