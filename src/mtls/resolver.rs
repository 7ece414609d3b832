//! Handshake-time identity supply.
//!
//! rustls asks for our certificate on every handshake. [`IdentityResolver`]
//! answers from an [`IdentitySource`], which for a [`CertificateStore`] means
//! "stat the file, reload if it changed, hand back whatever is cached".

use std::fmt;
use std::sync::Arc;

use rustls::SignatureScheme;
use rustls::client::ResolvesClientCert;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use tracing::{error, warn};

use super::store::{CertificateBundle, CertificateStore};
use crate::Result;

/// Anything that can produce the current identity bundle on demand.
pub trait IdentitySource: fmt::Debug + Send + Sync {
    /// The bundle to present right now.
    ///
    /// # Errors
    ///
    /// Fails only when no identity is available at all.
    fn current_identity(&self) -> Result<Arc<CertificateBundle>>;
}

impl IdentitySource for CertificateStore {
    fn current_identity(&self) -> Result<Arc<CertificateBundle>> {
        if let Err(e) = self.reload_if_stale() {
            // Stale-but-valid beats unavailable.
            warn!(
                cert_file = %self.cert_path().display(),
                error = %e,
                "Failed to reload certificate; serving cached bundle"
            );
        }
        self.current_bundle()
    }
}

/// rustls certificate resolver backed by an [`IdentitySource`].
///
/// Serves both directions: as a server it supplies the server identity, as a
/// client it supplies the client certificate for mutual TLS.
#[derive(Debug)]
pub struct IdentityResolver<S> {
    source: Arc<S>,
}

impl<S: IdentitySource> IdentityResolver<S> {
    /// Wrap a source.
    #[must_use]
    pub fn new(source: Arc<S>) -> Self {
        Self { source }
    }

    /// The underlying source.
    #[must_use]
    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    /// The key to hand to rustls, or `None` to fail the handshake.
    #[must_use]
    pub fn certified_key(&self) -> Option<Arc<CertifiedKey>> {
        match self.source.current_identity() {
            Ok(bundle) => Some(bundle.certified_key()),
            Err(e) => {
                error!(error = %e, "No identity available; failing handshake");
                None
            }
        }
    }
}

impl<S: IdentitySource> ResolvesServerCert for IdentityResolver<S> {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        self.certified_key()
    }
}

impl<S: IdentitySource> ResolvesClientCert for IdentityResolver<S> {
    fn resolve(
        &self,
        _root_hint_subjects: &[&[u8]],
        _sigschemes: &[SignatureScheme],
    ) -> Option<Arc<CertifiedKey>> {
        self.certified_key()
    }

    fn has_certs(&self) -> bool {
        true
    }
}
