//! Trust pool: the root certificates client (or server) chains must end in.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use rustls::RootCertStore;
use tracing::debug;

use super::pem::parse_certs;
use crate::{Error, Result};

/// Immutable set of trusted roots, loaded once at startup.
#[derive(Debug, Clone)]
pub struct TrustPool {
    roots: Arc<RootCertStore>,
}

impl TrustPool {
    /// Read a CA bundle from disk and build the pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Trust`] when the file is unreadable, holds no PEM
    /// certificate, or none of its certificates is a usable trust anchor.
    pub fn load(path: &Path) -> Result<Self> {
        let pem = fs::read(path).map_err(|e| {
            Error::Trust(format!("Error reading CA certificate from '{}': {e}", path.display()))
        })?;
        Self::from_pem(&pem, path)
    }

    /// Build the pool from PEM bytes; `origin` is only used in messages.
    ///
    /// # Errors
    ///
    /// Same as [`TrustPool::load`], minus the read.
    pub fn from_pem(pem: &[u8], origin: &Path) -> Result<Self> {
        let certs = parse_certs(pem, origin).map_err(|e| {
            Error::Trust(format!("Failed to append CA certificate to pool: {e}"))
        })?;

        let mut roots = RootCertStore::empty();
        let (added, ignored) = roots.add_parsable_certificates(certs);
        if added == 0 {
            return Err(Error::Trust(format!(
                "No usable trust anchor in '{}' ({ignored} certificate(s) rejected)",
                origin.display()
            )));
        }

        debug!(ca_file = %origin.display(), added, ignored, "Trust pool built");
        Ok(Self {
            roots: Arc::new(roots),
        })
    }

    /// Shared handle to the root store, for verifier construction.
    #[must_use]
    pub fn roots(&self) -> Arc<RootCertStore> {
        Arc::clone(&self.roots)
    }

    /// Number of trust anchors in the pool.
    #[must_use]
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    /// Always `false` for a constructed pool; present for API symmetry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}
