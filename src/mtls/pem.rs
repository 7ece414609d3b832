//! PEM file loading.
//!
//! All certificate and key files are expected in **PEM format**. The sidecar
//! that writes them (Vault agent, cert-manager, cfssl) defaults to PEM, and a
//! single file may carry both the chain and the key.

use std::fs;
use std::path::Path;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};

use crate::{Error, Result};

/// Load all certificates from a PEM file.
///
/// # Errors
///
/// Returns [`Error::Certificate`] if the file cannot be read or contains no
/// valid PEM certificate blocks.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let pem_data = read_file(path)?;
    parse_certs(&pem_data, path)
}

/// Load the first private key from a PEM file.
///
/// Supports PKCS#1 (`RSA PRIVATE KEY`), PKCS#8 (`PRIVATE KEY`) and SEC1
/// (`EC PRIVATE KEY`) blocks.
///
/// # Errors
///
/// Returns [`Error::Certificate`] if the file cannot be read or holds no key.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let pem_data = read_file(path)?;
    rustls_pemfile::private_key(&mut pem_data.as_slice())
        .map_err(|e| {
            Error::Certificate(format!(
                "Failed to parse private key from '{}': {e}",
                path.display()
            ))
        })?
        .ok_or_else(|| {
            Error::Certificate(format!("No private key found in '{}'", path.display()))
        })
}

pub(crate) fn parse_certs(pem_data: &[u8], path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let certs = rustls_pemfile::certs(&mut &pem_data[..])
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| {
            Error::Certificate(format!(
                "Failed to parse certs from '{}': {e}",
                path.display()
            ))
        })?;

    if certs.is_empty() {
        return Err(Error::Certificate(format!(
            "No certificates found in '{}'",
            path.display()
        )));
    }

    Ok(certs)
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| Error::Certificate(format!("Cannot read '{}': {e}", path.display())))
}
