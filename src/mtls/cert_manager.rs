//! rustls config building for both ends of the mutual-TLS connection.
//!
//! Provides:
//! - [`build_server_config`] - mandatory client-cert verification against a
//!   [`TrustPool`], identity supplied per handshake by a resolver
//! - [`build_client_config`] - trust pool as roots, client identity supplied
//!   per handshake by a resolver
//!
//! Both pin the negotiable versions to TLS 1.3 and TLS 1.2.

use std::sync::Arc;

use rustls::client::{ResolvesClientCert, Resumption};
use rustls::server::{NoServerSessionStorage, ResolvesServerCert, WebPkiClientVerifier};
use rustls::{ClientConfig, ServerConfig, SupportedProtocolVersion};
use tracing::debug;

use super::crypto_provider;
use super::trust::TrustPool;
use crate::{Error, Result};

/// Protocol versions offered and accepted; nothing older than TLS 1.2.
pub static PROTOCOL_VERSIONS: &[&SupportedProtocolVersion] =
    &[&rustls::version::TLS13, &rustls::version::TLS12];

/// Build the guarded server's TLS config.
///
/// Every client must present a certificate chaining to `trust`; anything
/// else is rejected inside the handshake, before application data.
///
/// # Errors
///
/// Returns an error if the client verifier cannot be built from the pool or
/// the provider does not support the pinned protocol versions.
pub fn build_server_config(
    trust: &TrustPool,
    identity: Arc<dyn ResolvesServerCert>,
) -> Result<ServerConfig> {
    let provider = crypto_provider();

    let client_verifier =
        WebPkiClientVerifier::builder_with_provider(trust.roots(), Arc::clone(&provider))
            .build()
            .map_err(|e| Error::Trust(format!("Failed to build client verifier: {e}")))?;

    let mut tls_cfg = ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(PROTOCOL_VERSIONS)?
        .with_client_cert_verifier(client_verifier)
        .with_cert_resolver(identity);

    // Prefer HTTP/2, fall back to HTTP/1.1
    tls_cfg.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    // A resumed session skips the resolver; every handshake must be full.
    tls_cfg.session_storage = Arc::new(NoServerSessionStorage {});
    tls_cfg.send_tls13_tickets = 0;

    debug!(
        trust_anchors = trust.len(),
        "mTLS server config built (client certificate required)"
    );

    Ok(tls_cfg)
}

/// Build a TLS client config that authenticates with a resolver-supplied
/// identity and trusts only `trust` for the server.
///
/// # Errors
///
/// Returns an error if the provider does not support the pinned versions.
pub fn build_client_config(
    trust: &TrustPool,
    identity: Arc<dyn ResolvesClientCert>,
) -> Result<ClientConfig> {
    let mut tls_cfg = ClientConfig::builder_with_provider(crypto_provider())
        .with_protocol_versions(PROTOCOL_VERSIONS)?
        .with_root_certificates(trust.roots())
        .with_client_cert_resolver(identity);

    // Resumption would keep presenting the identity of the first handshake.
    tls_cfg.resumption = Resumption::disabled();

    Ok(tls_cfg)
}
