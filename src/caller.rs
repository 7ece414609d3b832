//! Authenticated caller: the legitimate client of the guarded server.
//!
//! Presents a client certificate from its own [`CertificateStore`], so a
//! rotated identity is used on the next connection without a restart.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::Result;
use crate::config::CallerConfig;
use crate::mtls::{
    CertificateStore, IdentityResolver, TrustPool, build_client_config, crypto_provider,
};

/// One message and the server's answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Exchange {
    /// What was sent
    pub sent: String,
    /// What came back
    pub reply: String,
}

/// mTLS client for the guarded server.
#[derive(Debug)]
pub struct MtlsCaller {
    client: reqwest::Client,
    target: String,
    store: Arc<CertificateStore>,
}

impl MtlsCaller {
    /// Load identity and trust roots, then build the HTTP client.
    ///
    /// # Errors
    ///
    /// Returns an error if the identity or trust roots cannot be loaded or
    /// the client cannot be built.
    pub fn from_config(config: &CallerConfig) -> Result<Self> {
        let store = Arc::new(CertificateStore::new(
            &config.cert_file,
            config.key_source(),
            crypto_provider(),
        ));
        let bundle = store.load_initial()?;
        let trust = TrustPool::load(config.trust_anchor_file())?;
        debug!(
            subject = bundle.summary().display_name(),
            trust_anchors = trust.len(),
            "Caller identity loaded"
        );

        let resolver = Arc::new(IdentityResolver::new(Arc::clone(&store)));
        let tls = build_client_config(&trust, resolver)?;

        // No idle connections: each call handshakes with the current identity.
        let client = reqwest::Client::builder()
            .use_preconfigured_tls(tls)
            .timeout(config.request_timeout())
            .pool_max_idle_per_host(0)
            .build()?;

        Ok(Self {
            client,
            target: config.target().to_string(),
            store,
        })
    }

    /// Address of the guarded server.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// The identity store backing every handshake.
    #[must_use]
    pub fn store(&self) -> &Arc<CertificateStore> {
        &self.store
    }

    /// POST `message` and return the reply.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Http`] if the connection, handshake or request
    /// fails, or the server answers with a non-success status.
    pub async fn send_message(&self, message: &str) -> Result<Exchange> {
        info!(target_url = %self.target, "Sending message");

        let reply = self
            .client
            .post(&self.target)
            .body(message.to_string())
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        debug!(bytes = reply.len(), "Reply received");
        Ok(Exchange {
            sent: message.to_string(),
            reply,
        })
    }
}
