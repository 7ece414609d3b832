//! Guarded server implementation

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum_server::Handle;
use axum_server::tls_rustls::RustlsConfig;
use tokio::signal;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use super::handler::{AppState, create_router};
use crate::config::ServerConfig;
use crate::mtls::{
    CertificateStore, IdentityResolver, TrustPool, build_server_config, crypto_provider,
};
use crate::{Error, Result};

/// Poll interval while waiting for the sidecar to write an identity.
pub const IDENTITY_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// How long in-flight requests get to finish after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// The mTLS guarded server.
///
/// Construction performs every fallible startup step; a value of this type
/// holds a loaded trust pool, a loaded identity, and a ready TLS config.
pub struct GuardedServer {
    config: ServerConfig,
    store: Arc<CertificateStore>,
    trust: TrustPool,
    tls: Arc<rustls::ServerConfig>,
}

impl GuardedServer {
    /// Run the startup sequence without binding a listener.
    ///
    /// # Errors
    ///
    /// Returns an error if the trust pool cannot be built, the initial
    /// identity fails to load, or the TLS config is rejected. All of these are
    /// fatal: the server must not serve traffic in an unverifiable state.
    pub async fn new(config: ServerConfig) -> Result<Self> {
        let store = Arc::new(CertificateStore::new(
            &config.cert_file,
            &config.key_file,
            crypto_provider(),
        ));

        if config.cert_wait_secs > 0 {
            wait_for_identity(&store, config.cert_wait()).await;
        }

        let trust = TrustPool::load(config.trust_anchor_file())?;
        let bundle = store.load_initial()?;
        info!(
            subject = bundle.summary().display_name(),
            serial = %bundle.summary().serial,
            not_after = %bundle.summary().not_after,
            trust_anchors = trust.len(),
            "Identity loaded"
        );

        let resolver = Arc::new(IdentityResolver::new(Arc::clone(&store)));
        let tls = Arc::new(build_server_config(&trust, resolver)?);

        Ok(Self {
            config,
            store,
            trust,
            tls,
        })
    }

    /// Address the server binds to.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `host` is not an IP address.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self.config.host.parse().map_err(|e| {
            Error::Config(format!("Invalid bind host '{}': {e}", self.config.host))
        })?;
        Ok(SocketAddr::new(ip, self.config.port))
    }

    /// The identity store backing every handshake.
    #[must_use]
    pub fn store(&self) -> &Arc<CertificateStore> {
        &self.store
    }

    /// The trust pool client certificates are verified against.
    #[must_use]
    pub fn trust(&self) -> &TrustPool {
        &self.trust
    }

    /// Bind and serve until `handle` is told to shut down.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid or the listener fails.
    pub async fn serve(self, handle: Handle<SocketAddr>) -> Result<()> {
        let addr = self.socket_addr()?;
        let app = create_router(Arc::new(AppState {
            max_body_bytes: self.config.max_body_bytes,
        }));
        let tls = RustlsConfig::from_config(Arc::clone(&self.tls));

        info!("============================================================");
        info!("MTLS SENTRY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.host, port = self.config.port, "Listening");
        info!(
            cert_file = %self.store.cert_path().display(),
            "Client certificates REQUIRED; identity hot-reloads on change"
        );

        axum_server::bind_rustls(addr, tls)
            .handle(handle)
            .serve(app.into_make_service())
            .await?;

        info!(reloads = self.store.load_count(), "Server stopped");
        Ok(())
    }

    /// Serve until SIGINT/SIGTERM.
    ///
    /// # Errors
    ///
    /// See [`GuardedServer::serve`].
    pub async fn run(self) -> Result<()> {
        let handle: Handle<SocketAddr> = Handle::new();
        tokio::spawn(shutdown_signal(handle.clone()));
        self.serve(handle).await
    }
}

/// Poll the store until an identity loads or `timeout` elapses.
///
/// Returns whether an identity is available. Never fails: the mandatory
/// initial load that follows decides whether startup proceeds.
pub async fn wait_for_identity(store: &CertificateStore, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    info!(
        cert_file = %store.cert_path().display(),
        timeout_secs = timeout.as_secs(),
        "Waiting for identity to be written"
    );

    loop {
        match store.reload_if_stale() {
            Ok(_) => return true,
            Err(e) => debug!(error = %e, "Identity not ready yet"),
        }

        if Instant::now() >= deadline {
            warn!(
                cert_file = %store.cert_path().display(),
                "Gave up waiting for identity"
            );
            return false;
        }
        sleep(IDENTITY_POLL_INTERVAL).await;
    }
}

/// Shutdown signal handler
async fn shutdown_signal(handle: Handle<SocketAddr>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    handle.graceful_shutdown(Some(DRAIN_TIMEOUT));
}
