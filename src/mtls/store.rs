//! Certificate storage with hot-reload support.
//!
//! A sidecar (Vault agent, cert-manager) rewrites the identity PEM files on
//! disk; the store notices on the next handshake by comparing the certificate
//! file's modification time against the one it last loaded.
//!
//! Readers take a shared lock and clone an `Arc`; a reload parses the files
//! with no lock held and takes the write lock only to swap the pointer, so a
//! slow disk never stalls concurrent handshakes.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::CertificateDer;
use rustls::sign::CertifiedKey;
use tracing::{debug, info, warn};

use super::identity::CertSummary;
use super::pem::{load_certs, load_private_key};
use crate::{Error, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Bundle
// ─────────────────────────────────────────────────────────────────────────────

/// An identity chain and its private key, validated as a matching pair.
///
/// Immutable once built; rotation produces a new bundle.
pub struct CertificateBundle {
    certified_key: Arc<CertifiedKey>,
    summary: CertSummary,
    modified: SystemTime,
    loaded_at: DateTime<Utc>,
}

impl fmt::Debug for CertificateBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateBundle")
            .field("certs_count", &self.certified_key.cert.len())
            .field("subject", &self.summary.display_name())
            .field("serial", &self.summary.serial)
            .field("loaded_at", &self.loaded_at)
            .finish_non_exhaustive()
    }
}

impl CertificateBundle {
    /// Read and pair a certificate chain and private key.
    ///
    /// `modified` is the certificate file's mtime observed before the read.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Certificate`] if either file is unreadable or
    /// unparsable, or the key does not belong to the leaf certificate.
    pub fn load(
        cert_path: &Path,
        key_path: &Path,
        modified: SystemTime,
        provider: &CryptoProvider,
    ) -> Result<Self> {
        let certs = load_certs(cert_path)?;
        let key = load_private_key(key_path)?;
        let summary = CertSummary::from_der(&certs[0])?;

        let certified_key = CertifiedKey::from_der(certs, key, provider).map_err(|e| {
            Error::Certificate(format!(
                "Error loading certificate keypair '{}' / '{}': {e}",
                cert_path.display(),
                key_path.display()
            ))
        })?;

        Ok(Self {
            certified_key: Arc::new(certified_key),
            summary,
            modified,
            loaded_at: Utc::now(),
        })
    }

    /// The rustls signing identity handed to the handshake.
    #[must_use]
    pub fn certified_key(&self) -> Arc<CertifiedKey> {
        Arc::clone(&self.certified_key)
    }

    /// Leaf certificate (first in chain).
    #[must_use]
    pub fn leaf(&self) -> &CertificateDer<'static> {
        &self.certified_key.cert[0]
    }

    /// Parsed facts about the leaf certificate.
    #[must_use]
    pub fn summary(&self) -> &CertSummary {
        &self.summary
    }

    /// Certificate file mtime this bundle was loaded from.
    #[must_use]
    pub fn modified(&self) -> SystemTime {
        self.modified
    }

    /// Wall-clock time of the load.
    #[must_use]
    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Store
// ─────────────────────────────────────────────────────────────────────────────

/// What a [`CertificateStore::reload_if_stale`] call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// The file was not newer than the cached bundle; nothing was read.
    Unchanged,
    /// A new bundle was parsed and swapped in.
    Reloaded,
    /// A new bundle was parsed, but a concurrent reload had already installed
    /// a newer one, which was kept.
    Superseded,
}

/// Hot-reloading holder of the current identity bundle.
///
/// Once a bundle has loaded, the store never goes back to empty: failed
/// reloads leave the last good bundle in place.
pub struct CertificateStore {
    cert_path: PathBuf,
    key_path: PathBuf,
    provider: Arc<CryptoProvider>,
    current: RwLock<Option<Arc<CertificateBundle>>>,
    loads: AtomicU64,
}

impl fmt::Debug for CertificateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateStore")
            .field("cert_path", &self.cert_path)
            .field("key_path", &self.key_path)
            .field("has_bundle", &self.current.read().is_some())
            .field("loads", &self.load_count())
            .finish_non_exhaustive()
    }
}

impl CertificateStore {
    /// Create an empty store for the given pair of paths.
    ///
    /// Nothing is read until [`reload_if_stale`](Self::reload_if_stale).
    /// `cert_path` and `key_path` may be the same file.
    #[must_use]
    pub fn new(
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
        provider: Arc<CryptoProvider>,
    ) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
            provider,
            current: RwLock::new(None),
            loads: AtomicU64::new(0),
        }
    }

    /// Reload the bundle from disk if the certificate file is newer than the
    /// cached one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Certificate`] if the certificate file cannot be
    /// stat'ed or the new pair fails to load. The cached bundle, if any, is
    /// left untouched in both cases.
    pub fn reload_if_stale(&self) -> Result<ReloadOutcome> {
        let modified = fs::metadata(&self.cert_path)
            .and_then(|meta| meta.modified())
            .map_err(|e| {
                Error::Certificate(format!("Cannot stat '{}': {e}", self.cert_path.display()))
            })?;

        let cached = self.current.read().clone();
        if cached.is_some_and(|cached| modified <= cached.modified) {
            return Ok(ReloadOutcome::Unchanged);
        }

        // Parse with no lock held.
        let fresh = Arc::new(CertificateBundle::load(
            &self.cert_path,
            &self.key_path,
            modified,
            &self.provider,
        )?);

        let outcome = self.install(Arc::clone(&fresh));
        if outcome == ReloadOutcome::Superseded {
            return Ok(outcome);
        }

        let summary = fresh.summary();
        info!(
            cert_file = %self.cert_path.display(),
            subject = summary.display_name(),
            serial = %summary.serial,
            not_after = %summary.not_after,
            "Certificate reloaded"
        );
        if summary.is_expired_at(Utc::now()) {
            warn!(
                cert_file = %self.cert_path.display(),
                not_after = %summary.not_after,
                "Loaded certificate is already expired"
            );
        }

        Ok(ReloadOutcome::Reloaded)
    }

    /// Swap `fresh` in unless a newer bundle is already installed.
    ///
    /// The only code path that takes the write lock.
    fn install(&self, fresh: Arc<CertificateBundle>) -> ReloadOutcome {
        {
            let mut slot = self.current.write();
            if slot
                .as_ref()
                .is_some_and(|existing| existing.modified > fresh.modified)
            {
                drop(slot);
                debug!(
                    cert_file = %self.cert_path.display(),
                    "Concurrent reload installed a newer bundle; discarding ours"
                );
                return ReloadOutcome::Superseded;
            }
            *slot = Some(fresh);
        }
        self.loads.fetch_add(1, Ordering::Relaxed);
        ReloadOutcome::Reloaded
    }

    /// The bundle currently served.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotYetAvailable`] if no bundle has ever loaded.
    pub fn current_bundle(&self) -> Result<Arc<CertificateBundle>> {
        self.current
            .read()
            .clone()
            .ok_or_else(|| Error::NotYetAvailable(self.cert_path.display().to_string()))
    }

    /// Mandatory first load: reload, then insist a bundle is present.
    ///
    /// # Errors
    ///
    /// Returns the reload error, or [`Error::NotYetAvailable`].
    pub fn load_initial(&self) -> Result<Arc<CertificateBundle>> {
        self.reload_if_stale()?;
        self.current_bundle()
    }

    /// Number of bundles successfully parsed and installed so far.
    #[must_use]
    pub fn load_count(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    /// Path of the watched certificate file.
    #[must_use]
    pub fn cert_path(&self) -> &Path {
        &self.cert_path
    }

    /// Path of the private key file.
    #[must_use]
    pub fn key_path(&self) -> &Path {
        &self.key_path
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::mtls::crypto_provider;
    use crate::mtls::testing::{Issued, issue_ca, issue_leaf, set_mtime, touch_forward, write};

    struct Fixture {
        dir: tempfile::TempDir,
        ca: Issued,
        cert: PathBuf,
        key: PathBuf,
    }

    impl Fixture {
        fn new(cn: &str) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let ca = issue_ca("Sentry Root CA");
            let leaf = issue_leaf(&ca, cn);
            let cert = write(dir.path(), "server.crt", &leaf.cert_pem);
            let key = write(dir.path(), "server.key", &leaf.key_pem);
            Self { dir, ca, cert, key }
        }

        fn store(&self) -> CertificateStore {
            CertificateStore::new(&self.cert, &self.key, crypto_provider())
        }

        /// Write a freshly issued pair and bump the cert mtime.
        fn rotate(&self, cn: &str, bump_secs: u64) -> Issued {
            let leaf = issue_leaf(&self.ca, cn);
            write(self.dir.path(), "server.key", &leaf.key_pem);
            write(self.dir.path(), "server.crt", &leaf.cert_pem);
            touch_forward(&self.cert, bump_secs);
            leaf
        }
    }

    // ─── initial load ────────────────────────────────────────────────────────

    #[test]
    fn empty_store_reports_not_yet_available() {
        let fx = Fixture::new("minotaur");
        let store = fx.store();

        let err = store.current_bundle().unwrap_err();
        assert!(matches!(err, Error::NotYetAvailable(_)));
    }

    #[test]
    fn initial_load_populates_bundle() {
        let fx = Fixture::new("minotaur");
        let store = fx.store();

        let bundle = store.load_initial().unwrap();
        assert_eq!(bundle.summary().display_name(), "minotaur");
        assert_eq!(store.load_count(), 1);
    }

    #[test]
    fn initial_load_fails_without_key_file() {
        let fx = Fixture::new("minotaur");
        fs::remove_file(&fx.key).unwrap();
        let store = fx.store();

        assert!(store.load_initial().is_err());
        assert!(store.current_bundle().is_err());
    }

    #[test]
    fn mismatched_key_is_rejected() {
        let fx = Fixture::new("minotaur");
        let other = issue_leaf(&fx.ca, "someone-else");
        write(fx.dir.path(), "server.key", &other.key_pem);

        let err = fx.store().load_initial().unwrap_err();
        assert!(matches!(err, Error::Certificate(_)));
    }

    #[test]
    fn combined_pem_serves_as_cert_and_key() {
        let dir = tempfile::tempdir().unwrap();
        let ca = issue_ca("Root");
        let leaf = issue_leaf(&ca, "leviathan");
        let bundle = write(
            dir.path(),
            "bundle.pem",
            &format!("{}{}", leaf.cert_pem, leaf.key_pem),
        );

        let store = CertificateStore::new(&bundle, &bundle, crypto_provider());
        assert!(store.load_initial().is_ok());
    }

    // ─── stale check ─────────────────────────────────────────────────────────

    #[test]
    fn unchanged_file_takes_fast_path_without_reading() {
        let fx = Fixture::new("minotaur");
        let store = fx.store();
        let first = store.load_initial().unwrap();

        for _ in 0..5 {
            assert_eq!(store.reload_if_stale().unwrap(), ReloadOutcome::Unchanged);
        }

        assert_eq!(store.load_count(), 1);
        assert!(Arc::ptr_eq(&first, &store.current_bundle().unwrap()));
    }

    #[test]
    fn unchanged_mtime_ignores_new_contents() {
        let fx = Fixture::new("minotaur");
        let store = fx.store();
        let first = store.load_initial().unwrap();
        let before = fs::metadata(&fx.cert).unwrap().modified().unwrap();

        // Same mtime, garbage contents: the stat says nothing changed.
        write(fx.dir.path(), "server.crt", "garbage");
        set_mtime(&fx.cert, before);

        assert_eq!(store.reload_if_stale().unwrap(), ReloadOutcome::Unchanged);
        assert!(Arc::ptr_eq(&first, &store.current_bundle().unwrap()));
    }

    #[test]
    fn newer_file_is_reloaded() {
        let fx = Fixture::new("minotaur");
        let store = fx.store();
        let first = store.load_initial().unwrap();

        let rotated = fx.rotate("minotaur-v2", 30);

        assert_eq!(store.reload_if_stale().unwrap(), ReloadOutcome::Reloaded);
        let current = store.current_bundle().unwrap();
        assert!(!Arc::ptr_eq(&first, &current));
        assert_eq!(current.leaf().as_ref(), rotated.der.as_slice());
        assert!(current.modified() > first.modified());
        assert_eq!(store.load_count(), 2);
    }

    // ─── failed reloads keep the last good bundle ────────────────────────────

    #[test]
    fn corrupt_rotation_keeps_previous_bundle() {
        let fx = Fixture::new("minotaur");
        let store = fx.store();
        let first = store.load_initial().unwrap();

        write(fx.dir.path(), "server.crt", "-----BEGIN CERTIFICATE-----\ntruncated");
        touch_forward(&fx.cert, 30);

        assert!(store.reload_if_stale().is_err());
        assert!(Arc::ptr_eq(&first, &store.current_bundle().unwrap()));
    }

    #[test]
    fn half_written_rotation_is_retried_once_complete() {
        let fx = Fixture::new("minotaur");
        let store = fx.store();
        let first = store.load_initial().unwrap();

        // New cert landed, key still the old one: pair mismatch.
        let next = issue_leaf(&fx.ca, "minotaur-v2");
        write(fx.dir.path(), "server.crt", &next.cert_pem);
        touch_forward(&fx.cert, 30);
        assert!(store.reload_if_stale().is_err());
        assert!(Arc::ptr_eq(&first, &store.current_bundle().unwrap()));

        // Key lands; the cert mtime is still newer than the cached bundle.
        write(fx.dir.path(), "server.key", &next.key_pem);
        assert_eq!(store.reload_if_stale().unwrap(), ReloadOutcome::Reloaded);
        assert_eq!(store.current_bundle().unwrap().leaf().as_ref(), next.der.as_slice());
    }

    #[test]
    fn missing_file_keeps_serving_last_good_bundle() {
        let fx = Fixture::new("minotaur");
        let store = fx.store();
        let first = store.load_initial().unwrap();

        fs::remove_file(&fx.cert).unwrap();

        let err = store.reload_if_stale().unwrap_err();
        assert!(err.to_string().contains("Cannot stat"));
        assert!(Arc::ptr_eq(&first, &store.current_bundle().unwrap()));
    }

    // ─── concurrency ─────────────────────────────────────────────────────────

    #[test]
    fn concurrent_readers_always_see_a_matching_pair() {
        let fx = Fixture::new("minotaur");
        let store = Arc::new(fx.store());
        store.load_initial().unwrap();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..200 {
                        let _ = store.reload_if_stale();
                        let bundle = store.current_bundle().unwrap();
                        bundle.certified_key().keys_match().unwrap();
                    }
                })
            })
            .collect();

        for round in 1..=5 {
            fx.rotate(&format!("minotaur-{round}"), 10 * round);
        }

        for reader in readers {
            reader.join().unwrap();
        }
        store.current_bundle().unwrap().certified_key().keys_match().unwrap();
    }

    #[test]
    fn older_bundle_never_replaces_newer_one() {
        let fx = Fixture::new("minotaur");
        let store = fx.store();
        store.load_initial().unwrap();
        fx.rotate("minotaur-v2", 60);
        store.reload_if_stale().unwrap();
        let newest = store.current_bundle().unwrap();

        // A slow reloader that stat'ed before the rotation finishes last.
        let stale = CertificateBundle::load(
            &fx.cert,
            &fx.key,
            SystemTime::UNIX_EPOCH,
            &crypto_provider(),
        )
        .unwrap();

        assert_eq!(store.install(Arc::new(stale)), ReloadOutcome::Superseded);
        assert!(Arc::ptr_eq(&newest, &store.current_bundle().unwrap()));
        assert_eq!(store.load_count(), 2);
    }
}
