//! Shared fixtures for integration tests: a throwaway PKI on disk and a
//! guarded server on an ephemeral port.

#![allow(dead_code)]

use std::fs::{self, File};
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use axum_server::Handle;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, IsCa, KeyPair, KeyUsagePurpose,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_rustls::TlsConnector;

use mtls_sentry::config::{CallerConfig, ServerConfig};
use mtls_sentry::guard::GuardedServer;
use mtls_sentry::mtls::crypto_provider;

pub struct Issued {
    pub cert_pem: String,
    pub key_pem: String,
    pub der: Vec<u8>,
    cert: Certificate,
    key: KeyPair,
}

impl Issued {
    pub fn cert_der(&self) -> CertificateDer<'static> {
        CertificateDer::from(self.der.clone())
    }

    pub fn key_der(&self) -> PrivateKeyDer<'static> {
        PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.key.serialize_der()))
    }
}

fn issued(cert: Certificate, key: KeyPair) -> Issued {
    Issued {
        cert_pem: cert.pem(),
        key_pem: key.serialize_pem(),
        der: cert.der().to_vec(),
        cert,
        key,
    }
}

pub fn issue_ca(cn: &str) -> Issued {
    let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
    params.distinguished_name.push(DnType::CommonName, cn);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    let key = KeyPair::generate().unwrap();
    let cert = params.self_signed(&key).unwrap();
    issued(cert, key)
}

pub fn issue_leaf(ca: &Issued, cn: &str) -> Issued {
    let mut params = CertificateParams::new(vec!["localhost".to_string()]).unwrap();
    params.distinguished_name.push(DnType::CommonName, cn);
    let key = KeyPair::generate().unwrap();
    let cert = params.signed_by(&key, &ca.cert, &ca.key).unwrap();
    issued(cert, key)
}

pub fn write(path: &Path, contents: &str) {
    fs::write(path, contents).unwrap();
}

/// Push a file's mtime into the future so the next stale check sees it as new.
pub fn touch_forward(path: &Path, secs: u64) {
    File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(SystemTime::now() + Duration::from_secs(secs))
        .unwrap();
}

/// One CA, a server identity and a client identity, all on disk.
pub struct Pki {
    pub dir: TempDir,
    pub ca: Issued,
    pub server: Issued,
    pub client: Issued,
}

impl Pki {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let ca = issue_ca("Sentry Test Root");
        let server = issue_leaf(&ca, "overwhelming-minotaur");
        let client = issue_leaf(&ca, "siege-leviathan");

        let pki = Self {
            dir,
            ca,
            server,
            client,
        };
        write(&pki.path("ca.crt"), &pki.ca.cert_pem);
        write(&pki.path("server.crt"), &pki.server.cert_pem);
        write(&pki.path("server.key"), &pki.server.key_pem);
        write(
            &pki.path("client.pem"),
            &format!("{}{}", pki.client.cert_pem, pki.client.key_pem),
        );
        pki
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            cert_file: self.path("server.crt"),
            key_file: self.path("server.key"),
            ca_file: Some(self.path("ca.crt")),
            cert_wait_secs: 0,
            max_body_bytes: 64 * 1024,
        }
    }

    pub fn caller_config(&self, target: &str) -> CallerConfig {
        CallerConfig {
            target_url: Some(target.to_string()),
            cert_file: self.path("client.pem"),
            key_file: None,
            ca_file: Some(self.path("ca.crt")),
            request_timeout_ms: 5_000,
        }
    }

    /// Replace the server identity with a fresh leaf from the same CA.
    pub fn rotate_server(&mut self, cn: &str) {
        self.server = issue_leaf(&self.ca, cn);
        write(&self.path("server.key"), &self.server.key_pem);
        write(&self.path("server.crt"), &self.server.cert_pem);
        touch_forward(&self.path("server.crt"), 30);
    }

    /// Replace the client identity with a fresh leaf from the same CA.
    pub fn rotate_client(&mut self, cn: &str) {
        self.client = issue_leaf(&self.ca, cn);
        let path = self.path("client.pem");
        write(&path, &format!("{}{}", self.client.cert_pem, self.client.key_pem));
        touch_forward(&path, 30);
    }
}

/// A guarded server running on an ephemeral port.
pub struct Running {
    pub addr: SocketAddr,
    pub handle: Handle<SocketAddr>,
    task: JoinHandle<mtls_sentry::Result<()>>,
}

impl Running {
    pub fn url(&self) -> String {
        format!("https://localhost:{}/", self.addr.port())
    }

    pub async fn stop(self) {
        self.handle.shutdown();
        let _ = self.task.await;
    }
}

pub async fn start_guarded(config: ServerConfig) -> Running {
    let server = GuardedServer::new(config).await.unwrap();
    let handle: Handle<SocketAddr> = Handle::new();
    let task = tokio::spawn(server.serve(handle.clone()));
    let addr = handle.listening().await.unwrap();
    Running { addr, handle, task }
}

/// Raw TLS client built directly on rustls, for handshake-level assertions.
pub fn tls_client(
    roots: &[CertificateDer<'static>],
    identity: Option<&Issued>,
    versions: &[&'static rustls::SupportedProtocolVersion],
) -> TlsConnector {
    let mut store = rustls::RootCertStore::empty();
    for root in roots {
        store.add(root.clone()).unwrap();
    }
    let builder = rustls::ClientConfig::builder_with_provider(crypto_provider())
        .with_protocol_versions(versions)
        .unwrap()
        .with_root_certificates(store);
    let config = match identity {
        Some(id) => builder
            .with_client_auth_cert(vec![id.cert_der()], id.key_der())
            .unwrap(),
        None => builder.with_no_client_auth(),
    };
    TlsConnector::from(Arc::new(config))
}

/// Send a raw HTTP/1.1 POST over `connector` and return whatever came back.
///
/// Returns `Err` if the handshake fails or the connection breaks before any
/// response byte arrives.
pub async fn raw_post(
    connector: &TlsConnector,
    addr: SocketAddr,
    body: &str,
) -> io::Result<(String, Vec<CertificateDer<'static>>)> {
    let tcp = TcpStream::connect(addr).await?;
    let name = ServerName::try_from("localhost").unwrap().to_owned();
    let mut tls = connector.connect(name, tcp).await?;
    let peer = tls
        .get_ref()
        .1
        .peer_certificates()
        .map(<[_]>::to_vec)
        .unwrap_or_default();

    let request = format!(
        "POST / HTTP/1.1\r\nHost: localhost\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    tls.write_all(request.as_bytes()).await?;

    let mut received = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match tls.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => received.extend_from_slice(&chunk[..n]),
            // Servers may close without close_notify once the reply is out.
            Err(_) if !received.is_empty() => break,
            Err(e) => return Err(e),
        }
    }
    if received.is_empty() {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "no response"));
    }
    Ok((String::from_utf8_lossy(&received).into_owned(), peer))
}
