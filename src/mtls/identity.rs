//! Leaf certificate summary.
//!
//! Parses the first certificate of an identity chain and extracts the fields
//! worth putting in a reload log line: Common Name, serial, expiry.

use chrono::{DateTime, Utc};
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;

use crate::{Error, Result};

/// Human-facing facts about an identity certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertSummary {
    /// Certificate Common Name (CN).
    pub common_name: Option<String>,

    /// Serial number, colon-separated hex.
    pub serial: String,

    /// End of the validity window.
    pub not_after: DateTime<Utc>,
}

impl CertSummary {
    /// Parse a DER-encoded certificate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Certificate`] if the bytes are not an X.509
    /// certificate or its expiry is outside the representable range.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| Error::Certificate(format!("Failed to parse certificate: {e}")))?;

        let not_after = DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0)
            .ok_or_else(|| Error::Certificate("Certificate expiry out of range".to_string()))?;

        Ok(Self {
            common_name: extract_cn(&cert),
            serial: cert.raw_serial_as_string(),
            not_after,
        })
    }

    /// Label for logs: the CN, or `<unknown>`.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.common_name.as_deref().unwrap_or("<unknown>")
    }

    /// Whether the certificate has already expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.not_after <= now
    }
}

fn extract_cn(cert: &X509Certificate<'_>) -> Option<String> {
    cert.subject()
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .map(str::to_owned)
}
