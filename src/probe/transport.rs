//! Probe transports: how a single unauthenticated attempt is made.

use std::error::Error as StdError;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::ProbeOutcome;
use crate::Result;

/// What one attempt produced, before it is stamped with sequence and timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptResult {
    /// Classified outcome
    pub outcome: ProbeOutcome,
    /// Human-readable detail (error chain or response status)
    pub detail: String,
}

impl AttemptResult {
    /// Convenience constructor.
    pub fn new(outcome: ProbeOutcome, detail: impl Into<String>) -> Self {
        Self {
            outcome,
            detail: detail.into(),
        }
    }
}

/// A way of making one certificate-less request.
///
/// Implementations never fail: every way an attempt can end maps to a
/// [`ProbeOutcome`].
#[async_trait]
pub trait ProbeTransport: Send + Sync {
    /// Attempt to reach `target` without presenting a client certificate.
    async fn attempt(&self, target: &str) -> AttemptResult;
}

/// HTTPS transport: skips server verification, never offers a client
/// certificate, and does not keep connections alive between attempts.
#[derive(Debug, Clone)]
pub struct HttpsProbe {
    client: reqwest::Client,
}

impl HttpsProbe {
    /// Build the client once; it is reused across attempts.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(timeout)
            .pool_max_idle_per_host(0)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ProbeTransport for HttpsProbe {
    async fn attempt(&self, target: &str) -> AttemptResult {
        match self.client.get(target).send().await {
            Ok(response) => {
                let status = response.status();
                // Drain so the connection is fully consumed before it drops.
                let drained = match response.bytes().await {
                    Ok(body) => body.len(),
                    Err(e) => {
                        debug!(error = %e, "Failed to drain response body");
                        0
                    }
                };
                AttemptResult::new(
                    ProbeOutcome::AcceptedUnexpectedly,
                    format!("{status} ({drained} bytes)"),
                )
            }
            Err(e) => AttemptResult::new(classify(&e), error_chain(&e)),
        }
    }
}

/// Timeouts and malformed requests say nothing about enforcement; every
/// other failure to get a response (refused, reset, TLS alert) is the
/// server doing its job.
fn classify(err: &reqwest::Error) -> ProbeOutcome {
    if err.is_timeout() || err.is_builder() {
        ProbeOutcome::TransportError
    } else {
        ProbeOutcome::RejectedAsExpected
    }
}

/// `reqwest` errors hide the interesting part (the TLS alert, the refused
/// connect) in their source chain.
fn error_chain(err: &dyn StdError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !message.contains(&cause_text) {
            message.push_str(": ");
            message.push_str(&cause_text);
        }
        source = cause.source();
    }
    message
}
