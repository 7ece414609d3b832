//! The probe loop.

use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::{error, info};

use super::transport::{HttpsProbe, ProbeTransport};
use super::{ProbeOutcome, ProbeReport, ProbeSession};
use crate::Result;
use crate::config::{MaxAttempts, ProbeConfig};

/// Sequential, certificate-less attacker.
///
/// Attempts never overlap, the loop never stops early, and nothing an
/// attempt does can make [`ProbeAgent::run`] fail.
#[derive(Debug)]
pub struct ProbeAgent<T = HttpsProbe> {
    transport: T,
    target: String,
    max_attempts: MaxAttempts,
    delay: Duration,
}

impl ProbeAgent<HttpsProbe> {
    /// Build an agent over HTTPS from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: &ProbeConfig) -> Result<Self> {
        let transport = HttpsProbe::new(config.attempt_timeout())?;
        Ok(Self::new(
            transport,
            config.target(),
            config.max_attempts,
            config.attempt_delay(),
        ))
    }
}

impl<T: ProbeTransport> ProbeAgent<T> {
    /// Create an agent over any transport.
    pub fn new(
        transport: T,
        target: impl Into<String>,
        max_attempts: MaxAttempts,
        delay: Duration,
    ) -> Self {
        Self {
            transport,
            target: target.into(),
            max_attempts,
            delay,
        }
    }

    /// Address under attack.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Run every configured attempt and summarise.
    pub async fn run(&self) -> ProbeReport {
        let total = self.max_attempts.get();
        let mut report = ProbeReport::new(&self.target);

        info!(
            target_url = %self.target,
            attempts = total,
            delay_secs = self.delay.as_secs(),
            "Starting probe run"
        );

        for sequence in 1..=total {
            let session = self.attempt(sequence, total).await;
            report.record(&session);

            if sequence < total {
                sleep(self.delay).await;
            }
        }

        if report.enforcement_held() {
            info!(
                target_url = %report.target,
                attempts = report.attempts,
                rejected = report.rejected,
                transport_errors = report.transport_errors,
                "Probe run complete: enforcement held"
            );
        } else {
            error!(
                target_url = %report.target,
                attempts = report.attempts,
                breaches = report.breaches,
                "Probe run complete: ENFORCEMENT BREACHED"
            );
        }

        report
    }

    async fn attempt(&self, sequence: u32, total: u32) -> ProbeSession {
        info!(
            attempt = sequence,
            of = total,
            target_url = %self.target,
            "Attempting access without a certificate"
        );

        let started = Instant::now();
        let result = self.transport.attempt(&self.target).await;
        let session = ProbeSession {
            sequence,
            target: self.target.clone(),
            outcome: result.outcome,
            detail: result.detail,
            elapsed: started.elapsed(),
        };

        match session.outcome {
            ProbeOutcome::RejectedAsExpected => info!(
                attempt = sequence,
                outcome = %session.outcome,
                detail = %session.detail,
                "Connection rejected"
            ),
            ProbeOutcome::AcceptedUnexpectedly => error!(
                attempt = sequence,
                outcome = %session.outcome,
                detail = %session.detail,
                "CRITICAL FAILURE: connection accepted without a client certificate"
            ),
            // Timeouts and malformed targets say nothing about enforcement.
            ProbeOutcome::TransportError => info!(
                attempt = sequence,
                outcome = %session.outcome,
                detail = %session.detail,
                "Attempt failed without a response"
            ),
        }

        session
    }
}
