//! Adversarial probe agent.
//!
//! Repeatedly tries to reach the guarded server without a client
//! certificate. A refused handshake is the expected, correct result; a
//! response means enforcement is broken.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

mod agent;
mod transport;

pub use agent::ProbeAgent;
pub use transport::{AttemptResult, HttpsProbe, ProbeTransport};

/// How one attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProbeOutcome {
    /// The server refused the certificate-less connection.
    RejectedAsExpected,
    /// The server answered. Enforcement has been bypassed.
    AcceptedUnexpectedly,
    /// The attempt failed for a reason unrelated to enforcement (timeout,
    /// malformed target).
    TransportError,
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::RejectedAsExpected => "rejected-as-expected",
            Self::AcceptedUnexpectedly => "accepted-unexpectedly",
            Self::TransportError => "transport-error",
        })
    }
}

/// One attempt.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeSession {
    /// 1-based attempt number
    pub sequence: u32,
    /// Address attacked
    pub target: String,
    /// Classified outcome
    pub outcome: ProbeOutcome,
    /// Error chain or response status
    pub detail: String,
    /// Time spent waiting for the attempt to resolve
    #[serde(with = "millis")]
    pub elapsed: Duration,
}

/// Counters over a whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProbeReport {
    /// Address attacked
    pub target: String,
    /// Attempts made
    pub attempts: u32,
    /// Attempts the server refused
    pub rejected: u32,
    /// Attempts the server answered
    pub breaches: u32,
    /// Attempts that failed for unrelated reasons
    pub transport_errors: u32,
}

impl ProbeReport {
    fn new(target: &str) -> Self {
        Self {
            target: target.to_string(),
            ..Self::default()
        }
    }

    fn record(&mut self, session: &ProbeSession) {
        self.attempts += 1;
        match session.outcome {
            ProbeOutcome::RejectedAsExpected => self.rejected += 1,
            ProbeOutcome::AcceptedUnexpectedly => self.breaches += 1,
            ProbeOutcome::TransportError => self.transport_errors += 1,
        }
    }

    /// No attempt got through.
    #[must_use]
    pub fn enforcement_held(&self) -> bool {
        self.breaches == 0
    }
}

mod millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }
}
