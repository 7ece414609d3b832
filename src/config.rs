//! Configuration management
//!
//! Each role reads its own struct once at startup from a [`Figment`] that
//! merges an optional YAML file with whitelisted environment variables
//! (environment wins). Components receive the struct by reference and never
//! look at the environment themselves.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{Error, Result};

/// Probe/caller target used when `TARGET_URL` is unset.
pub const DEFAULT_TARGET_URL: &str = "https://localhost:9090";

/// Probe attempts used when `MAX_ATTEMPTS` is unset or invalid.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 30;

/// Environment variables recognised; anything else in the environment is
/// ignored.
pub const ENV_KEYS: &[&str] = &[
    "HOST",
    "PORT",
    "CERT_FILE",
    "KEY_FILE",
    "CA_FILE",
    "CERT_WAIT_SECS",
    "TARGET_URL",
    "MAX_ATTEMPTS",
];

/// Build the provider stack: optional YAML file, then the environment.
#[must_use]
pub fn figment(config_file: Option<&Path>) -> Figment {
    let mut figment = Figment::new();
    if let Some(path) = config_file {
        figment = figment.merge(Yaml::file(path));
    }
    figment.merge(Env::raw().only(ENV_KEYS))
}

/// Blank targets count as unset.
fn resolve_target(target_url: Option<&str>) -> &str {
    target_url
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_TARGET_URL)
}

fn extract<'a, T: Deserialize<'a>>(figment: &Figment, role: &str) -> Result<T> {
    figment
        .extract()
        .map_err(|e| Error::Config(format!("Invalid {role} configuration: {e}")))
}

// ─────────────────────────────────────────────────────────────────────────────
// Guarded server
// ─────────────────────────────────────────────────────────────────────────────

/// Guarded server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_host")]
    pub host: String,
    /// Listen port (`PORT`, required)
    pub port: u16,
    /// Identity certificate PEM (`CERT_FILE`, required)
    pub cert_file: PathBuf,
    /// Identity private key PEM (`KEY_FILE`, required)
    pub key_file: PathBuf,
    /// Trust roots for client certificates (`CA_FILE`); `cert_file` when unset
    #[serde(default)]
    pub ca_file: Option<PathBuf>,
    /// Seconds to wait for the sidecar to write a valid identity (`CERT_WAIT_SECS`)
    #[serde(default)]
    pub cert_wait_secs: u64,
    /// Request body limit in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

impl ServerConfig {
    /// Load from file + environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when `PORT`, `CERT_FILE` or `KEY_FILE` is
    /// missing or malformed.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        Self::from_figment(&figment(config_file))
    }

    /// Extract from an already-assembled figment.
    ///
    /// # Errors
    ///
    /// See [`ServerConfig::load`].
    pub fn from_figment(figment: &Figment) -> Result<Self> {
        extract(figment, "server")
    }

    /// File the trust pool is read from.
    #[must_use]
    pub fn trust_anchor_file(&self) -> &Path {
        self.ca_file.as_deref().unwrap_or(&self.cert_file)
    }

    /// How long to wait for the sidecar before the mandatory initial load.
    #[must_use]
    pub fn cert_wait(&self) -> Duration {
        Duration::from_secs(self.cert_wait_secs)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Probe agent
// ─────────────────────────────────────────────────────────────────────────────

/// Probe agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Address to attack (`TARGET_URL`)
    pub target_url: Option<String>,
    /// Number of attempts (`MAX_ATTEMPTS`)
    pub max_attempts: MaxAttempts,
    /// Per-attempt timeout in milliseconds
    pub attempt_timeout_ms: u64,
    /// Pause between attempts in milliseconds
    pub attempt_delay_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            target_url: None,
            max_attempts: MaxAttempts::default(),
            attempt_timeout_ms: 2_000,
            attempt_delay_ms: 5_000,
        }
    }
}

impl ProbeConfig {
    /// Load from file + environment. Never fails on `MAX_ATTEMPTS`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] only for structurally invalid input, such as
    /// a non-numeric timeout in the YAML file.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        Self::from_figment(&figment(config_file))
    }

    /// Extract from an already-assembled figment.
    ///
    /// # Errors
    ///
    /// See [`ProbeConfig::load`].
    pub fn from_figment(figment: &Figment) -> Result<Self> {
        extract(figment, "probe")
    }

    /// Load from file + environment, falling back field by field.
    ///
    /// A malformed field takes its default; every valid field, the target in
    /// particular, is kept.
    #[must_use]
    pub fn load_lenient(config_file: Option<&Path>) -> Self {
        Self::from_figment_lenient(&figment(config_file))
    }

    /// Field-by-field fallback over an already-assembled figment.
    #[must_use]
    pub fn from_figment_lenient(figment: &Figment) -> Self {
        match Self::from_figment(figment) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "Invalid probe configuration; defaulting malformed fields");
                let defaults = Self::default();
                Self {
                    target_url: figment.extract_inner("target_url").ok(),
                    max_attempts: figment
                        .extract_inner("max_attempts")
                        .unwrap_or(defaults.max_attempts),
                    attempt_timeout_ms: figment
                        .extract_inner("attempt_timeout_ms")
                        .unwrap_or(defaults.attempt_timeout_ms),
                    attempt_delay_ms: figment
                        .extract_inner("attempt_delay_ms")
                        .unwrap_or(defaults.attempt_delay_ms),
                }
            }
        }
    }

    /// The target, falling back to [`DEFAULT_TARGET_URL`].
    #[must_use]
    pub fn target(&self) -> &str {
        resolve_target(self.target_url.as_deref())
    }

    /// Per-attempt timeout.
    #[must_use]
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    /// Pause between attempts.
    #[must_use]
    pub fn attempt_delay(&self) -> Duration {
        Duration::from_millis(self.attempt_delay_ms)
    }
}

/// Attempt budget that degrades to [`DEFAULT_MAX_ATTEMPTS`] instead of
/// failing: unset, non-numeric, zero and negative values all resolve to the
/// default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct MaxAttempts(u32);

impl MaxAttempts {
    /// Wrap an explicit count; zero becomes the default.
    #[must_use]
    pub fn new(count: u32) -> Self {
        if count == 0 { Self::default() } else { Self(count) }
    }

    /// Resolve a raw textual value (as found in the environment).
    #[must_use]
    pub fn parse(raw: Option<&str>) -> Self {
        raw.and_then(|s| s.trim().parse::<i64>().ok())
            .map_or_else(Self::default, Self::from_signed)
    }

    fn from_signed(value: i64) -> Self {
        u32::try_from(value).map_or_else(|_| Self::default(), Self::new)
    }

    /// The resolved count, always at least one.
    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }
}

impl Default for MaxAttempts {
    fn default() -> Self {
        Self(DEFAULT_MAX_ATTEMPTS)
    }
}

impl fmt::Display for MaxAttempts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl<'de> Deserialize<'de> for MaxAttempts {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(MaxAttemptsVisitor)
    }
}

struct MaxAttemptsVisitor;

impl<'de> Visitor<'de> for MaxAttemptsVisitor {
    type Value = MaxAttempts;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an attempt count")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Self::Value, E> {
        Ok(MaxAttempts::from_signed(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Self::Value, E> {
        Ok(u32::try_from(v).map_or_else(|_| MaxAttempts::default(), MaxAttempts::new))
    }

    fn visit_f64<E: de::Error>(self, _v: f64) -> std::result::Result<Self::Value, E> {
        Ok(MaxAttempts::default())
    }

    fn visit_bool<E: de::Error>(self, _v: bool) -> std::result::Result<Self::Value, E> {
        Ok(MaxAttempts::default())
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Self::Value, E> {
        Ok(MaxAttempts::parse(Some(v)))
    }

    fn visit_unit<E: de::Error>(self) -> std::result::Result<Self::Value, E> {
        Ok(MaxAttempts::default())
    }

    fn visit_none<E: de::Error>(self) -> std::result::Result<Self::Value, E> {
        Ok(MaxAttempts::default())
    }

    fn visit_seq<A: de::SeqAccess<'de>>(
        self,
        mut seq: A,
    ) -> std::result::Result<Self::Value, A::Error> {
        while seq.next_element::<de::IgnoredAny>()?.is_some() {}
        Ok(MaxAttempts::default())
    }

    fn visit_map<A: de::MapAccess<'de>>(
        self,
        mut map: A,
    ) -> std::result::Result<Self::Value, A::Error> {
        while map.next_entry::<de::IgnoredAny, de::IgnoredAny>()?.is_some() {}
        Ok(MaxAttempts::default())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Authenticated caller
// ─────────────────────────────────────────────────────────────────────────────

/// Authenticated caller configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallerConfig {
    /// Address of the guarded server (`TARGET_URL`)
    #[serde(default)]
    pub target_url: Option<String>,
    /// Client certificate PEM, optionally with the key appended (`CERT_FILE`)
    pub cert_file: PathBuf,
    /// Client key PEM (`KEY_FILE`); read from `cert_file` when unset
    #[serde(default)]
    pub key_file: Option<PathBuf>,
    /// Roots trusted for the server (`CA_FILE`); `cert_file` when unset
    #[serde(default)]
    pub ca_file: Option<PathBuf>,
    /// Request timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl CallerConfig {
    /// Load from file + environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when `CERT_FILE` is missing.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        Self::from_figment(&figment(config_file))
    }

    /// Extract from an already-assembled figment.
    ///
    /// # Errors
    ///
    /// See [`CallerConfig::load`].
    pub fn from_figment(figment: &Figment) -> Result<Self> {
        extract(figment, "caller")
    }

    /// The target, falling back to [`DEFAULT_TARGET_URL`].
    #[must_use]
    pub fn target(&self) -> &str {
        resolve_target(self.target_url.as_deref())
    }

    /// File the private key is read from.
    #[must_use]
    pub fn key_source(&self) -> &Path {
        self.key_file.as_deref().unwrap_or(&self.cert_file)
    }

    /// File the trust pool is read from.
    #[must_use]
    pub fn trust_anchor_file(&self) -> &Path {
        self.ca_file.as_deref().unwrap_or(&self.cert_file)
    }

    /// Request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
