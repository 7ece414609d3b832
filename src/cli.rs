//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Default payload sent by `call`.
pub const DEFAULT_MESSAGE: &str = "I sent you a secret message *giggle*";

/// mTLS guarded server, adversarial probe and authenticated caller
#[derive(Parser, Debug)]
#[command(name = "mtls-sentry")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML); environment variables override it
    #[arg(short, long, env = "MTLS_SENTRY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "MTLS_SENTRY_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "MTLS_SENTRY_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the guarded server (default)
    Serve,

    /// Repeatedly attempt certificate-less requests against TARGET_URL
    Probe,

    /// Send one authenticated message to TARGET_URL and print the reply
    Call {
        /// Message body
        #[arg(default_value = DEFAULT_MESSAGE)]
        message: String,
    },
}
