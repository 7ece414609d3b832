//! mtls-sentry - guarded mTLS server, adversarial probe and authenticated caller

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use mtls_sentry::{
    caller::MtlsCaller,
    cli::{Cli, Command},
    config::{CallerConfig, ProbeConfig, ServerConfig},
    guard::GuardedServer,
    probe::ProbeAgent,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match &cli.command {
        Some(Command::Probe) => run_probe(&cli).await,
        Some(Command::Call { message }) => run_call(&cli, message).await,
        Some(Command::Serve) | None => run_server(&cli).await,
    }
}

/// Run the guarded server
async fn run_server(cli: &Cli) -> ExitCode {
    let config = match ServerConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.port,
        cert_file = %config.cert_file.display(),
        ca_file = %config.trust_anchor_file().display(),
        "Starting guarded server"
    );

    let server = match GuardedServer::new(config).await {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to start guarded server: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = server.run().await {
        error!("Server error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Server shutdown complete");
    ExitCode::SUCCESS
}

/// Run the probe agent. Always exits successfully once the attempts are spent.
async fn run_probe(cli: &Cli) -> ExitCode {
    let config = ProbeConfig::load_lenient(cli.config.as_deref());

    let agent = match ProbeAgent::from_config(&config) {
        Ok(agent) => agent,
        Err(e) => {
            error!("Failed to build probe client: {e}");
            return ExitCode::SUCCESS;
        }
    };

    let report = agent.run().await;
    match serde_json::to_string(&report) {
        Ok(json) => println!("{json}"),
        Err(e) => error!("Failed to serialize report: {e}"),
    }
    ExitCode::SUCCESS
}

/// Send one authenticated message and print the exchange
async fn run_call(cli: &Cli, message: &str) -> ExitCode {
    let config = match CallerConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let caller = match MtlsCaller::from_config(&config) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to build caller: {e}");
            return ExitCode::FAILURE;
        }
    };

    match caller.send_message(message).await {
        Ok(exchange) => match serde_json::to_string_pretty(&exchange) {
            Ok(json) => {
                println!("{json}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("❌ Failed to serialize to JSON: {e}");
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            eprintln!("❌ Failed to contact {}: {e}", caller.target());
            ExitCode::FAILURE
        }
    }
}
