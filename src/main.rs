//! Edge Gateway - offline token verification with transparent refresh

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use edge_gateway::{
    cli::{Cli, Command},
    config::Config,
    gateway::Gateway,
    setup_tracing,
    token::{KeyMaterial, TokenVerifier, Verdict},
};

/// Exit code of `check-token` for an authentic but expired token
const EXIT_EXPIRED: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command {
        Some(Command::CheckToken { ref token }) => check_token(&cli, token),
        Some(Command::Serve) | None => run_server(cli).await,
    }
}

/// Load configuration and apply CLI overrides
fn load_config(cli: &Cli) -> Option<Config> {
    match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host = host.clone();
            }
            Some(config)
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            None
        }
    }
}

/// Verify a token offline and report its verdict
fn check_token(cli: &Cli, token: &str) -> ExitCode {
    let Some(config) = load_config(cli) else {
        return ExitCode::FAILURE;
    };

    let key = match KeyMaterial::load(&config.auth) {
        Ok(key) => Arc::new(key),
        Err(e) => {
            error!("Failed to load verification key: {e}");
            return ExitCode::FAILURE;
        }
    };

    let verifier = TokenVerifier::new(key, &config.auth);
    match verifier.verify(token.trim()) {
        Verdict::Valid(principal) => {
            println!("valid");
            if let Ok(json) = serde_json::to_string_pretty(&principal) {
                println!("{json}");
            }
            ExitCode::SUCCESS
        }
        Verdict::Expired => {
            println!("expired");
            ExitCode::from(EXIT_EXPIRED)
        }
        Verdict::Invalid => {
            println!("invalid");
            ExitCode::FAILURE
        }
    }
}

/// Run the gateway server
async fn run_server(cli: Cli) -> ExitCode {
    let Some(config) = load_config(&cli) else {
        return ExitCode::FAILURE;
    };

    #[cfg(feature = "metrics")]
    if let Err(e) = edge_gateway::telemetry::init_metrics() {
        error!("{e}");
        return ExitCode::FAILURE;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        routes = config.routes.len(),
        "Starting Edge Gateway"
    );

    // Create and run gateway
    let gateway = match Gateway::new(config) {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to create gateway: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Run with graceful shutdown
    if let Err(e) = gateway.run().await {
        error!("Gateway error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Gateway shutdown complete");
    ExitCode::SUCCESS
}
