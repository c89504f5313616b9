//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Edge gateway - offline token verification with transparent refresh
#[derive(Parser, Debug)]
#[command(name = "edge-gateway")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "EDGE_GATEWAY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "EDGE_GATEWAY_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "EDGE_GATEWAY_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "EDGE_GATEWAY_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "EDGE_GATEWAY_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the gateway server (default)
    Serve,

    /// Verify a bearer token offline against the configured key.
    ///
    /// Prints `valid`, `expired` or `invalid`; exits 0, 2 or 1 respectively.
    CheckToken {
        /// The token to verify
        #[arg(required = true)]
        token: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_token_parses() {
        let cli = Cli::parse_from(["edge-gateway", "--config", "gw.yaml", "check-token", "abc"]);

        assert_eq!(cli.config, Some(PathBuf::from("gw.yaml")));
        assert!(matches!(cli.command, Some(Command::CheckToken { ref token }) if token == "abc"));
    }

    #[test]
    fn serve_is_optional() {
        let cli = Cli::parse_from(["edge-gateway", "--port", "9090"]);

        assert_eq!(cli.port, Some(9090));
        assert!(cli.command.is_none());
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
