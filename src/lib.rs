//! Edge Gateway Library
//!
//! Authentication edge for a set of backend services.
//!
//! # Features
//!
//! - **Offline verification**: bearer tokens are checked against a public key
//!   loaded at startup, with no call to the identity provider
//! - **Transparent refresh**: an expired token plus a `Refresh-token` header is
//!   exchanged for a new token, which replaces the original before forwarding
//! - **Token cache**: refreshed tokens are remembered per original token until
//!   they expire themselves
//! - **Route policy**: protected path prefixes require a valid token
//! - **Forwarding**: prefix-routed reverse proxy to backend services
//!
//! Every unrecoverable authentication failure is answered with a bare `401`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod secrets;
pub mod telemetry;
pub mod token;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// `RUST_LOG` takes precedence over `level`.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {e}"))),
        _ => subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {e}"))),
    }
}
