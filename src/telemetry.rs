//! Metrics
//!
//! Counters are emitted through the `metrics` facade and are no-ops until a
//! recorder is installed. With the `metrics` feature, [`init_metrics`]
//! installs a Prometheus recorder whose output is served on `GET /metrics`.

#[cfg(feature = "metrics")]
use std::sync::OnceLock;

#[cfg(feature = "metrics")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
#[cfg(feature = "metrics")]
use telemetry_metrics::describe_counter;

/// Filter decisions, labelled by `outcome`
pub const AUTH_DECISIONS: &str = "edge_gateway_auth_decisions_total";
/// Refresh attempts, labelled by `result`
pub const TOKEN_REFRESHES: &str = "edge_gateway_token_refresh_total";
/// Requests served a cached replacement token
pub const TOKEN_CACHE_HITS: &str = "edge_gateway_token_cache_hits_total";

#[cfg(feature = "metrics")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Calling it again is a no-op.
#[cfg(feature = "metrics")]
pub fn init_metrics() -> crate::Result<()> {
    if PROMETHEUS_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| crate::Error::Internal(format!("Failed to install Prometheus recorder: {e}")))?;
    let _ = PROMETHEUS_HANDLE.set(handle);

    describe_metrics();
    tracing::info!("Metrics recorder installed");
    Ok(())
}

/// Render current metrics in Prometheus text format, if a recorder is installed
#[must_use]
pub fn render_metrics() -> Option<String> {
    #[cfg(feature = "metrics")]
    {
        PROMETHEUS_HANDLE.get().map(PrometheusHandle::render)
    }
    #[cfg(not(feature = "metrics"))]
    {
        None
    }
}

#[cfg(feature = "metrics")]
fn describe_metrics() {
    describe_counter!(AUTH_DECISIONS, "Authentication filter decisions");
    describe_counter!(TOKEN_REFRESHES, "Token refresh attempts against the identity provider");
    describe_counter!(TOKEN_CACHE_HITS, "Expired tokens answered from the refreshed token cache");
}
