//! Gateway server

use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::{broadcast, oneshot};
use tracing::{info, warn};

use super::filter::AuthFilter;
use super::guard::RouteGuard;
use super::proxy::{Proxy, RouteTable};
use super::router::{AppState, create_router};
use crate::config::{Config, InvalidTokenPolicy};
use crate::token::{
    InMemoryTokenCache, KeyMaterial, RefreshClient, TokenCache, TokenVerifier, spawn_reaper,
};
use crate::{Error, Result};

/// Edge gateway server
pub struct Gateway {
    /// Configuration
    config: Config,
    /// Shared application state
    state: Arc<AppState>,
    /// Refreshed token cache (shared with the filter)
    cache: Arc<dyn TokenCache>,
}

impl Gateway {
    /// Create a new gateway, loading key material and building every component
    pub fn new(config: Config) -> Result<Self> {
        let key = Arc::new(KeyMaterial::load(&config.auth)?);
        let verifier = Arc::new(TokenVerifier::new(key, &config.auth));

        let cache: Arc<dyn TokenCache> = Arc::new(InMemoryTokenCache::new(&config.token_cache));
        let refresher = Arc::new(RefreshClient::new(&config.identity_provider)?);
        let filter = Arc::new(AuthFilter::new(
            Arc::clone(&verifier),
            Arc::clone(&cache),
            refresher,
            &config.auth,
        )?);

        let guard = Arc::new(RouteGuard::new(
            verifier,
            &config.security.protected_prefixes,
        ));
        let proxy = Arc::new(Proxy::new(RouteTable::new(&config.routes)?, &config.server)?);

        let state = Arc::new(AppState {
            filter,
            guard,
            proxy,
        });

        Ok(Self {
            config,
            state,
            cache,
        })
    }

    /// Router serving this gateway
    pub fn router(&self) -> Router {
        create_router(Arc::clone(&self.state), &self.config.cors)
    }

    /// Run the gateway until SIGINT/SIGTERM
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let listener = TcpListener::bind(addr).await?;
        self.serve(listener, shutdown_signal()).await
    }

    /// Serve on an already bound listener until `shutdown` resolves
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let (shutdown_tx, _) = broadcast::channel(1);
        spawn_reaper(
            Arc::clone(&self.cache),
            self.config.token_cache.reap_interval,
            shutdown_tx.subscribe(),
        );

        self.log_banner(&listener);

        // Fires once shutdown starts so the drain deadline can begin
        let (draining_tx, draining_rx) = oneshot::channel::<()>();
        let notify = shutdown_tx.clone();
        let graceful = async move {
            shutdown.await;
            info!("Shutdown signal received");
            let _ = notify.send(());
            let _ = draining_tx.send(());
        };

        let drain_timeout = self.config.server.shutdown_timeout;
        let deadline = async move {
            if draining_rx.await.is_ok() {
                tokio::time::sleep(drain_timeout).await;
            } else {
                std::future::pending::<()>().await;
            }
        };

        let server = axum::serve(listener, self.router())
            .with_graceful_shutdown(graceful)
            .into_future();

        tokio::select! {
            result = server => result.map_err(|e| Error::Internal(e.to_string()))?,
            () = deadline => warn!(timeout = ?drain_timeout, "Graceful shutdown timed out, dropping open connections"),
        }

        let _ = shutdown_tx.send(());
        info!("Gateway stopped");
        Ok(())
    }

    fn log_banner(&self, listener: &TcpListener) {
        let local = listener
            .local_addr()
            .map_or_else(|_| "unknown".to_string(), |a| a.to_string());

        info!("============================================================");
        info!("EDGE GATEWAY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(address = %local, "Listening");
        info!(
            algorithms = ?self.config.auth.algorithms,
            leeway = ?self.config.auth.leeway,
            refresh_header = %self.config.auth.refresh_header,
            "Offline token verification enabled"
        );
        info!(
            token_endpoint = %self.config.identity_provider.token_endpoint,
            client_id = %self.config.identity_provider.client_id,
            "Token refresh via identity provider"
        );
        if self.config.identity_provider.client_secret.is_empty() {
            warn!("identity_provider.client_secret is empty; refreshes will likely be rejected");
        }
        if self.config.auth.invalid_token_policy == InvalidTokenPolicy::Forward {
            info!("Unverifiable tokens are forwarded; protected prefixes still require a valid token");
        }
        info!(prefixes = ?self.config.security.protected_prefixes, "Protected routes");
        let routes = self.state.proxy.routes();
        if routes.is_empty() {
            warn!("No downstream routes configured; proxied requests will answer 404");
        } else {
            info!(count = routes.len(), "Downstream routes");
        }
        for route in &self.config.routes {
            info!(prefix = %route.prefix, upstream = %route.upstream, "Route");
        }
        info!("============================================================");
    }
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
