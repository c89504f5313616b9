//! Refresh client for the identity provider's token endpoint
//!
//! One `grant_type=refresh_token` exchange per call, no retries. The client
//! secret and the caller's refresh credential only ever live in the form body
//! of the outbound request; neither appears in errors or logs.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::Result;
use crate::config::IdentityProviderConfig;
use crate::secrets::Secret;

/// Why a refresh attempt failed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    /// Identity provider unreachable
    #[error("identity provider unreachable: {0}")]
    Transport(String),

    /// No answer within the configured timeout
    #[error("identity provider timed out")]
    Timeout,

    /// Identity provider answered with a non-success status
    #[error("identity provider rejected refresh: HTTP {status}")]
    Rejected {
        /// HTTP status code returned
        status: u16,
    },

    /// Success status but no usable `access_token`
    #[error("malformed token response: {0}")]
    MalformedResponse(String),
}

impl RefreshError {
    /// Short label for metrics
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Timeout => "timeout",
            Self::Rejected { .. } => "rejected",
            Self::MalformedResponse(_) => "malformed",
        }
    }
}

/// Exchanges a refresh credential for a new bearer token
#[async_trait]
pub trait TokenRefresher: Send + Sync + 'static {
    /// Perform a single refresh exchange
    async fn refresh(&self, credential: &Secret) -> std::result::Result<String, RefreshError>;
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
}

/// [`TokenRefresher`] talking to an OAuth 2.0 token endpoint over HTTP
pub struct RefreshClient {
    http: Client,
    token_endpoint: String,
    client_id: String,
    client_secret: Secret,
}

impl RefreshClient {
    /// Build a client from the `identity_provider` section
    pub fn new(config: &IdentityProviderConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout.min(Duration::from_secs(5)))
            .build()?;

        Ok(Self {
            http,
            token_endpoint: config.token_endpoint.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        })
    }
}

#[async_trait]
impl TokenRefresher for RefreshClient {
    async fn refresh(&self, credential: &Secret) -> std::result::Result<String, RefreshError> {
        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose()),
            ("refresh_token", credential.expose()),
        ];

        let response = self
            .http
            .post(&self.token_endpoint)
            .form(&params)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RefreshError::Timeout
                } else {
                    // without_url: the endpoint is config, the error text stays short
                    RefreshError::Transport(e.without_url().to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            // Body is dropped unread; it may echo the submitted credential
            return Err(RefreshError::Rejected {
                status: status.as_u16(),
            });
        }

        let body: TokenResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                RefreshError::Timeout
            } else {
                RefreshError::MalformedResponse(e.without_url().to_string())
            }
        })?;

        match body.access_token {
            Some(token) if !token.is_empty() => {
                debug!("Identity provider issued a new access token");
                Ok(token)
            }
            _ => Err(RefreshError::MalformedResponse(
                "missing access_token".to_string(),
            )),
        }
    }
}
