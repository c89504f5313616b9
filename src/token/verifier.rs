//! Offline bearer token verification
//!
//! A [`TokenVerifier`] is bound to one [`KeyMaterial`] and one [`Validation`]
//! built at startup. Verification classifies a token as:
//!
//! - [`Verdict::Valid`]: signature checks out and the token is within its
//!   validity window (subject to leeway).
//! - [`Verdict::Expired`]: signature checks out but `exp` is in the past. This
//!   is the only verdict that leads to a refresh attempt.
//! - [`Verdict::Invalid`]: anything else (unparseable, forged, wrong
//!   algorithm, wrong issuer/audience). Never an error.
//!
//! `jsonwebtoken` checks the signature before any claim, so an expired
//! verdict implies an authentic token.

use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, Validation, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::key::KeyMaterial;
use crate::config::AuthConfig;

/// Why a token failed verification
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// Authentic token past its expiry
    #[error("token expired")]
    Expired,

    /// Unparseable, forged, or failing a claim check
    #[error("token rejected: {0}")]
    Malformed(#[from] jsonwebtoken::errors::Error),
}

/// Outcome of verifying one token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Authentic and current
    Valid(Principal),
    /// Authentic but expired
    Expired,
    /// Malformed, forged, or otherwise unacceptable
    Invalid,
}

/// Identity extracted from a verified token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// `sub` claim
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// `iss` claim
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    /// `preferred_username` claim
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    /// `scope` claim
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// `exp` claim (Unix seconds)
    pub expires_at: u64,
}

/// Claims read from the token payload
#[derive(Debug, Deserialize)]
struct Claims {
    /// Expiry (validated by jsonwebtoken)
    exp: u64,
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    iss: Option<String>,
    #[serde(default)]
    preferred_username: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

impl From<Claims> for Principal {
    fn from(claims: Claims) -> Self {
        Self {
            subject: claims.sub,
            issuer: claims.iss,
            preferred_username: claims.preferred_username,
            scope: claims.scope,
            expires_at: claims.exp,
        }
    }
}

/// Verifier bound to a single public key
pub struct TokenVerifier {
    key: Arc<KeyMaterial>,
    validation: Validation,
}

impl TokenVerifier {
    /// Build a verifier from the key and the `auth` section
    #[must_use]
    pub fn new(key: Arc<KeyMaterial>, config: &AuthConfig) -> Self {
        let primary = config
            .algorithms
            .first()
            .copied()
            .unwrap_or(Algorithm::RS256);

        let mut validation = Validation::new(primary);
        validation.algorithms.clone_from(&config.algorithms);
        validation.leeway = config.leeway.as_secs();

        // jsonwebtoken rejects any token carrying `aud` unless audiences are set
        if config.audiences.is_empty() {
            validation.validate_aud = false;
        } else {
            validation.set_audience(&config.audiences);
        }
        if let Some(ref issuer) = config.issuer {
            validation.set_issuer(&[issuer]);
        }

        Self { key, validation }
    }

    /// Decode and check a token, returning its principal
    ///
    /// # Errors
    ///
    /// [`VerifyError::Expired`] for an authentic expired token,
    /// [`VerifyError::Malformed`] for everything else.
    pub fn decode(&self, token: &str) -> Result<Principal, VerifyError> {
        match jsonwebtoken::decode::<Claims>(token, self.key.decoding_key(), &self.validation) {
            Ok(data) => Ok(data.claims.into()),
            Err(e) if matches!(e.kind(), ErrorKind::ExpiredSignature) => Err(VerifyError::Expired),
            Err(e) => Err(VerifyError::Malformed(e)),
        }
    }

    /// Classify a token. Never fails.
    #[must_use]
    pub fn verify(&self, token: &str) -> Verdict {
        match self.decode(token) {
            Ok(principal) => Verdict::Valid(principal),
            Err(VerifyError::Expired) => {
                debug!("Token expired");
                Verdict::Expired
            }
            Err(VerifyError::Malformed(e)) => {
                debug!(error = %e, "Token validation error");
                Verdict::Invalid
            }
        }
    }

    /// Classify a token on the blocking pool, keeping signature checks off
    /// the I/O workers.
    pub async fn verify_blocking(self: &Arc<Self>, token: String) -> Verdict {
        let verifier = Arc::clone(self);
        match tokio::task::spawn_blocking(move || verifier.verify(&token)).await {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(error = %e, "Verification task failed");
                Verdict::Invalid
            }
        }
    }
}

/// Read `exp` from a token payload without checking the signature.
///
/// Only used to bound how long a refreshed token stays cached; never for an
/// authentication decision.
#[must_use]
pub fn peek_expiry(token: &str) -> Option<u64> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let value: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    value.get("exp")?.as_u64()
}
