//! Bearer token handling: key material, verification, refresh, and the
//! cache of refreshed tokens.

pub mod cache;
pub mod key;
pub mod refresh;
pub mod verifier;

pub use cache::{InMemoryTokenCache, TokenCache, spawn_reaper};
pub use key::{KeyFamily, KeyMaterial};
pub use refresh::{RefreshClient, RefreshError, TokenRefresher};
pub use verifier::{Principal, TokenVerifier, Verdict, VerifyError, peek_expiry};

#[cfg(test)]
pub(crate) mod testing {
    //! Token minting helpers shared by unit tests

    use std::sync::Arc;
    use std::time::{SystemTime, UNIX_EPOCH};

    use jsonwebtoken::{Algorithm, EncodingKey, Header};
    use serde_json::{Value, json};

    use super::key::{KeyFamily, KeyMaterial};
    use super::verifier::TokenVerifier;
    use crate::config::AuthConfig;

    pub const SIGNING_PRIVATE_PEM: &str = include_str!("../../tests/fixtures/signing_key.pem");
    pub const SIGNING_PUBLIC_PEM: &str = include_str!("../../tests/fixtures/signing_key.pub.pem");
    pub const FOREIGN_PRIVATE_PEM: &str = include_str!("../../tests/fixtures/foreign_key.pem");

    pub fn now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    pub fn claims_expiring_in(secs: i64) -> Value {
        let now = now();
        let exp = now.saturating_add_signed(secs);
        json!({
            "sub": "user-1",
            "preferred_username": "alice",
            "iat": now.saturating_sub(7200),
            "exp": exp,
        })
    }

    pub fn mint_with(private_pem: &str, alg: Algorithm, claims: &Value) -> String {
        let key = EncodingKey::from_rsa_pem(private_pem.as_bytes()).unwrap();
        jsonwebtoken::encode(&Header::new(alg), claims, &key).unwrap()
    }

    pub fn mint(claims: &Value) -> String {
        mint_with(SIGNING_PRIVATE_PEM, Algorithm::RS256, claims)
    }

    pub fn test_auth_config() -> AuthConfig {
        AuthConfig::default()
    }

    pub fn test_key() -> Arc<KeyMaterial> {
        Arc::new(KeyMaterial::from_pem(SIGNING_PUBLIC_PEM.as_bytes(), KeyFamily::Rsa).unwrap())
    }

    pub fn test_verifier() -> TokenVerifier {
        TokenVerifier::new(test_key(), &test_auth_config())
    }
}
