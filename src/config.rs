//! Configuration management

use std::{env, path::Path, path::PathBuf, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use jsonwebtoken::Algorithm;
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::secrets::Secret;
use crate::{Error, Result};

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "EDGE_GATEWAY_";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Token verification configuration
    pub auth: AuthConfig,
    /// Identity provider used for token refresh
    pub identity_provider: IdentityProviderConfig,
    /// Refreshed token cache configuration
    pub token_cache: TokenCacheConfig,
    /// Route policy configuration
    pub security: SecurityConfig,
    /// CORS configuration
    pub cors: CorsConfig,
    /// Downstream routes
    pub routes: Vec<RouteConfig>,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Timeout for a forwarded request to a backend service
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            request_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
            max_body_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// What the filter does with a token that is neither valid nor expired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InvalidTokenPolicy {
    /// Pass the request through and let the route policy decide (fail-open)
    #[default]
    Forward,
    /// Answer 401 immediately (fail-closed)
    Reject,
}

/// Token verification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Public verification key: PEM, or the bare base64 `SubjectPublicKeyInfo`
    /// body as published by most identity providers. Supports `env:VAR_NAME`.
    pub public_key: Option<Secret>,
    /// Path to a PEM file holding the public verification key
    pub public_key_file: Option<PathBuf>,
    /// Accepted signature algorithms (all from the same key family)
    pub algorithms: Vec<Algorithm>,
    /// Clock skew tolerance applied to `exp` and `nbf` (none by default: a
    /// token is expired as soon as `exp` has passed)
    #[serde(with = "humantime_serde")]
    pub leeway: Duration,
    /// Accepted audiences (empty = `aud` not checked)
    pub audiences: Vec<String>,
    /// Required issuer (`iss`), if any
    pub issuer: Option<String>,
    /// Header carrying the caller's refresh credential
    pub refresh_header: String,
    /// Handling of malformed or forged tokens
    pub invalid_token_policy: InvalidTokenPolicy,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            public_key: None,
            public_key_file: None,
            algorithms: vec![Algorithm::RS256],
            leeway: Duration::ZERO,
            audiences: Vec::new(),
            issuer: None,
            refresh_header: "Refresh-token".to_string(),
            invalid_token_policy: InvalidTokenPolicy::Forward,
        }
    }
}

/// Identity provider (token endpoint) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityProviderConfig {
    /// Token endpoint accepting `grant_type=refresh_token`
    pub token_endpoint: String,
    /// OAuth client id
    pub client_id: String,
    /// OAuth client secret (supports `env:VAR_NAME`)
    pub client_secret: Secret,
    /// Upper bound for one refresh round-trip
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for IdentityProviderConfig {
    fn default() -> Self {
        Self {
            token_endpoint: String::new(),
            client_id: String::new(),
            client_secret: Secret::default(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Refreshed token cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenCacheConfig {
    /// Maximum number of entries before eviction (0 = unbounded)
    pub max_entries: usize,
    /// Lifetime of an entry whose replacement token carries no readable `exp`
    #[serde(with = "humantime_serde")]
    pub fallback_ttl: Duration,
    /// Interval of the background sweep that drops expired entries
    #[serde(with = "humantime_serde")]
    pub reap_interval: Duration,
}

impl Default for TokenCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            fallback_ttl: Duration::from_secs(300),
            reap_interval: Duration::from_secs(60),
        }
    }
}

/// Route policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Path prefixes that require an authenticated principal
    pub protected_prefixes: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            protected_prefixes: vec!["/customers".to_string(), "/addresses".to_string()],
        }
    }
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Enable the CORS layer
    pub enabled: bool,
    /// Allowed origins (`*` = any)
    pub allowed_origins: Vec<String>,
    /// Allowed methods (`*` = any)
    pub allowed_methods: Vec<String>,
    /// Response headers exposed to browser clients
    pub exposed_headers: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_origins: vec!["*".to_string()],
            allowed_methods: vec!["*".to_string()],
            exposed_headers: vec!["Authorization".to_string()],
        }
    }
}

/// A downstream route
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Route name (for logs)
    #[serde(default)]
    pub name: String,
    /// Path prefix handled by this route
    pub prefix: String,
    /// Upstream base URL
    pub upstream: String,
    /// Remove the prefix before forwarding
    #[serde(default)]
    pub strip_prefix: bool,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist, cannot be parsed,
    /// or fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        // Load from file if provided
        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (EDGE_GATEWAY_ prefix)
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        Self::from_figment(&figment)
    }

    /// Load configuration from an inline YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Self::from_figment(&Figment::from(Yaml::string(yaml)))
    }

    fn from_figment(figment: &Figment) -> Result<Self> {
        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Load env files into process environment (before env var expansion)
        config.load_env_files();
        config.expand_env_vars();
        config.resolve_secrets();
        config.validate()?;

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {expanded}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {expanded}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand ${VAR} and ${VAR:-default} patterns in config values
    fn expand_env_vars(&mut self) {
        // Pattern: ${VAR} or ${VAR:-default}
        let Ok(re) = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}") else {
            return;
        };

        let idp = &mut self.identity_provider;
        idp.token_endpoint = Self::expand_string(&re, &idp.token_endpoint);
        idp.client_id = Self::expand_string(&re, &idp.client_id);

        if let Some(ref mut file) = self.auth.public_key_file {
            *file = PathBuf::from(Self::expand_string(&re, &file.to_string_lossy()));
        }

        for route in &mut self.routes {
            route.upstream = Self::expand_string(&re, &route.upstream);
        }
    }

    /// Expand environment variables in a string
    fn expand_string(re: &Regex, value: &str) -> String {
        re.replace_all(value, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
    }

    /// Resolve `env:VAR_NAME` secret references
    fn resolve_secrets(&mut self) {
        self.identity_provider.client_secret = self.identity_provider.client_secret.resolved();
        if let Some(ref key) = self.auth.public_key {
            self.auth.public_key = Some(key.resolved());
        }
    }

    /// Check cross-field constraints
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first violation found.
    pub fn validate(&self) -> Result<()> {
        match (&self.auth.public_key, &self.auth.public_key_file) {
            (Some(_), Some(_)) => {
                return Err(Error::Config(
                    "auth.public_key and auth.public_key_file are mutually exclusive".to_string(),
                ));
            }
            (None, None) => {
                return Err(Error::Config(
                    "auth.public_key or auth.public_key_file is required".to_string(),
                ));
            }
            _ => {}
        }

        if self.auth.algorithms.is_empty() {
            return Err(Error::Config("auth.algorithms must not be empty".to_string()));
        }

        if self.auth.refresh_header.trim().is_empty() {
            return Err(Error::Config("auth.refresh_header must not be empty".to_string()));
        }

        parse_http_url("identity_provider.token_endpoint", &self.identity_provider.token_endpoint)?;

        for route in &self.routes {
            if !route.prefix.starts_with('/') {
                return Err(Error::Config(format!(
                    "route prefix must start with '/': {}",
                    route.prefix
                )));
            }
            parse_http_url(&format!("routes[{}].upstream", route.prefix), &route.upstream)?;
        }

        Ok(())
    }
}

/// Parse an absolute http(s) URL
fn parse_http_url(field: &str, value: &str) -> Result<Url> {
    let url = Url::parse(value).map_err(|e| Error::Config(format!("{field}: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(Error::Config(format!(
            "{field}: unsupported scheme '{other}'"
        ))),
    }
}
