//! Secret values that must never reach logs
//!
//! The client secret and caller-supplied refresh credentials are wrapped in
//! [`Secret`], which redacts itself in `Debug` and `Display`. Configuration
//! values may use the `env:VAR_NAME` indirection; deserialization keeps the raw
//! reference and [`Secret::resolved`] expands it once env files are loaded.

use std::env;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

const REDACTED: &str = "<redacted>";

/// Redacted string wrapper for credentials.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Secret(String);

impl Secret {
    /// Wrap a secret value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Resolve a configured value: `env:VAR_NAME` reads the variable,
    /// anything else is taken literally.
    ///
    /// An unset variable leaves the reference in place so that the failure
    /// surfaces at the identity provider instead of as an empty secret.
    #[must_use]
    pub fn resolve(raw: &str) -> Self {
        match raw.strip_prefix("env:") {
            Some(var_name) => Self(env::var(var_name).unwrap_or_else(|_| raw.to_string())),
            None => Self(raw.to_string()),
        }
    }

    /// Re-resolve a value that was deserialized raw.
    #[must_use]
    pub fn resolved(&self) -> Self {
        Self::resolve(&self.0)
    }

    /// Return the inner value. Callers must not log it.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether the secret is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Secret").field(&REDACTED).finish()
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self)
    }
}

// Serialized config dumps never carry the value.
impl Serialize for Secret {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(REDACTED)
    }
}
