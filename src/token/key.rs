//! Verification key material
//!
//! The public key is decoded once at startup and shared read-only by every
//! verification. Rotating it requires a restart.
//!
//! Two encodings are accepted:
//!
//! - a full PEM document (`-----BEGIN PUBLIC KEY-----` ...), inline or from a file
//! - the bare base64 `SubjectPublicKeyInfo` body, which is how realm keys are
//!   usually copied out of an identity provider's admin console

use std::path::Path;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use jsonwebtoken::{Algorithm, DecodingKey};
use tracing::debug;

use crate::config::AuthConfig;
use crate::{Error, Result};

const PEM_HEADER: &str = "-----BEGIN PUBLIC KEY-----";
const PEM_FOOTER: &str = "-----END PUBLIC KEY-----";

/// Key family implied by the configured algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFamily {
    /// RSA (`RS*`, `PS*`)
    Rsa,
    /// Elliptic curve (`ES*`)
    Ec,
    /// Edwards curve (`EdDSA`)
    Ed,
}

impl KeyFamily {
    /// Family of a single algorithm, `None` for symmetric (HMAC) algorithms
    #[must_use]
    pub fn of(alg: Algorithm) -> Option<Self> {
        match alg {
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512 => Some(Self::Rsa),
            Algorithm::ES256 | Algorithm::ES384 => Some(Self::Ec),
            Algorithm::EdDSA => Some(Self::Ed),
            _ => None,
        }
    }

    /// Common family of all algorithms, rejecting symmetric or mixed sets
    pub fn for_algorithms(algorithms: &[Algorithm]) -> Result<Self> {
        let mut family = None;
        for alg in algorithms {
            let this = Self::of(*alg).ok_or_else(|| {
                Error::KeyMaterial(format!("{alg:?} has no public key form"))
            })?;
            match family {
                None => family = Some(this),
                Some(existing) if existing != this => {
                    return Err(Error::KeyMaterial(
                        "auth.algorithms mixes key families".to_string(),
                    ));
                }
                Some(_) => {}
            }
        }
        family.ok_or_else(|| Error::KeyMaterial("no algorithms configured".to_string()))
    }
}

/// Decoded public verification key
pub struct KeyMaterial {
    decoding_key: DecodingKey,
    family: KeyFamily,
}

impl KeyMaterial {
    /// Load the key described by the `auth` configuration section
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyMaterial`] when the key is missing, unreadable, or
    /// does not decode for the configured algorithm family.
    pub fn load(config: &AuthConfig) -> Result<Self> {
        let family = KeyFamily::for_algorithms(&config.algorithms)?;

        let pem = match (&config.public_key, &config.public_key_file) {
            (Some(inline), _) => normalize_pem(inline.expose())?,
            (None, Some(path)) => read_pem_file(path)?,
            (None, None) => {
                return Err(Error::KeyMaterial("no public key configured".to_string()));
            }
        };

        let material = Self::from_pem(pem.as_bytes(), family)?;
        debug!(family = ?family, "Loaded verification key");
        Ok(material)
    }

    /// Decode a PEM public key of the given family
    pub fn from_pem(pem: &[u8], family: KeyFamily) -> Result<Self> {
        let decoding_key = match family {
            KeyFamily::Rsa => DecodingKey::from_rsa_pem(pem)?,
            KeyFamily::Ec => DecodingKey::from_ec_pem(pem)?,
            KeyFamily::Ed => DecodingKey::from_ed_pem(pem)?,
        };
        Ok(Self {
            decoding_key,
            family,
        })
    }

    /// The decoding key bound to this material
    #[must_use]
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }

    /// Key family
    #[must_use]
    pub fn family(&self) -> KeyFamily {
        self.family
    }
}

fn read_pem_file(path: &Path) -> Result<String> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        Error::KeyMaterial(format!("cannot read {}: {e}", path.display()))
    })?;
    normalize_pem(&contents)
}

/// Accept PEM as-is; wrap a bare base64 body into a PEM document.
fn normalize_pem(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.starts_with("-----BEGIN") {
        return Ok(trimmed.to_string());
    }

    let body: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    if body.is_empty() {
        return Err(Error::KeyMaterial("public key is empty".to_string()));
    }
    STANDARD
        .decode(&body)
        .map_err(|e| Error::KeyMaterial(format!("public key is not valid base64: {e}")))?;

    let mut pem = String::with_capacity(body.len() + 64);
    pem.push_str(PEM_HEADER);
    pem.push('\n');
    for line in body.as_bytes().chunks(64) {
        // base64 is ASCII, so every chunk is valid UTF-8
        pem.push_str(&String::from_utf8_lossy(line));
        pem.push('\n');
    }
    pem.push_str(PEM_FOOTER);
    pem.push('\n');
    Ok(pem)
}
