//! Cache key derivation.
//!
//! A key is the identity's canonical form followed by every output-affecting
//! parameter as `&name=value`, in name order. Cache-mode and buster parameters
//! never participate. `%`, `&` and `=` inside names and values are
//! percent-encoded so distinct parameter sets never share a key.

use std::fmt;

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::{RequestParameters, ResourceIdentity};

const KEY_RESERVED: &AsciiSet = &CONTROLS.add(b'%').add(b'&').add(b'=');

/// Deterministic identifier of a cached artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a resolved identity and normalised parameters.
    pub fn build(identity: &ResourceIdentity, parameters: &RequestParameters) -> Self {
        let mut key = identity.canonical();
        for (name, value) in parameters.key_pairs() {
            key.push('&');
            key.extend(utf8_percent_encode(name, KEY_RESERVED));
            key.push('=');
            key.extend(utf8_percent_encode(value, KEY_RESERVED));
        }
        Self(key)
    }

    /// Wrap an already-canonical key string (e.g. read back from a manifest).
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filesystem-safe digest of the key.
    pub fn digest(&self) -> String {
        hash_value(&self.0)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// SHA-256 hex digest of a string; stable across processes and restarts.
pub fn hash_value(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}
