//! Cache key generation.
//!
//! Keys never contain the raw token: the token is replaced by its SHA-256
//! digest, prefixed with the configured key prefix and a namespace.

use std::fmt;

use crate::telemetry::token_digest;

/// What a cache entry holds. Each kind lives in its own namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    Identity,
    Profile,
}

impl KeyType {
    pub const fn namespace(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Profile => "profile",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.namespace())
    }
}

/// Builds keys of one type under one prefix.
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    prefix: String,
    key_type: KeyType,
}

impl KeyBuilder {
    pub fn new(prefix: impl Into<String>, key_type: KeyType) -> Self {
        Self {
            prefix: prefix.into(),
            key_type,
        }
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    /// Key for the entry belonging to `token`.
    pub fn for_token(&self, token: &str) -> String {
        format!("{}{}:{}", self.prefix, self.key_type.namespace(), token_digest(token))
    }
}
