//! Cache key derivation.
//!
//! A key is the SHA-256 of the request attributes that are active under the
//! current rules, so identical inputs always address the same store slot.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::domain::request::PageRequest;

/// Which request attributes vary the key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyOptions {
    pub query_strings: bool,
    pub mobile: bool,
    pub user_agent: bool,
}

/// Hex-encoded SHA-256 naming one stored page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn derive(request: &PageRequest, options: &KeyOptions) -> Self {
        let mut material = request.path.clone();

        if options.query_strings
            && let Some(query) = request.query.as_deref().filter(|query| !query.is_empty())
        {
            material.push('?');
            material.push_str(query);
        }

        if options.mobile && request.is_mobile() {
            material.push_str("_mobile");
        }

        if options.user_agent {
            let agent = request.user_agent.as_deref().unwrap_or_default();
            material.push_str("_ua:");
            material.push_str(&sha256_hex(agent.as_bytes()));
        }

        Self(sha256_hex(material.as_bytes()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
