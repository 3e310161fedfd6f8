use std::fmt::{self, Write};
use std::sync::Arc;

use sha2::{Digest, Sha256};

/// Identity of a cacheable request.
///
/// The key is derived from the canonical URL, the authorization principal and the user agent.
/// It doubles as the de-duplication key for in-flight calls and as the relative path of the
/// cached record.
#[derive(Debug, Clone, Eq)]
pub struct CacheKey {
    metadata: Arc<str>,
    hash: [u8; 32],
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cache_path())
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl std::hash::Hash for CacheKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl CacheKey {
    /// Creates a [`CacheKey`] for a request.
    ///
    /// `principal` is the user (and domain) the request authenticates as, never a secret.
    pub fn from_request(canonical_url: &str, principal: Option<&str>, agent: &str) -> Self {
        let mut builder = Self::builder();
        builder
            .write_request_meta(canonical_url, principal, agent)
            .expect("writing to a String cannot fail");
        builder.build()
    }

    /// Create a [`CacheKeyBuilder`] that can be used to build a cache key consisting of all its
    /// contributing parts.
    pub fn builder() -> CacheKeyBuilder {
        CacheKeyBuilder {
            metadata: String::new(),
        }
    }

    /// Returns the human-readable metadata that forms the basis of the [`CacheKey`].
    pub fn metadata(&self) -> &str {
        &self.metadata
    }

    /// Returns the relative path for this cache key.
    ///
    /// The relative path is a sha-256 hash hex-formatted like so:
    /// `aa/bbccdd/eeff...`
    pub fn cache_path(&self) -> String {
        let mut path = String::with_capacity(66);
        let _ = write!(path, "{:02x}/", self.hash[0]);
        for b in &self.hash[1..4] {
            let _ = write!(path, "{b:02x}");
        }
        path.push('/');
        for b in &self.hash[4..] {
            let _ = write!(path, "{b:02x}");
        }
        path
    }

    /// Returns the relative path of the properties file holding the record for this key.
    pub fn record_path(&self) -> String {
        format!("{}.properties", self.cache_path())
    }

    #[cfg(test)]
    pub fn for_testing(key: impl Into<String>) -> Self {
        CacheKeyBuilder {
            metadata: key.into(),
        }
        .build()
    }
}

/// Returns the relative record path for the given request identity.
pub fn make_file_name(canonical_url: &str, principal: Option<&str>, agent: &str) -> String {
    CacheKey::from_request(canonical_url, principal, agent).record_path()
}

/// A builder for [`CacheKey`]s.
///
/// This builder implements the [`Write`](std::fmt::Write) trait, and the intention of it is to
/// accept human readable, but most importantly **stable**, input.
/// This input in then being hashed to form the [`CacheKey`].
pub struct CacheKeyBuilder {
    metadata: String,
}

impl CacheKeyBuilder {
    /// Writes the identity of a request into the [`CacheKey`].
    pub fn write_request_meta(
        &mut self,
        canonical_url: &str,
        principal: Option<&str>,
        agent: &str,
    ) -> fmt::Result {
        write!(
            self.metadata,
            "url: {canonical_url}\nauth: {}\nagent: {agent}\n",
            principal.unwrap_or("-"),
        )
    }

    /// Finalize the [`CacheKey`].
    pub fn build(self) -> CacheKey {
        let hash = Sha256::digest(&self.metadata);

        CacheKey {
            metadata: self.metadata.into(),
            hash: hash.into(),
        }
    }
}

impl fmt::Write for CacheKeyBuilder {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.metadata.write_str(s)
    }
}
