use std::fmt;

use sha2::{Digest, Sha256};
use url::Url;

use crate::error::{ModelError, Result};

const KEY_PREFIX: &str = "media/v1/";
const THUMBNAIL_PREFIX: &str = "thumb/v1/";
const DIGEST_LEN: usize = 64;

/// Stable cache key for a remote media resource.
///
/// Derived from the canonical form of the resource URL: scheme and host are
/// lowercased, default ports are elided and fragments are dropped, so two
/// spellings of the same address share one key. The key is:
/// - versioned (prefix)
/// - fixed length (hex SHA-256 of the canonical URL)
///
/// Deserializing goes through the same validation as
/// [`ResourceKey::from_stored`].
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "String", into = "String"))]
pub struct ResourceKey(String);

impl ResourceKey {
    /// Build the key for an already parsed URL.
    pub fn for_url(url: &Url) -> Self {
        let canonical = canonicalize(url);
        let digest = Sha256::digest(canonical.as_str().as_bytes());
        let mut key = String::with_capacity(KEY_PREFIX.len() + DIGEST_LEN);
        key.push_str(KEY_PREFIX);
        key.push_str(&hex::encode(digest));
        Self(key)
    }

    /// Parse `raw` and return its canonical URL together with the key.
    pub fn parse_url(raw: &str) -> Result<(Url, Self)> {
        let parsed =
            Url::parse(raw.trim()).map_err(|err| ModelError::InvalidUrl {
                url: raw.to_string(),
                reason: err.to_string(),
            })?;
        let canonical = canonicalize(&parsed);
        let key = Self::for_url(&canonical);
        Ok((canonical, key))
    }

    /// Rehydrate a key read back from persisted storage.
    pub fn from_stored(key: impl Into<String>) -> Option<Self> {
        let key = key.into();
        let digest = key
            .strip_prefix(KEY_PREFIX)
            .or_else(|| key.strip_prefix(THUMBNAIL_PREFIX))?;
        let valid = digest.len() == DIGEST_LEN
            && digest
                .bytes()
                .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        valid.then_some(Self(key))
    }

    /// Key of the decoded thumbnail rendered from this resource.
    pub fn thumbnail(&self) -> Self {
        let mut key = String::with_capacity(THUMBNAIL_PREFIX.len() + DIGEST_LEN);
        key.push_str(THUMBNAIL_PREFIX);
        key.push_str(self.digest());
        Self(key)
    }

    pub fn is_thumbnail(&self) -> bool {
        self.0.starts_with(THUMBNAIL_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix of the digest, handy for log lines.
    pub fn short(&self) -> &str {
        let digest = self.digest();
        digest.get(..12).unwrap_or(digest)
    }

    fn digest(&self) -> &str {
        self.0
            .strip_prefix(KEY_PREFIX)
            .or_else(|| self.0.strip_prefix(THUMBNAIL_PREFIX))
            .unwrap_or(&self.0)
    }
}

impl TryFrom<String> for ResourceKey {
    type Error = ModelError;

    fn try_from(key: String) -> Result<Self> {
        match Self::from_stored(key.as_str()) {
            Some(valid) => Ok(valid),
            None => Err(ModelError::InvalidKey { key }),
        }
    }
}

impl From<ResourceKey> for String {
    fn from(key: ResourceKey) -> Self {
        key.0
    }
}

impl fmt::Debug for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ResourceKey").field(&self.0).finish()
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn canonicalize(url: &Url) -> Url {
    // `Url` already lowercases scheme/host and drops default ports.
    let mut canonical = url.clone();
    canonical.set_fragment(None);
    canonical
}
