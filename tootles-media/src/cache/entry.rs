use std::{fmt, sync::Arc};

use tootles_model::{MediaKind, ResourceKey, Tier};

use crate::units::ByteSize;

/// Shared, immutable media payload.
pub type Payload = Arc<[u8]>;

/// A cached resource as seen by a reader of one tier.
///
/// `last_access_ms` reflects the access that produced this value.
#[derive(Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: ResourceKey,
    pub bytes: Payload,
    pub kind: MediaKind,
    pub size: ByteSize,
    pub created_ms: u64,
    pub last_access_ms: u64,
    pub tier: Tier,
}

impl CacheEntry {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("key", &self.key.short())
            .field("kind", &self.kind)
            .field("size", &self.size)
            .field("created_ms", &self.created_ms)
            .field("last_access_ms", &self.last_access_ms)
            .field("tier", &self.tier)
            .finish()
    }
}

/// Result of a successful `put`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stored {
    /// Tier that ended up holding the bytes.
    pub tier: Tier,
    /// Entries evicted to make room.
    pub evicted: usize,
    /// Absorbed failure, e.g. a disk write that fell back to memory.
    pub warning: Option<crate::error::CacheError>,
}
