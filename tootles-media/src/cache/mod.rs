//! Two-tier media cache.
//!
//! The memory tier is a bounded in-process map for quick repeat renders. The
//! disk tier is a bounded `cacache` store that survives restarts. Both share
//! the [`ResourceKey`] space, have independent budgets and apply the same
//! expiry window. A disk hit is promoted into memory in the background.
//!
//! Decoded inline thumbnails are kept in the memory tier under
//! [`ResourceKey::thumbnail`] so a repeat render skips the decoder.

mod disk;
mod entry;
mod eviction;
mod generation;
mod memory;
mod stats;
mod usage;

pub use entry::{CacheEntry, Payload, Stored};
pub use stats::{CacheStatsSnapshot, TierStatsSnapshot};

use std::{sync::Arc, time::Instant};

use tootles_model::{MediaKind, ResourceKey, Tier};
use tracing::{debug, info, trace, warn};

use crate::{
    clock::{SharedClock, SystemClock},
    config::MediaConfig,
    error::{CacheError, MediaError, Result},
};
use disk::{DiskLookup, DiskTier};
use eviction::EvictionPlan;
pub(crate) use generation::Ticket;
use generation::Generations;
use memory::{Lookup, MemoryTier};
use stats::CacheStats;

#[derive(Debug)]
pub struct MediaCache {
    memory: Arc<MemoryTier>,
    disk: Arc<DiskTier>,
    generations: Arc<Generations>,
    clock: SharedClock,
    stats: Arc<CacheStats>,
}

impl MediaCache {
    /// Open (or create) the cache rooted at `config.cache_root`.
    pub async fn open(config: &MediaConfig) -> Result<Self> {
        Self::open_with_clock(config, Arc::new(SystemClock)).await
    }

    pub async fn open_with_clock(
        config: &MediaConfig,
        clock: SharedClock,
    ) -> Result<Self> {
        let limits = config.tier_limits();
        let stats = Arc::new(CacheStats::default());
        let root = config.cache_root.clone();
        let now_ms = clock.now_ms();

        let disk_stats = Arc::clone(&stats);
        let disk = tokio::task::spawn_blocking(move || {
            DiskTier::open(root, &limits, disk_stats, now_ms)
        })
        .await
        .map_err(|e| MediaError::Internal(format!("disk cache open join failed: {e}")))?
        .map_err(|e| MediaError::Internal(format!("disk cache open failed: {e:#}")))?;

        Ok(Self {
            memory: Arc::new(MemoryTier::new(limits.memory_budget, limits.expiry)),
            disk: Arc::new(disk),
            generations: Arc::new(Generations::default()),
            clock,
            stats,
        })
    }

    /// Look `key` up in one tier.
    ///
    /// Memory lookups never touch the filesystem. A disk hit is returned
    /// immediately and copied into memory by a background task.
    pub async fn get(&self, key: &ResourceKey, tier: Tier) -> Option<CacheEntry> {
        match tier {
            Tier::Memory => self.get_memory(key),
            Tier::Disk => self.get_disk(key).await,
        }
    }

    /// Memory-tier lookup usable from synchronous code.
    pub fn get_memory(&self, key: &ResourceKey) -> Option<CacheEntry> {
        let now_ms = self.clock.now_ms();
        match self.memory.get(key, now_ms) {
            Lookup::Hit(entry) => {
                self.stats.memory.on_hit();
                Some(entry)
            }
            Lookup::Expired => {
                self.stats.memory.on_expired(1);
                self.stats.memory.on_miss();
                None
            }
            Lookup::Miss => {
                self.stats.memory.on_miss();
                None
            }
        }
    }

    async fn get_disk(&self, key: &ResourceKey) -> Option<CacheEntry> {
        let now_ms = self.clock.now_ms();
        let ticket = self.generations.ticket(key);
        match self.disk.get(key, now_ms).await {
            DiskLookup::Hit(entry) => {
                self.stats.disk.on_hit();
                if !self.memory.contains(key) {
                    self.spawn_promotion(entry.clone(), ticket);
                }
                Some(entry)
            }
            DiskLookup::Expired => {
                self.stats.disk.on_miss();
                let disk = Arc::clone(&self.disk);
                let stats = Arc::clone(&self.stats);
                let key = key.clone();
                tokio::spawn(async move {
                    if disk.remove_if_expired(&key, now_ms).await {
                        stats.disk.on_expired(1);
                    }
                });
                None
            }
            DiskLookup::Corrupt(err) => {
                self.stats.on_corrupt_read();
                self.stats.disk.on_miss();
                warn!("{err}; evicted, will refetch on next access");
                None
            }
            DiskLookup::Miss => {
                self.stats.disk.on_miss();
                None
            }
        }
    }

    /// Memory first, then disk.
    pub async fn lookup(&self, key: &ResourceKey) -> Option<CacheEntry> {
        match self.get_memory(key) {
            Some(entry) => Some(entry),
            None => self.get_disk(key).await,
        }
    }

    /// Store `bytes` in `tier`.
    ///
    /// Entries larger than the tier budget are rejected with
    /// [`CacheError::BudgetExceeded`]. A failed disk write is absorbed: the
    /// bytes are kept in memory instead and the failure is reported through
    /// [`Stored::warning`].
    pub async fn put(
        &self,
        key: &ResourceKey,
        bytes: Payload,
        kind: MediaKind,
        tier: Tier,
    ) -> std::result::Result<Stored, CacheError> {
        let ticket = self.ticket(key);
        self.put_if_current(key, bytes, kind, tier, ticket).await
    }

    /// Write generation of `key`, to be taken before its bytes are fetched.
    pub(crate) fn ticket(&self, key: &ResourceKey) -> Ticket {
        self.generations.ticket(key)
    }

    /// [`MediaCache::put`] for bytes obtained under `ticket`.
    ///
    /// Fails with [`CacheError::Superseded`] when `key` was invalidated or
    /// the cache cleared since the ticket was taken.
    pub(crate) async fn put_if_current(
        &self,
        key: &ResourceKey,
        bytes: Payload,
        kind: MediaKind,
        tier: Tier,
        ticket: Ticket,
    ) -> std::result::Result<Stored, CacheError> {
        let now_ms = self.clock.now_ms();
        let current = || self.generations.is_current(key, ticket);
        match tier {
            Tier::Memory => {
                self.put_memory(key, bytes, kind, now_ms, now_ms, current)
            }
            Tier::Disk => {
                match self
                    .disk
                    .insert(key, &bytes, kind, now_ms, now_ms, current)
                    .await
                {
                    Ok(plan) => {
                        self.record_evictions(Tier::Disk, &plan);
                        Ok(Stored {
                            tier: Tier::Disk,
                            evicted: plan.planned.len(),
                            warning: None,
                        })
                    }
                    Err(err @ CacheError::BudgetExceeded { .. }) => {
                        self.stats.disk.on_rejected_oversize();
                        Err(err)
                    }
                    Err(err @ CacheError::Superseded { .. }) => Err(err),
                    Err(err) => {
                        self.stats.on_write_failure();
                        warn!("{err}; keeping entry in memory only");
                        let stored = self.put_memory(
                            key, bytes, kind, now_ms, now_ms, current,
                        )?;
                        Ok(Stored {
                            warning: Some(err),
                            ..stored
                        })
                    }
                }
            }
        }
    }

    fn put_memory(
        &self,
        key: &ResourceKey,
        bytes: Payload,
        kind: MediaKind,
        created_ms: u64,
        now_ms: u64,
        still_current: impl Fn() -> bool,
    ) -> std::result::Result<Stored, CacheError> {
        match self
            .memory
            .insert(key, bytes, kind, created_ms, now_ms, still_current)
        {
            Ok(plan) => {
                self.record_evictions(Tier::Memory, &plan);
                Ok(Stored {
                    tier: Tier::Memory,
                    evicted: plan.planned.len(),
                    warning: None,
                })
            }
            Err(err @ CacheError::BudgetExceeded { .. }) => {
                self.stats.memory.on_rejected_oversize();
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Decoded thumbnail previously stored for `key`.
    ///
    /// Counts a memory hit when found; a miss is not counted because the
    /// caller falls through to the regular lookup.
    pub fn get_thumbnail(&self, key: &ResourceKey) -> Option<CacheEntry> {
        let now_ms = self.clock.now_ms();
        match self.memory.get(&key.thumbnail(), now_ms) {
            Lookup::Hit(entry) => {
                self.stats.memory.on_hit();
                Some(entry)
            }
            Lookup::Expired => {
                self.stats.memory.on_expired(1);
                None
            }
            Lookup::Miss => None,
        }
    }

    /// Keep an encoded thumbnail of `key` in memory.
    ///
    /// `created_ms` is the source entry's creation time so the thumbnail
    /// expires with it; `None` means the bytes were just fetched.
    pub(crate) fn put_thumbnail(
        &self,
        key: &ResourceKey,
        bytes: Payload,
        created_ms: Option<u64>,
        ticket: Ticket,
    ) -> std::result::Result<Stored, CacheError> {
        let now_ms = self.clock.now_ms();
        self.put_memory(
            &key.thumbnail(),
            bytes,
            MediaKind::Image,
            created_ms.unwrap_or(now_ms),
            now_ms,
            || self.generations.is_current(key, ticket),
        )
    }

    fn spawn_promotion(&self, entry: CacheEntry, ticket: Ticket) {
        let memory = Arc::clone(&self.memory);
        let generations = Arc::clone(&self.generations);
        let stats = Arc::clone(&self.stats);
        let now_ms = self.clock.now_ms();
        tokio::spawn(async move {
            let key = entry.key;
            let promoted = memory.insert(
                &key,
                entry.bytes,
                entry.kind,
                entry.created_ms,
                now_ms,
                || generations.is_current(&key, ticket),
            );
            match promoted {
                Ok(plan) => {
                    stats.on_promotion();
                    stats.memory.on_expired(plan.removed_expired as u64);
                    stats
                        .memory
                        .on_evicted_for_budget(plan.removed_budget as u64);
                }
                Err(err @ CacheError::BudgetExceeded { .. }) => {
                    stats.memory.on_rejected_oversize();
                    debug!(key = %key.short(), "promotion skipped: {err}");
                }
                Err(err) => {
                    debug!(key = %key.short(), "promotion skipped: {err}")
                }
            }
        });
    }

    /// Drop `key` and its thumbnail from both tiers. Returns whether
    /// anything was removed.
    ///
    /// Writes for `key` that started earlier (fetches, promotions) are
    /// discarded when they land.
    pub async fn invalidate(&self, key: &ResourceKey) -> bool {
        self.generations.bump(key);
        let thumbnail = self.memory.remove(&key.thumbnail());
        let in_memory = self.memory.remove(key);
        let on_disk = self.disk.remove(key).await;
        in_memory || on_disk || thumbnail
    }

    /// Remove every expired entry from both tiers.
    pub async fn evict_expired(&self) -> usize {
        let started = Instant::now();
        let now_ms = self.clock.now_ms();
        let memory = self.memory.evict_expired(now_ms);
        let disk = self.disk.evict_expired(now_ms).await;
        self.stats.memory.on_expired(memory as u64);
        self.stats.disk.on_expired(disk as u64);
        let elapsed_ms = started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64;
        self.stats.on_sweep_finished(elapsed_ms);
        if memory + disk > 0 {
            info!(memory, disk, elapsed_ms, "expired cache entries removed");
        }
        memory + disk
    }

    /// Wipe both tiers. Returns the number of entries removed.
    pub async fn clear(&self) -> Result<usize> {
        self.generations.bump_all();
        let memory = self.memory.clear();
        let disk = self
            .disk
            .clear(self.clock.now_ms())
            .await
            .map_err(|e| MediaError::Internal(format!("disk cache clear failed: {e:#}")))?;
        info!(memory, disk, "media cache cleared");
        Ok(memory + disk)
    }

    /// Persist pending disk access times now.
    pub async fn flush(&self) {
        self.disk.flush_access_index(self.clock.now_ms()).await;
    }

    pub fn contains(&self, key: &ResourceKey, tier: Tier) -> bool {
        match tier {
            Tier::Memory => self.memory.contains(key),
            Tier::Disk => self.disk.contains(key),
        }
    }

    pub fn usage(&self, tier: Tier) -> crate::units::ByteSize {
        match tier {
            Tier::Memory => self.memory.usage(),
            Tier::Disk => self.disk.usage(),
        }
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        let memory = self.stats.memory.snapshot(
            self.memory.usage(),
            self.memory.budget(),
            self.memory.len() as u64,
        );
        let disk = self.stats.disk.snapshot(
            self.disk.usage(),
            self.disk.budget(),
            self.disk.len() as u64,
        );
        self.stats.snapshot(memory, disk)
    }

    pub fn root(&self) -> &std::path::Path {
        self.disk.root()
    }

    fn record_evictions(&self, tier: Tier, plan: &EvictionPlan) {
        let stats = self.stats.tier(tier);
        stats.on_expired(plan.removed_expired as u64);
        stats.on_evicted_for_budget(plan.removed_budget as u64);
        if plan.planned.is_empty() {
            return;
        }
        for evicted in &plan.planned {
            trace!(
                %tier,
                key = %evicted.key.short(),
                reason = ?evicted.reason,
                size = evicted.size_bytes,
                "evicted"
            );
        }
        debug!(
            %tier,
            expired = plan.removed_expired,
            over_budget = plan.removed_budget,
            resident_before = plan.total_bytes_before,
            resident_after = plan.total_bytes_after,
            "evicted cache entries"
        );
    }
}
