mod access_index;

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};

use cacache::Integrity;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::{io::AsyncWriteExt, sync::Mutex};
use tootles_model::{MediaKind, ResourceKey, Tier};
use tracing::{debug, info, warn};

use super::{
    entry::{CacheEntry, Payload},
    eviction::{EntryInfo, EvictionPlan, is_expired, plan_evictions},
    stats::CacheStats,
    usage::UsageBytes,
};
use crate::{
    clock::duration_ms, config::TierLimits, constants, error::CacheError,
    units::ByteSize,
};
use access_index::{AccessIndex, KeyDigest, write_snapshot_sync};

const BLOB_DIR: &str = "blobs";
const ACCESS_INDEX_FILE: &str = "access-index-v1.bin";

/// Per-entry record stored in the `cacache` index next to each blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EntryMetadata {
    kind: MediaKind,
    created_ms: u64,
}

/// Size, metadata and blob hash of an entry found while opening.
type Restored = (u64, EntryMetadata, Integrity);

#[derive(Debug)]
struct DiskSlot {
    size: u64,
    kind: MediaKind,
    created_ms: u64,
    last_access_ms: AtomicU64,
    seq: u64,
    integrity: Integrity,
}

impl DiskSlot {
    fn info(&self, key: &ResourceKey) -> EntryInfo {
        EntryInfo {
            key: key.clone(),
            size_bytes: self.size,
            created_ms: self.created_ms,
            last_access_ms: self.last_access_ms.load(Ordering::Acquire),
            seq: self.seq,
        }
    }
}

pub(crate) enum DiskLookup {
    Hit(CacheEntry),
    Miss,
    Expired,
    Corrupt(CacheError),
}

/// Content-addressed on-disk tier backed by `cacache`.
///
/// The in-memory `index` mirrors the `cacache` index so lookups and eviction
/// planning never list the directory. All mutations hold `writer`; lock order
/// is `writer` then `access_index`.
///
/// `cacache` stores identical bytes once, so several keys can share a blob.
/// Removing a key drops its index entry and only deletes the blob once no
/// other key still points at the same integrity.
#[derive(Debug)]
pub(crate) struct DiskTier {
    root: PathBuf,
    blobs: PathBuf,
    index: DashMap<ResourceKey, Arc<DiskSlot>>,
    writer: Mutex<()>,
    usage: UsageBytes,
    budget: u64,
    expiry_ms: u64,
    flush_interval_ms: u64,
    next_seq: AtomicU64,
    access_index: Mutex<AccessIndex>,
    access_index_flush_lock: Mutex<()>,
    stats: Arc<CacheStats>,
}

impl DiskTier {
    /// Rebuild the tier from what is already on disk.
    ///
    /// Entries with unreadable metadata are dropped, then expiry and the
    /// budget are applied before anything is served.
    pub fn open(
        root: PathBuf,
        limits: &TierLimits,
        stats: Arc<CacheStats>,
        now_ms: u64,
    ) -> anyhow::Result<Self> {
        let blobs = root.join(BLOB_DIR);
        std::fs::create_dir_all(&blobs)?;

        let budget = limits.disk_budget.as_bytes();
        let expiry_ms = duration_ms(limits.expiry);
        let mut access_index =
            AccessIndex::load_or_default(root.join(ACCESS_INDEX_FILE), now_ms);

        let mut restored: HashMap<ResourceKey, Restored> = HashMap::new();
        let mut unreadable: Vec<(String, Integrity)> = Vec::new();
        for entry in cacache::index::ls(&blobs) {
            let m = match entry {
                Ok(m) => m,
                Err(e) => {
                    warn!("disk cache index ls entry error: {e}");
                    continue;
                }
            };
            let key = ResourceKey::from_stored(m.key.clone());
            let meta = serde_json::from_value::<EntryMetadata>(m.metadata.clone());
            match (key, meta) {
                (Some(key), Ok(meta)) => {
                    restored.insert(key, (m.size as u64, meta, m.integrity));
                }
                _ => unreadable.push((m.key, m.integrity)),
            }
        }

        let remover = cacache::index::RemoveOpts::new().remove_fully(false);
        let mut dropped: Vec<Integrity> = Vec::new();
        for (raw, integrity) in &unreadable {
            match remover.clone().remove_sync(&blobs, raw) {
                Ok(()) => dropped.push(integrity.clone()),
                Err(err) => {
                    warn!(key = %raw, "failed to drop unreadable entry: {err}")
                }
            }
        }

        let mut infos: Vec<EntryInfo> = restored
            .iter()
            .map(|(key, (size, meta, _))| EntryInfo {
                key: key.clone(),
                size_bytes: *size,
                created_ms: meta.created_ms,
                last_access_ms: access_index
                    .last_access_ms(&KeyDigest::from_key(key))
                    .unwrap_or(meta.created_ms),
                seq: 0,
            })
            .collect();
        infos.sort_by(|a, b| {
            a.created_ms.cmp(&b.created_ms).then_with(|| a.key.cmp(&b.key))
        });
        for (seq, info) in infos.iter_mut().enumerate() {
            info.seq = seq as u64;
        }

        let plan = plan_evictions(infos.clone(), now_ms, expiry_ms, budget, 0);
        for planned in &plan.planned {
            match remover.clone().remove_sync(&blobs, planned.key.as_str()) {
                Ok(()) => {
                    if let Some((.., integrity)) = restored.remove(&planned.key)
                    {
                        dropped.push(integrity);
                    }
                }
                Err(err) => warn!(
                    key = %planned.key,
                    "disk cache open eviction failed: {err}"
                ),
            }
        }

        let index = DashMap::with_capacity(restored.len());
        let mut present = HashSet::with_capacity(restored.len());
        let mut total = 0u64;
        for info in &infos {
            let Some((size, meta, integrity)) = restored.remove(&info.key)
            else {
                continue;
            };
            present.insert(KeyDigest::from_key(&info.key));
            total = total.saturating_add(size);
            index.insert(
                info.key.clone(),
                Arc::new(DiskSlot {
                    size,
                    kind: meta.kind,
                    created_ms: meta.created_ms,
                    last_access_ms: AtomicU64::new(info.last_access_ms),
                    seq: info.seq,
                    integrity,
                }),
            );
        }

        let live: HashSet<String> = index
            .iter()
            .map(|e| e.value().integrity.to_string())
            .collect();
        let mut swept = HashSet::new();
        for integrity in dropped {
            let sri = integrity.to_string();
            if live.contains(&sri) || !swept.insert(sri) {
                continue;
            }
            if let Err(err) = cacache::remove_hash_sync(&blobs, &integrity) {
                warn!(%integrity, "failed to delete unreferenced blob: {err}");
            }
        }

        let pruned = access_index.prune_not_in_set(&present);
        if pruned > 0 {
            debug!("disk cache access index pruned {pruned} stale entries");
        }
        if let Some((path, bytes)) = access_index.prepare_flush(now_ms)
            && let Err(err) = write_snapshot_sync(&path, &bytes)
        {
            warn!(
                path = %path.display(),
                "disk cache access index persist failed: {err}"
            );
            access_index.mark_dirty();
        }

        info!(
            root = %root.display(),
            entries = index.len(),
            resident = %ByteSize::from_bytes(total),
            dropped_unreadable = unreadable.len(),
            expired = plan.removed_expired,
            over_budget = plan.removed_budget,
            "disk cache opened"
        );
        stats.disk.on_expired(plan.removed_expired as u64);
        stats.disk.on_evicted_for_budget(plan.removed_budget as u64);

        Ok(Self {
            root,
            blobs,
            next_seq: AtomicU64::new(index.len() as u64),
            index,
            writer: Mutex::new(()),
            usage: UsageBytes::new(total),
            budget,
            expiry_ms,
            flush_interval_ms: duration_ms(limits.access_flush_interval),
            access_index: Mutex::new(access_index),
            access_index_flush_lock: Mutex::new(()),
            stats,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.index.contains_key(key)
    }

    pub fn usage(&self) -> ByteSize {
        ByteSize::from_bytes(self.usage.load())
    }

    pub fn budget(&self) -> ByteSize {
        ByteSize::from_bytes(self.budget)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub async fn get(&self, key: &ResourceKey, now_ms: u64) -> DiskLookup {
        let Some(slot) = self.index.get(key).map(|s| Arc::clone(s.value()))
        else {
            return DiskLookup::Miss;
        };

        if is_expired(slot.created_ms, now_ms, self.expiry_ms) {
            return DiskLookup::Expired;
        }

        match cacache::read(&self.blobs, key.as_str()).await {
            Ok(bytes) => {
                slot.last_access_ms.fetch_max(now_ms, Ordering::AcqRel);
                self.touch(key, now_ms).await;
                DiskLookup::Hit(CacheEntry {
                    key: key.clone(),
                    size: ByteSize::from_usize(bytes.len()),
                    bytes: Payload::from(bytes),
                    kind: slot.kind,
                    created_ms: slot.created_ms,
                    last_access_ms: now_ms,
                    tier: Tier::Disk,
                })
            }
            Err(cacache::Error::EntryNotFound(_, _)) => {
                debug!(key = %key.short(), "disk entry vanished; dropping from index");
                self.remove_slot(key, &slot).await;
                DiskLookup::Miss
            }
            Err(err) => {
                self.remove_slot(key, &slot).await;
                DiskLookup::Corrupt(CacheError::ReadCorruption {
                    key: key.clone(),
                    reason: err.to_string(),
                })
            }
        }
    }

    /// Store `bytes` under `key`, evicting until it fits the budget.
    ///
    /// `still_current` is checked once the writer lock is held; a write whose
    /// key was invalidated in the meantime is dropped with
    /// [`CacheError::Superseded`].
    pub async fn insert<F>(
        &self,
        key: &ResourceKey,
        bytes: &[u8],
        kind: MediaKind,
        created_ms: u64,
        now_ms: u64,
        still_current: F,
    ) -> Result<EvictionPlan, CacheError>
    where
        F: Fn() -> bool + Sync,
    {
        let size = bytes.len() as u64;
        if size > self.budget {
            return Err(CacheError::BudgetExceeded {
                size: ByteSize::from_bytes(size),
                budget: ByteSize::from_bytes(self.budget),
            });
        }

        let plan = {
            let _guard = self.writer.lock().await;
            if !still_current() {
                return Err(CacheError::Superseded { key: key.clone() });
            }

            // Drop the previous entry first so its blob does not linger.
            self.remove_locked(key).await;

            let infos = self.index.iter().map(|e| e.value().info(e.key())).collect();
            let plan =
                plan_evictions(infos, now_ms, self.expiry_ms, self.budget, size);
            for planned in &plan.planned {
                self.remove_locked(&planned.key).await;
            }

            let metadata = EntryMetadata { kind, created_ms };
            let written = write_entry(&self.blobs, key, bytes, &metadata).await;
            let integrity = match written {
                Ok(integrity) => integrity,
                Err(err) => {
                    return Err(CacheError::WriteFailure {
                        key: key.clone(),
                        reason: format!("{err:#}"),
                    });
                }
            };

            let slot = DiskSlot {
                size,
                kind,
                created_ms,
                last_access_ms: AtomicU64::new(now_ms),
                seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
                integrity,
            };
            self.index.insert(key.clone(), Arc::new(slot));
            self.usage.add_saturating(size);
            self.access_index
                .lock()
                .await
                .insert_on_write(KeyDigest::from_key(key), now_ms);
            plan
        };

        self.maybe_flush_access_index(now_ms).await;
        Ok(plan)
    }

    pub async fn remove(&self, key: &ResourceKey) -> bool {
        let _guard = self.writer.lock().await;
        self.remove_locked(key).await
    }

    /// Remove `key` only if it is still expired once the writer lock is held.
    pub async fn remove_if_expired(&self, key: &ResourceKey, now_ms: u64) -> bool {
        let _guard = self.writer.lock().await;
        let expired = self
            .index
            .get(key)
            .is_some_and(|s| is_expired(s.created_ms, now_ms, self.expiry_ms));
        expired && self.remove_locked(key).await
    }

    pub async fn evict_expired(&self, now_ms: u64) -> usize {
        let removed = {
            let _guard = self.writer.lock().await;
            let expired: Vec<ResourceKey> = self
                .index
                .iter()
                .filter(|e| is_expired(e.value().created_ms, now_ms, self.expiry_ms))
                .map(|e| e.key().clone())
                .collect();
            let mut removed = 0;
            for key in &expired {
                if self.remove_locked(key).await {
                    removed += 1;
                }
            }
            removed
        };
        self.flush_access_index(now_ms).await;
        removed
    }

    pub async fn clear(&self, now_ms: u64) -> anyhow::Result<usize> {
        let count = {
            let _guard = self.writer.lock().await;
            let count = self.index.len();
            cacache::clear(&self.blobs).await?;
            tokio::fs::create_dir_all(&self.blobs).await?;
            self.index.clear();
            self.usage.store(0);
            self.access_index.lock().await.clear();
            count
        };
        self.flush_access_index(now_ms).await;
        Ok(count)
    }

    /// Persist pending access times regardless of the flush interval.
    pub async fn flush_access_index(&self, now_ms: u64) {
        let snapshot = self.access_index.lock().await.prepare_flush(now_ms);
        if let Some((path, bytes)) = snapshot {
            self.write_access_snapshot(path, bytes).await;
        }
    }

    async fn remove_slot(&self, key: &ResourceKey, slot: &Arc<DiskSlot>) {
        let _guard = self.writer.lock().await;
        let same = self
            .index
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current.value(), slot));
        if same {
            self.remove_locked(key).await;
        }
    }

    /// Caller holds `writer`.
    async fn remove_locked(&self, key: &ResourceKey) -> bool {
        let Some((_, slot)) = self.index.remove(key) else {
            return false;
        };
        let remover = cacache::index::RemoveOpts::new().remove_fully(false);
        if let Err(err) = remover.remove(&self.blobs, key.as_str()).await {
            warn!(key = %key.short(), "disk cache remove failed: {err}");
        }
        if !self.blob_shared(&slot.integrity)
            && let Err(err) =
                cacache::remove_hash(&self.blobs, &slot.integrity).await
        {
            warn!(key = %key.short(), "disk cache blob delete failed: {err}");
        }
        self.usage.sub_saturating(slot.size);
        self.access_index
            .lock()
            .await
            .remove(&KeyDigest::from_key(key));
        true
    }

    /// Whether any indexed key still references the blob `integrity`.
    fn blob_shared(&self, integrity: &Integrity) -> bool {
        self.index.iter().any(|e| e.value().integrity == *integrity)
    }

    async fn touch(&self, key: &ResourceKey, now_ms: u64) {
        let snapshot = {
            let mut guard = self.access_index.lock().await;
            guard.touch(KeyDigest::from_key(key), now_ms);
            if guard.should_flush(now_ms, self.flush_interval_ms, self.under_pressure()) {
                guard.prepare_flush(now_ms)
            } else {
                None
            }
        };
        if let Some((path, bytes)) = snapshot {
            self.write_access_snapshot(path, bytes).await;
        }
    }

    async fn maybe_flush_access_index(&self, now_ms: u64) {
        let snapshot = {
            let mut guard = self.access_index.lock().await;
            if guard.should_flush(now_ms, self.flush_interval_ms, self.under_pressure()) {
                guard.prepare_flush(now_ms)
            } else {
                None
            }
        };
        if let Some((path, bytes)) = snapshot {
            self.write_access_snapshot(path, bytes).await;
        }
    }

    async fn write_access_snapshot(&self, path: PathBuf, bytes: Vec<u8>) {
        let _guard = self.access_index_flush_lock.lock().await;
        let started = Instant::now();
        let path_for_write = path.clone();
        let result = tokio::task::spawn_blocking(move || {
            write_snapshot_sync(&path_for_write, &bytes)
        })
        .await;
        match result {
            Ok(Ok(())) => {
                self.stats.on_access_index_flush_ok();
                debug!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "disk cache access index flushed"
                );
            }
            Ok(Err(err)) => {
                self.stats.on_access_index_flush_err();
                warn!(
                    path = %path.display(),
                    "disk cache access index flush failed: {err}"
                );
                self.access_index.lock().await.mark_dirty();
            }
            Err(err) => {
                self.stats.on_access_index_flush_err();
                warn!("disk cache access index flush join failed: {err}");
                self.access_index.lock().await.mark_dirty();
            }
        }
    }

    fn under_pressure(&self) -> bool {
        self.budget > 0
            && self.usage.load().saturating_mul(100)
                >= self
                    .budget
                    .saturating_mul(constants::cache::PRESSURE_PERCENT)
    }
}

async fn write_entry(
    blobs: &Path,
    key: &ResourceKey,
    bytes: &[u8],
    metadata: &EntryMetadata,
) -> anyhow::Result<Integrity> {
    let metadata = serde_json::to_value(metadata)?;
    let mut writer = cacache::WriteOpts::new()
        .size(bytes.len())
        .metadata(metadata)
        .open(blobs, key.as_str())
        .await?;
    writer.write_all(bytes).await?;
    Ok(writer.commit().await?)
}
