use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use parking_lot::Mutex;
use tootles_model::{MediaKind, ResourceKey, Tier};

use super::{
    entry::{CacheEntry, Payload},
    eviction::{EntryInfo, EvictionPlan, is_expired, plan_evictions},
    usage::UsageBytes,
};
use crate::{clock::duration_ms, error::CacheError, units::ByteSize};

#[derive(Debug)]
struct Slot {
    bytes: Payload,
    kind: MediaKind,
    created_ms: u64,
    last_access_ms: AtomicU64,
    seq: u64,
}

impl Slot {
    fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

pub(crate) enum Lookup {
    Hit(CacheEntry),
    Expired,
    Miss,
}

/// Bounded in-process tier.
///
/// Reads go straight to the concurrent map. Every mutation takes `writer`, so
/// eviction and the usage counter stay consistent with each other and the
/// budget holds whenever the lock is released.
#[derive(Debug)]
pub(crate) struct MemoryTier {
    entries: DashMap<ResourceKey, Arc<Slot>>,
    writer: Mutex<()>,
    usage: UsageBytes,
    budget: u64,
    expiry_ms: u64,
    next_seq: AtomicU64,
}

impl MemoryTier {
    pub fn new(budget: ByteSize, expiry: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            writer: Mutex::new(()),
            usage: UsageBytes::default(),
            budget: budget.as_bytes(),
            expiry_ms: duration_ms(expiry),
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &ResourceKey, now_ms: u64) -> Lookup {
        let Some(slot) = self.entries.get(key).map(|s| Arc::clone(s.value()))
        else {
            return Lookup::Miss;
        };

        if is_expired(slot.created_ms, now_ms, self.expiry_ms) {
            self.remove_slot(key, &slot);
            return Lookup::Expired;
        }

        slot.last_access_ms.fetch_max(now_ms, Ordering::AcqRel);
        Lookup::Hit(CacheEntry {
            key: key.clone(),
            bytes: Arc::clone(&slot.bytes),
            kind: slot.kind,
            size: ByteSize::from_bytes(slot.size()),
            created_ms: slot.created_ms,
            last_access_ms: now_ms,
            tier: Tier::Memory,
        })
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert or replace `key`, evicting until it fits.
    ///
    /// Nothing changes if `still_current` is false once the writer lock is
    /// held.
    pub fn insert(
        &self,
        key: &ResourceKey,
        bytes: Payload,
        kind: MediaKind,
        created_ms: u64,
        now_ms: u64,
        still_current: impl Fn() -> bool,
    ) -> Result<EvictionPlan, CacheError> {
        let size = bytes.len() as u64;
        if size > self.budget {
            return Err(CacheError::BudgetExceeded {
                size: ByteSize::from_bytes(size),
                budget: ByteSize::from_bytes(self.budget),
            });
        }

        let _guard = self.writer.lock();
        if !still_current() {
            return Err(CacheError::Superseded { key: key.clone() });
        }

        if let Some((_, old)) = self.entries.remove(key) {
            self.usage.sub_saturating(old.size());
        }

        let infos = self
            .entries
            .iter()
            .map(|e| EntryInfo {
                key: e.key().clone(),
                size_bytes: e.value().size(),
                created_ms: e.value().created_ms,
                last_access_ms: e.value().last_access_ms.load(Ordering::Acquire),
                seq: e.value().seq,
            })
            .collect();
        let plan =
            plan_evictions(infos, now_ms, self.expiry_ms, self.budget, size);
        for planned in &plan.planned {
            if let Some((_, old)) = self.entries.remove(&planned.key) {
                self.usage.sub_saturating(old.size());
            }
        }

        let slot = Slot {
            bytes,
            kind,
            created_ms,
            last_access_ms: AtomicU64::new(now_ms),
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
        };
        self.entries.insert(key.clone(), Arc::new(slot));
        self.usage.add_saturating(size);

        debug_assert!(self.usage.load() <= self.budget);
        Ok(plan)
    }

    pub fn remove(&self, key: &ResourceKey) -> bool {
        let _guard = self.writer.lock();
        match self.entries.remove(key) {
            Some((_, old)) => {
                self.usage.sub_saturating(old.size());
                true
            }
            None => false,
        }
    }

    pub fn evict_expired(&self, now_ms: u64) -> usize {
        let _guard = self.writer.lock();
        let expired: Vec<ResourceKey> = self
            .entries
            .iter()
            .filter(|e| is_expired(e.value().created_ms, now_ms, self.expiry_ms))
            .map(|e| e.key().clone())
            .collect();
        for key in &expired {
            if let Some((_, old)) = self.entries.remove(key) {
                self.usage.sub_saturating(old.size());
            }
        }
        expired.len()
    }

    pub fn clear(&self) -> usize {
        let _guard = self.writer.lock();
        let count = self.entries.len();
        self.entries.clear();
        self.usage.store(0);
        count
    }

    pub fn usage(&self) -> ByteSize {
        ByteSize::from_bytes(self.usage.load())
    }

    pub fn budget(&self) -> ByteSize {
        ByteSize::from_bytes(self.budget)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    fn remove_slot(&self, key: &ResourceKey, slot: &Arc<Slot>) {
        let _guard = self.writer.lock();
        if let Some((_, old)) =
            self.entries.remove_if(key, |_, current| Arc::ptr_eq(current, slot))
        {
            self.usage.sub_saturating(old.size());
        }
    }
}
