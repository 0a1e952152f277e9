use std::sync::atomic::{AtomicU64, Ordering};

use tootles_model::Tier;

use crate::units::ByteSize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierStatsSnapshot {
    pub resident_bytes: ByteSize,
    pub budget: ByteSize,
    pub entries: u64,
    pub hits: u64,
    pub misses: u64,
    pub expired: u64,
    pub evicted_for_budget: u64,
    pub rejected_oversize: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    pub memory: TierStatsSnapshot,
    pub disk: TierStatsSnapshot,
    pub promotions: u64,
    pub write_failures: u64,
    pub corrupt_reads: u64,
    pub access_index_flushes: u64,
    pub access_index_flush_errors: u64,
    pub sweeps: u64,
    pub last_sweep_duration_ms: u64,
}

impl CacheStatsSnapshot {
    pub fn tier(&self, tier: Tier) -> &TierStatsSnapshot {
        match tier {
            Tier::Memory => &self.memory,
            Tier::Disk => &self.disk,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct TierStats {
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
    evicted_for_budget: AtomicU64,
    rejected_oversize: AtomicU64,
}

impl TierStats {
    pub fn on_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_expired(&self, count: u64) {
        self.expired.fetch_add(count, Ordering::Relaxed);
    }

    pub fn on_evicted_for_budget(&self, count: u64) {
        self.evicted_for_budget.fetch_add(count, Ordering::Relaxed);
    }

    pub fn on_rejected_oversize(&self) {
        self.rejected_oversize.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(
        &self,
        resident_bytes: ByteSize,
        budget: ByteSize,
        entries: u64,
    ) -> TierStatsSnapshot {
        TierStatsSnapshot {
            resident_bytes,
            budget,
            entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            evicted_for_budget: self.evicted_for_budget.load(Ordering::Relaxed),
            rejected_oversize: self.rejected_oversize.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct CacheStats {
    pub memory: TierStats,
    pub disk: TierStats,
    promotions: AtomicU64,
    write_failures: AtomicU64,
    corrupt_reads: AtomicU64,
    access_index_flushes: AtomicU64,
    access_index_flush_errors: AtomicU64,
    sweeps: AtomicU64,
    last_sweep_duration_ms: AtomicU64,
}

impl CacheStats {
    pub fn tier(&self, tier: Tier) -> &TierStats {
        match tier {
            Tier::Memory => &self.memory,
            Tier::Disk => &self.disk,
        }
    }

    pub fn on_promotion(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_write_failure(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_corrupt_read(&self) {
        self.corrupt_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_access_index_flush_ok(&self) {
        self.access_index_flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_access_index_flush_err(&self) {
        self.access_index_flush_errors
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn on_sweep_finished(&self, duration_ms: u64) {
        self.sweeps.fetch_add(1, Ordering::Relaxed);
        self.last_sweep_duration_ms
            .store(duration_ms, Ordering::Relaxed);
    }

    pub fn snapshot(
        &self,
        memory: TierStatsSnapshot,
        disk: TierStatsSnapshot,
    ) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            memory,
            disk,
            promotions: self.promotions.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            corrupt_reads: self.corrupt_reads.load(Ordering::Relaxed),
            access_index_flushes: self
                .access_index_flushes
                .load(Ordering::Relaxed),
            access_index_flush_errors: self
                .access_index_flush_errors
                .load(Ordering::Relaxed),
            sweeps: self.sweeps.load(Ordering::Relaxed),
            last_sweep_duration_ms: self
                .last_sweep_duration_ms
                .load(Ordering::Relaxed),
        }
    }
}
