use tootles_model::ResourceKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    Expired,
    OverBudget,
}

#[derive(Debug, Clone)]
pub struct EntryInfo {
    pub key: ResourceKey,
    pub size_bytes: u64,
    pub created_ms: u64,
    pub last_access_ms: u64,
    /// Insertion order, breaks last-access ties.
    pub seq: u64,
}

#[derive(Debug, Clone)]
pub struct PlannedEviction {
    pub key: ResourceKey,
    pub size_bytes: u64,
    pub reason: EvictionReason,
}

#[derive(Debug, Default)]
pub struct EvictionPlan {
    pub planned: Vec<PlannedEviction>,
    pub total_bytes_before: u64,
    pub total_bytes_after: u64,
    pub removed_expired: usize,
    pub removed_budget: usize,
}

/// Decide which entries must go so that `incoming_bytes` fits in
/// `max_bytes`.
///
/// Expired entries (age since creation above `expiry_ms`) go first, then the
/// least recently accessed ones. `expiry_ms == 0` disables expiry.
pub fn plan_evictions(
    mut entries: Vec<EntryInfo>,
    now_ms: u64,
    expiry_ms: u64,
    max_bytes: u64,
    incoming_bytes: u64,
) -> EvictionPlan {
    let mut plan = EvictionPlan::default();

    let mut total_bytes: u64 = entries.iter().map(|e| e.size_bytes).sum();
    plan.total_bytes_before = total_bytes;

    let mut kept: Vec<EntryInfo> = Vec::with_capacity(entries.len());
    for e in entries.drain(..) {
        if is_expired(e.created_ms, now_ms, expiry_ms) {
            total_bytes = total_bytes.saturating_sub(e.size_bytes);
            plan.planned.push(PlannedEviction {
                key: e.key,
                size_bytes: e.size_bytes,
                reason: EvictionReason::Expired,
            });
            plan.removed_expired += 1;
        } else {
            kept.push(e);
        }
    }

    if total_bytes.saturating_add(incoming_bytes) > max_bytes {
        kept.sort_by_key(|e| (e.last_access_ms, e.seq));
        for e in kept {
            if total_bytes.saturating_add(incoming_bytes) <= max_bytes {
                break;
            }
            total_bytes = total_bytes.saturating_sub(e.size_bytes);
            plan.planned.push(PlannedEviction {
                key: e.key,
                size_bytes: e.size_bytes,
                reason: EvictionReason::OverBudget,
            });
            plan.removed_budget += 1;
        }
    }

    plan.total_bytes_after = total_bytes;
    plan
}

/// An entry is served while its age is at most `expiry_ms`.
pub fn is_expired(created_ms: u64, now_ms: u64, expiry_ms: u64) -> bool {
    expiry_ms > 0 && now_ms.saturating_sub(created_ms) > expiry_ms
}
