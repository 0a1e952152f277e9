use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tootles_model::ResourceKey;

/// Snapshot of a key's write generation, taken before its bytes are read or
/// fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Ticket {
    epoch: u64,
    key: u64,
}

/// Write generations per key.
///
/// Invalidation bumps the key (clearing bumps the epoch) before any tier is
/// emptied. Writers check their ticket under the tier's writer lock, so a
/// fetch or promotion that started before the invalidation cannot store its
/// bytes afterwards.
#[derive(Debug, Default)]
pub(crate) struct Generations {
    epoch: AtomicU64,
    keys: DashMap<ResourceKey, u64>,
}

impl Generations {
    pub fn ticket(&self, key: &ResourceKey) -> Ticket {
        let epoch = self.epoch.load(Ordering::Acquire);
        let key = self.keys.get(key).map_or(0, |g| *g.value());
        Ticket { epoch, key }
    }

    pub fn is_current(&self, key: &ResourceKey, ticket: Ticket) -> bool {
        self.ticket(key) == ticket
    }

    pub fn bump(&self, key: &ResourceKey) {
        *self.keys.entry(key.clone()).or_insert(0) += 1;
    }

    /// Invalidate every outstanding ticket.
    ///
    /// Per-key counters are kept: resetting them could hand out a ticket
    /// equal to one issued before the clear.
    pub fn bump_all(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::Generations;
    use tootles_model::ResourceKey;

    fn key(name: &str) -> ResourceKey {
        ResourceKey::parse_url(&format!("https://x.test/{name}")).unwrap().1
    }

    #[test]
    fn bump_only_stales_that_key() {
        let generations = Generations::default();
        let a = generations.ticket(&key("a"));
        let b = generations.ticket(&key("b"));
        generations.bump(&key("a"));
        assert!(!generations.is_current(&key("a"), a));
        assert!(generations.is_current(&key("b"), b));
        let fresh = generations.ticket(&key("a"));
        assert!(generations.is_current(&key("a"), fresh));
    }

    #[test]
    fn bump_all_stales_every_ticket() {
        let generations = Generations::default();
        generations.bump(&key("a"));
        let a = generations.ticket(&key("a"));
        let b = generations.ticket(&key("b"));
        generations.bump_all();
        assert!(!generations.is_current(&key("a"), a));
        assert!(!generations.is_current(&key("b"), b));
    }
}
