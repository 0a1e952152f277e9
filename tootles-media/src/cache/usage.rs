use std::sync::atomic::{AtomicU64, Ordering};

/// Resident byte counter of one tier.
///
/// Only mutated while the tier's writer lock is held; readers may observe it
/// at any time.
#[derive(Debug, Default)]
pub(crate) struct UsageBytes(AtomicU64);

impl UsageBytes {
    pub fn new(initial: u64) -> Self {
        Self(AtomicU64::new(initial))
    }

    pub fn load(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    pub fn store(&self, value: u64) {
        self.0.store(value, Ordering::Release);
    }

    pub fn add_saturating(&self, add: u64) {
        let mut current = self.load();
        loop {
            let next = current.saturating_add(add);
            match self.0.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn sub_saturating(&self, sub: u64) {
        let mut current = self.load();
        loop {
            let next = current.saturating_sub(sub);
            match self.0.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }
}
