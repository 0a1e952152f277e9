use std::{
    sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
    time::Instant,
};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tootles_model::{Priority, ResourceKey};

use crate::{cache::Payload, error::FetchError};

pub(crate) type FetchOutcome = Result<Payload, FetchError>;

/// In-flight fetch for one resource key, shared by all of its waiters.
///
/// `waiters` only changes while the loader's task map lock is held, which is
/// what makes "last waiter leaves" and "new waiter joins" mutually exclusive.
#[derive(Debug)]
pub(crate) struct FetchTask {
    pub id: u64,
    pub key: ResourceKey,
    pub started: Instant,
    attempts: AtomicU32,
    waiters: AtomicUsize,
    priority: Mutex<Priority>,
    cancel: CancellationToken,
    invalidated: AtomicBool,
    finished: AtomicBool,
    outcome: watch::Sender<Option<FetchOutcome>>,
}

impl FetchTask {
    pub fn new(id: u64, key: ResourceKey, priority: Priority) -> Self {
        let (outcome, _) = watch::channel(None);
        Self {
            id,
            key,
            started: Instant::now(),
            attempts: AtomicU32::new(0),
            waiters: AtomicUsize::new(0),
            priority: Mutex::new(priority),
            cancel: CancellationToken::new(),
            invalidated: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            outcome,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<FetchOutcome>> {
        self.outcome.subscribe()
    }

    pub fn add_waiter(&self) -> usize {
        self.waiters.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn remove_waiter(&self) -> usize {
        self.waiters.fetch_sub(1, Ordering::AcqRel).saturating_sub(1)
    }

    pub fn waiters(&self) -> usize {
        self.waiters.load(Ordering::Acquire)
    }

    pub fn next_attempt(&self) -> u32 {
        self.attempts.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Acquire)
    }

    pub fn priority(&self) -> Priority {
        *self.priority.lock()
    }

    /// Returns true when the priority actually went up.
    pub fn raise_priority(&self, priority: Priority) -> bool {
        let mut current = self.priority.lock();
        let raised = current.max(priority);
        let changed = raised != *current;
        *current = raised;
        changed
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancel and forbid the cache write-through, even if the bytes already
    /// arrived.
    pub fn invalidate(&self) {
        self.invalidated.store(true, Ordering::Release);
        self.cancel.cancel();
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated.load(Ordering::Acquire)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Resolve every waiter exactly once.
    pub fn resolve(&self, outcome: FetchOutcome) {
        if self.finished.swap(true, Ordering::AcqRel) {
            return;
        }
        self.outcome.send_replace(Some(outcome));
    }
}
