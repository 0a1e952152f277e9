//! Deduplicated, cancellable media fetches.
//!
//! At most one [`FetchTask`] exists per [`ResourceKey`]. Every caller gets a
//! [`FetchHandle`]; the task is cancelled once the last handle is dropped.
//! Successful bytes are written through the cache before any waiter sees
//! them, unless the key was invalidated after the fetch started.

mod http;
mod retry;
mod scheduler;
mod task;

pub use http::HttpFetcher;

use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tootles_model::{MediaKind, MediaRef, Priority, ResourceKey, Tier};
use tracing::{debug, warn};
use url::Url;

use crate::{
    cache::{MediaCache, Payload, Ticket},
    config::LoaderSettings,
    error::{CacheError, FetchError},
    units::ByteSize,
};
use retry::Backoff;
use scheduler::PriorityGate;
use task::{FetchOutcome, FetchTask};

/// Retrieves raw bytes for a URL.
///
/// Implementations perform a single attempt; retries, timeouts and
/// deduplication belong to [`MediaLoader`].
#[async_trait]
pub trait Fetcher: Send + Sync + fmt::Debug {
    async fn fetch(&self, url: &Url, limit: ByteSize) -> Result<Vec<u8>, FetchError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoaderStatsSnapshot {
    pub fetches_started: u64,
    pub deduplicated_waiters: u64,
    pub retries: u64,
    pub cancellations: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub in_flight: u64,
    pub running: u64,
    pub queued: u64,
}

#[derive(Debug, Default)]
struct LoaderStats {
    fetches_started: AtomicU64,
    deduplicated_waiters: AtomicU64,
    retries: AtomicU64,
    cancellations: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

impl LoaderStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

struct LoaderInner {
    fetcher: Arc<dyn Fetcher>,
    cache: Arc<MediaCache>,
    settings: LoaderSettings,
    tasks: Mutex<HashMap<ResourceKey, Arc<FetchTask>>>,
    gate: PriorityGate,
    next_task_id: AtomicU64,
    stats: LoaderStats,
}

#[derive(Clone)]
pub struct MediaLoader {
    inner: Arc<LoaderInner>,
}

impl fmt::Debug for MediaLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaLoader")
            .field("fetcher", &self.inner.fetcher)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl MediaLoader {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        cache: Arc<MediaCache>,
        settings: LoaderSettings,
    ) -> Self {
        let gate =
            PriorityGate::new(settings.max_concurrent, settings.foreground_reserved);
        Self {
            inner: Arc::new(LoaderInner {
                fetcher,
                cache,
                settings,
                tasks: Mutex::new(HashMap::new()),
                gate,
                next_task_id: AtomicU64::new(1),
                stats: LoaderStats::default(),
            }),
        }
    }

    /// Join the in-flight fetch for `media`, or start one.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn fetch(&self, media: &MediaRef, priority: Priority) -> FetchHandle {
        let key = media.key();
        let mut tasks = self.inner.tasks.lock();

        if let Some(task) = tasks.get(key)
            && !task.is_cancelled()
        {
            let task = Arc::clone(task);
            task.add_waiter();
            drop(tasks);
            LoaderStats::bump(&self.inner.stats.deduplicated_waiters);
            if task.raise_priority(priority) && self.inner.gate.promote(task.id, priority)
            {
                debug!(key = %key.short(), "queued preload promoted to foreground");
            }
            debug!(key = %key.short(), waiters = task.waiters(), "joined in-flight fetch");
            return FetchHandle::new(Arc::clone(&self.inner), task);
        }

        let id = self.inner.next_task_id.fetch_add(1, Ordering::Relaxed);
        let task = Arc::new(FetchTask::new(id, key.clone(), priority));
        task.add_waiter();
        tasks.insert(key.clone(), Arc::clone(&task));
        drop(tasks);

        LoaderStats::bump(&self.inner.stats.fetches_started);
        debug!(key = %key.short(), ?priority, url = %media.url(), "fetch started");

        let ticket = self.inner.cache.ticket(key);
        let handle = FetchHandle::new(Arc::clone(&self.inner), Arc::clone(&task));
        tokio::spawn(drive(
            Arc::clone(&self.inner),
            task,
            media.url().clone(),
            media.kind(),
            ticket,
        ));
        handle
    }

    /// Fetch and wait in one call.
    pub async fn fetch_bytes(
        &self,
        media: &MediaRef,
        priority: Priority,
    ) -> Result<Payload, FetchError> {
        self.fetch(media, priority).wait().await
    }

    /// Cancel the in-flight fetch for `key`, if any. Its waiters resolve with
    /// [`FetchError::Cancelled`] and nothing is written to the cache.
    pub fn cancel(&self, key: &ResourceKey) -> bool {
        let task = self.inner.tasks.lock().remove(key);
        match task {
            Some(task) => {
                task.invalidate();
                LoaderStats::bump(&self.inner.stats.cancellations);
                debug!(key = %key.short(), "in-flight fetch invalidated");
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) -> usize {
        let drained: Vec<_> = self.inner.tasks.lock().drain().collect();
        for (_, task) in &drained {
            task.invalidate();
            LoaderStats::bump(&self.inner.stats.cancellations);
        }
        drained.len()
    }

    pub fn is_in_flight(&self, key: &ResourceKey) -> bool {
        self.inner.tasks.lock().contains_key(key)
    }

    pub fn in_flight(&self) -> usize {
        self.inner.tasks.lock().len()
    }

    pub fn cache(&self) -> &Arc<MediaCache> {
        &self.inner.cache
    }

    pub fn stats(&self) -> LoaderStatsSnapshot {
        let s = &self.inner.stats;
        LoaderStatsSnapshot {
            fetches_started: s.fetches_started.load(Ordering::Relaxed),
            deduplicated_waiters: s.deduplicated_waiters.load(Ordering::Relaxed),
            retries: s.retries.load(Ordering::Relaxed),
            cancellations: s.cancellations.load(Ordering::Relaxed),
            succeeded: s.succeeded.load(Ordering::Relaxed),
            failed: s.failed.load(Ordering::Relaxed),
            in_flight: self.in_flight() as u64,
            running: self.inner.gate.running() as u64,
            queued: self.inner.gate.queued() as u64,
        }
    }
}

/// One caller's interest in an in-flight fetch.
///
/// Dropping the handle withdraws that interest; when no handles remain the
/// underlying fetch is cancelled and its partial bytes discarded.
pub struct FetchHandle {
    inner: Arc<LoaderInner>,
    task: Arc<FetchTask>,
    rx: watch::Receiver<Option<FetchOutcome>>,
}

impl fmt::Debug for FetchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchHandle")
            .field("key", &self.task.key.short())
            .field("task", &self.task.id)
            .finish()
    }
}

impl FetchHandle {
    fn new(inner: Arc<LoaderInner>, task: Arc<FetchTask>) -> Self {
        let rx = task.subscribe();
        Self { inner, task, rx }
    }

    pub fn key(&self) -> &ResourceKey {
        &self.task.key
    }

    /// Attempts made so far by the shared task.
    pub fn attempts(&self) -> u32 {
        self.task.attempts()
    }

    pub async fn wait(mut self) -> Result<Payload, FetchError> {
        match self.rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone().unwrap_or(Err(FetchError::Cancelled)),
            Err(_) => Err(FetchError::Cancelled),
        }
    }
}

impl Drop for FetchHandle {
    fn drop(&mut self) {
        self.inner.release(&self.task);
    }
}

impl LoaderInner {
    fn release(&self, task: &Arc<FetchTask>) {
        let mut tasks = self.tasks.lock();
        let remaining = task.remove_waiter();
        if remaining > 0 || task.is_finished() || task.is_cancelled() {
            return;
        }
        if tasks
            .get(&task.key)
            .is_some_and(|current| Arc::ptr_eq(current, task))
        {
            tasks.remove(&task.key);
        }
        drop(tasks);
        task.cancel();
        LoaderStats::bump(&self.stats.cancellations);
        debug!(key = %task.key.short(), "last waiter left; fetch cancelled");
    }

    async fn run(&self, task: &FetchTask, url: &Url) -> FetchOutcome {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(FetchError::UnsupportedScheme(url.scheme().to_string()));
        }

        let max_attempts = self.settings.max_attempts.max(1);
        let limit = self.settings.max_response_bytes;
        let timeout = self.settings.attempt_timeout;
        let mut backoff =
            Backoff::new(self.settings.initial_backoff, self.settings.max_backoff);

        loop {
            let permit = self.gate.acquire(task.id, task.priority()).await;
            let attempt = task.next_attempt();
            let result =
                match tokio::time::timeout(timeout, self.fetcher.fetch(url, limit)).await {
                    Ok(result) => result,
                    Err(_) => Err(FetchError::Timeout(timeout)),
                };
            drop(permit);

            match result {
                Ok(bytes) => return Ok(Payload::from(bytes)),
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    LoaderStats::bump(&self.stats.retries);
                    let delay = backoff.next_delay();
                    warn!(
                        key = %task.key.short(),
                        attempt,
                        max_attempts,
                        ?delay,
                        "fetch failed, retrying: {err}"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn write_through(
        &self,
        key: &ResourceKey,
        bytes: &Payload,
        kind: MediaKind,
        ticket: Ticket,
    ) {
        for tier in [Tier::Disk, Tier::Memory] {
            let stored = self
                .cache
                .put_if_current(key, Arc::clone(bytes), kind, tier, ticket)
                .await;
            match stored {
                Ok(stored) if stored.tier != tier => {
                    // Disk write fell back to memory; nothing more to do.
                    return;
                }
                Ok(_) => {}
                Err(err @ CacheError::BudgetExceeded { .. }) => {
                    debug!(key = %key.short(), %tier, "serving uncached: {err}");
                }
                Err(err @ CacheError::Superseded { .. }) => {
                    debug!(key = %key.short(), "{err}");
                    return;
                }
                Err(err) => {
                    warn!(key = %key.short(), %tier, "cache write failed: {err}");
                }
            }
        }
    }

    fn finish(&self, task: &Arc<FetchTask>, outcome: FetchOutcome) {
        {
            let mut tasks = self.tasks.lock();
            if tasks
                .get(&task.key)
                .is_some_and(|current| Arc::ptr_eq(current, task))
            {
                tasks.remove(&task.key);
            }
        }

        let elapsed_ms = task.started.elapsed().as_millis() as u64;
        match &outcome {
            Ok(bytes) => {
                LoaderStats::bump(&self.stats.succeeded);
                debug!(
                    key = %task.key.short(),
                    bytes = bytes.len(),
                    attempts = task.attempts(),
                    elapsed_ms,
                    "fetch completed"
                );
            }
            Err(FetchError::Cancelled) => {
                debug!(key = %task.key.short(), elapsed_ms, "fetch cancelled");
            }
            Err(err) => {
                LoaderStats::bump(&self.stats.failed);
                warn!(
                    key = %task.key.short(),
                    attempts = task.attempts(),
                    elapsed_ms,
                    "fetch failed: {err}"
                );
            }
        }
        task.resolve(outcome);
    }
}

async fn drive(
    inner: Arc<LoaderInner>,
    task: Arc<FetchTask>,
    url: Url,
    kind: MediaKind,
    ticket: Ticket,
) {
    let outcome = tokio::select! {
        biased;
        _ = task.cancel_token().cancelled() => Err(FetchError::Cancelled),
        result = inner.run(&task, &url) => result,
    };

    if let Ok(bytes) = &outcome
        && !task.is_invalidated()
    {
        inner.write_through(&task.key, bytes, kind, ticket).await;
    }
    inner.finish(&task, outcome);
}
