use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tootles_model::{MediaRef, Priority, ResourceKey, Tier};
use tracing::{debug, info};

use crate::{
    cache::{CacheStatsSnapshot, MediaCache, Payload, Ticket},
    clock::{SharedClock, SystemClock},
    config::MediaConfig,
    error::{FetchError, MediaError, Result},
    loader::{Fetcher, HttpFetcher, LoaderStatsSnapshot, MediaLoader},
    render::{Deferred, Presentation, RenderOutcome, Renderer},
    sweep::SweepHandle,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerStats {
    pub cache: CacheStatsSnapshot,
    pub loader: LoaderStatsSnapshot,
}

/// A batch of ahead-of-scroll fetches.
///
/// Dropping the batch leaves the fetches running; [`PreloadBatch::cancel`]
/// withdraws them. A fetch that a foreground request also waits on keeps
/// going for that request.
#[derive(Debug)]
pub struct PreloadBatch {
    token: CancellationToken,
    keys: Vec<ResourceKey>,
}

impl PreloadBatch {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Keys that were scheduled (cached ones are skipped).
    pub fn keys(&self) -> &[ResourceKey] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// The entry point for the UI: cache, loader and renderer behind one API.
#[derive(Debug)]
pub struct MediaManager {
    config: MediaConfig,
    cache: Arc<MediaCache>,
    loader: MediaLoader,
    renderer: Renderer,
    sweep: Mutex<Option<SweepHandle>>,
}

impl MediaManager {
    /// Production wiring: HTTP fetcher, system clock and a running sweep.
    pub async fn new(config: MediaConfig) -> Result<Self> {
        let fetcher =
            HttpFetcher::new(&config.loader).map_err(MediaError::Fetch)?;
        let manager =
            Self::with_parts(config, Arc::new(fetcher), Arc::new(SystemClock))
                .await?;
        manager.start_sweep();
        Ok(manager)
    }

    /// Wire the manager with a custom fetcher and clock. No sweep is started.
    pub async fn with_parts(
        config: MediaConfig,
        fetcher: Arc<dyn Fetcher>,
        clock: SharedClock,
    ) -> Result<Self> {
        let cache = Arc::new(MediaCache::open_with_clock(&config, clock).await?);
        let loader =
            MediaLoader::new(fetcher, Arc::clone(&cache), config.loader.clone());
        let renderer = Renderer::from_config(&config);
        info!(
            root = %config.cache_root.display(),
            memory_budget = %config.memory_budget,
            disk_budget = %config.disk_budget,
            previews_enabled = config.previews_enabled,
            "media manager ready"
        );
        Ok(Self {
            config,
            cache,
            loader,
            renderer,
            sweep: Mutex::new(None),
        })
    }

    /// Start the periodic expiry sweep if it is not running.
    pub fn start_sweep(&self) -> bool {
        let mut sweep = self.sweep.lock();
        if sweep.as_ref().is_some_and(|s| !s.is_cancelled()) {
            return false;
        }
        *sweep =
            SweepHandle::spawn(Arc::clone(&self.cache), self.config.sweep_interval);
        sweep.is_some()
    }

    pub fn stop_sweep(&self) {
        if let Some(sweep) = self.sweep.lock().take() {
            sweep.cancel();
        }
    }

    /// Cached thumbnail, then memory, then disk, then the network; the
    /// result is rendered.
    ///
    /// Media failures never surface as errors: they come back as a
    /// `Deferred` placeholder (or `Failed` for corrupt payloads). Inline
    /// renders leave their thumbnail in the memory tier so the next request
    /// skips decoding.
    pub async fn get_preview(&self, media: &MediaRef) -> RenderOutcome {
        if !self.config.previews_enabled {
            return self.renderer.disabled(media);
        }

        let key = media.key();
        let ticket = self.cache.ticket(key);
        let inline = self.renderer.renders_inline(media.kind());
        if inline
            && let Some(entry) = self.cache.get_thumbnail(key)
            && let Some(outcome) =
                self.renderer.render_cached_thumbnail(media, &entry.bytes)
        {
            debug!(key = %key.short(), "preview served from thumbnail");
            return outcome;
        }

        let (bytes, kind, created_ms) = match self.cache.lookup(key).await {
            Some(entry) => {
                debug!(key = %key.short(), tier = %entry.tier, "preview cached");
                (entry.bytes, entry.kind, Some(entry.created_ms))
            }
            None => {
                let fetched =
                    self.loader.fetch_bytes(media, Priority::Foreground).await;
                match fetched {
                    Ok(bytes) => (bytes, media.kind(), None),
                    Err(err) => return self.fetch_failed(media, &err),
                }
            }
        };
        let outcome = self.renderer.render(media, bytes, kind).await;

        if !inline {
            return outcome;
        }
        self.remember_thumbnail(key, ticket, created_ms, outcome)
    }

    /// Keep the thumbnail of an inline render, now or once a deferred
    /// decode finishes.
    fn remember_thumbnail(
        &self,
        key: &ResourceKey,
        ticket: Ticket,
        created_ms: Option<u64>,
        outcome: RenderOutcome,
    ) -> RenderOutcome {
        match outcome {
            RenderOutcome::Deferred(Deferred {
                placeholder,
                retry_after,
                pending: Some(pending),
            }) => {
                let cache = Arc::clone(&self.cache);
                let key = key.clone();
                let pending = pending.inspect(move |outcome| {
                    store_thumbnail(&cache, &key, ticket, created_ms, outcome)
                });
                RenderOutcome::Deferred(Deferred {
                    placeholder,
                    retry_after,
                    pending: Some(pending),
                })
            }
            outcome => {
                store_thumbnail(&self.cache, key, ticket, created_ms, &outcome);
                outcome
            }
        }
    }

    fn fetch_failed(&self, media: &MediaRef, err: &FetchError) -> RenderOutcome {
        debug!(key = %media.key().short(), "preview unavailable: {err}");
        self.renderer.fetch_failed(media, err)
    }

    /// Warm the cache for `refs` at preload priority without blocking.
    pub fn preload<I>(&self, refs: I) -> PreloadBatch
    where
        I: IntoIterator<Item = MediaRef>,
    {
        let token = CancellationToken::new();
        let mut keys = Vec::new();
        if !self.config.previews_enabled {
            return PreloadBatch { token, keys };
        }

        for media in refs {
            let key = media.key();
            if self.cache.contains(key, Tier::Memory)
                || self.cache.contains(key, Tier::Disk)
            {
                continue;
            }
            keys.push(key.clone());
            let handle = self.loader.fetch(&media, Priority::Preload);
            let cancelled = token.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancelled.cancelled() => {
                        debug!(key = %media.key().short(), "preload withdrawn");
                    }
                    result = handle.wait() => {
                        if let Err(err) = result {
                            debug!(key = %media.key().short(), "preload failed: {err}");
                        }
                    }
                }
            });
        }
        debug!(scheduled = keys.len(), "preload batch scheduled");
        PreloadBatch { token, keys }
    }

    /// Forget `media`: cancel its in-flight fetch and drop both tiers.
    pub async fn invalidate(&self, media: &MediaRef) -> bool {
        self.invalidate_key(media.key()).await
    }

    pub async fn invalidate_key(&self, key: &ResourceKey) -> bool {
        let cancelled = self.loader.cancel(key);
        let removed = self.cache.invalidate(key).await;
        cancelled || removed
    }

    /// Wipe both tiers and cancel everything in flight.
    pub async fn clear_cache(&self) -> Result<usize> {
        let cancelled = self.loader.cancel_all();
        let removed = self.cache.clear().await?;
        info!(cancelled, removed, "media cache cleared by request");
        Ok(removed)
    }

    pub async fn evict_expired(&self) -> usize {
        self.cache.evict_expired().await
    }

    pub fn stats(&self) -> ManagerStats {
        ManagerStats {
            cache: self.cache.stats(),
            loader: self.loader.stats(),
        }
    }

    pub fn config(&self) -> &MediaConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<MediaCache> {
        &self.cache
    }

    pub fn loader(&self) -> &MediaLoader {
        &self.loader
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    /// Stop the sweep and persist access times.
    pub async fn shutdown(&self) {
        let sweep = self.sweep.lock().take();
        if let Some(sweep) = sweep {
            sweep.stop().await;
        }
        self.cache.flush().await;
    }
}

fn store_thumbnail(
    cache: &MediaCache,
    key: &ResourceKey,
    ticket: Ticket,
    created_ms: Option<u64>,
    outcome: &RenderOutcome,
) {
    let RenderOutcome::Rendered(Presentation::Inline(image)) = outcome else {
        return;
    };
    let blob = Payload::from(image.to_cached_bytes());
    match cache.put_thumbnail(key, blob, created_ms, ticket) {
        Ok(_) => debug!(key = %key.short(), "thumbnail cached"),
        Err(err) => debug!(key = %key.short(), "thumbnail not cached: {err}"),
    }
}
