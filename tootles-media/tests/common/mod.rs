#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    io::Cursor,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use image::{ImageBuffer, ImageFormat, Rgba};
use parking_lot::Mutex;
use tokio::sync::watch;
use tootles_media::{
    ByteSize, FetchError, Fetcher, ManualClock, MediaConfig, MediaKind, MediaManager,
    MediaRef, ResourceKey, ViewerMap,
};
use url::Url;

pub const START_MS: u64 = 1_700_000_000_000;

/// In-memory fetcher with scripted failures and a hold switch.
#[derive(Debug)]
pub struct ScriptedFetcher {
    bodies: Mutex<HashMap<String, Vec<u8>>>,
    failures: Mutex<VecDeque<FetchError>>,
    delay: Mutex<Option<Duration>>,
    open: watch::Sender<bool>,
    calls: AtomicUsize,
    served: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn new() -> Arc<Self> {
        let (open, _) = watch::channel(true);
        Arc::new(Self {
            bodies: Mutex::new(HashMap::new()),
            failures: Mutex::new(VecDeque::new()),
            delay: Mutex::new(None),
            open,
            calls: AtomicUsize::new(0),
            served: AtomicUsize::new(0),
        })
    }

    pub fn serve(&self, url: &str, body: Vec<u8>) {
        let url = Url::parse(url).unwrap();
        self.bodies.lock().insert(url.to_string(), body);
    }

    pub fn fail_next(&self, err: FetchError, times: usize) {
        let mut failures = self.failures.lock();
        for _ in 0..times {
            failures.push_back(err.clone());
        }
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Park every fetch until [`ScriptedFetcher::release`].
    pub fn hold(&self) {
        self.open.send_replace(false);
    }

    pub fn release(&self) {
        self.open.send_replace(true);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Fetches that returned a body.
    pub fn served(&self) -> usize {
        self.served.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, url: &Url, limit: ByteSize) -> Result<Vec<u8>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut open = self.open.subscribe();
        let _ = open.wait_for(|open| *open).await;

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.failures.lock().pop_front() {
            return Err(err);
        }
        let body = self
            .bodies
            .lock()
            .get(url.as_str())
            .cloned()
            .ok_or(FetchError::HttpClientError { status: 404 })?;
        if body.len() as u64 > limit.as_bytes() {
            return Err(FetchError::OversizeResponse { limit });
        }
        self.served.fetch_add(1, Ordering::SeqCst);
        Ok(body)
    }
}

/// Config isolated to `root`: no viewers, no sweep, generous decode slice.
pub fn config(root: &Path) -> MediaConfig {
    let mut config = MediaConfig::default().with_cache_root(root);
    config.viewers = ViewerMap::new();
    config.sweep_interval = Duration::ZERO;
    config.render.decode_slice = Duration::from_secs(10);
    config.loader.initial_backoff = Duration::from_millis(10);
    config.loader.max_backoff = Duration::from_millis(40);
    config
}

pub async fn manager(
    config: MediaConfig,
    fetcher: &Arc<ScriptedFetcher>,
    clock: &ManualClock,
) -> MediaManager {
    MediaManager::with_parts(config, fetcher.clone(), Arc::new(clock.clone()))
        .await
        .unwrap()
}

pub fn image_ref(url: &str) -> MediaRef {
    MediaRef::new(url, MediaKind::Image).unwrap()
}

pub fn key(url: &str) -> ResourceKey {
    ResourceKey::parse_url(url).unwrap().1
}

/// Noisy PNG so the encoded size tracks the pixel count.
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let mut state = 0x2545_f491_u32;
    let img = ImageBuffer::from_fn(width, height, |_, _| {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        let [r, g, b, _] = state.to_le_bytes();
        Rgba([r, g, b, 255])
    });
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

pub fn filled(len: usize, byte: u8) -> Arc<[u8]> {
    Arc::from(vec![byte; len])
}

/// Poll `check` until it holds, yielding to background tasks in between.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
