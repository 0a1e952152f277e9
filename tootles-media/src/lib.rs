//! Media preview engine for the tootles timeline.
//!
//! [`MediaManager`] is the one entry point for the UI. It checks the
//! [`MediaCache`] (memory, then disk), falls back to the deduplicating
//! [`MediaLoader`] and hands the bytes to the [`Renderer`], which returns an
//! inline thumbnail, an external-viewer hint or a placeholder.

pub mod cache;
pub mod clock;
pub mod config;
pub mod constants;
pub mod error;
pub mod loader;
pub mod manager;
pub mod render;
pub mod sweep;
pub mod units;

pub use cache::{CacheEntry, CacheStatsSnapshot, MediaCache, Payload, Stored, TierStatsSnapshot};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{LoaderSettings, MediaConfig, RenderSettings, ViewerCommand, ViewerMap};
pub use error::{CacheError, FetchError, MediaError, RenderError, Result};
pub use loader::{FetchHandle, Fetcher, HttpFetcher, LoaderStatsSnapshot, MediaLoader};
pub use manager::{ManagerStats, MediaManager, PreloadBatch};
pub use render::{
    Deferred, ExternalView, InlineImage, PendingRender, Placeholder, Presentation,
    RenderFailure, RenderOutcome, Renderer, RgbaThumbnail,
};
pub use sweep::SweepHandle;
pub use units::ByteSize;

pub use tootles_model::{MediaKind, MediaRef, Priority, ResourceKey, Tier};
