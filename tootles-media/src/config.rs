//! Immutable configuration consumed by the engine.
//!
//! Loading and parsing lives in `tootles-config`; this module only defines
//! the value passed into [`crate::MediaManager`] and friends at construction.

use std::{collections::BTreeMap, path::PathBuf, time::Duration};

use directories::ProjectDirs;
use tootles_model::MediaKind;

use crate::{constants, units::ByteSize};

/// Everything the media engine reads from configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaConfig {
    /// When false, previews are never fetched and a placeholder is returned.
    pub previews_enabled: bool,
    /// Whether the presentation context can draw raster images inline.
    pub inline_images: bool,
    pub memory_budget: ByteSize,
    pub disk_budget: ByteSize,
    pub cache_root: PathBuf,
    /// Age after which an entry is treated as absent.
    pub expiry: Duration,
    pub sweep_interval: Duration,
    pub viewers: ViewerMap,
    pub loader: LoaderSettings,
    pub render: RenderSettings,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            previews_enabled: true,
            inline_images: true,
            memory_budget: constants::cache::MEMORY_BUDGET,
            disk_budget: constants::cache::DISK_BUDGET,
            cache_root: default_cache_root(),
            expiry: constants::cache::EXPIRY,
            sweep_interval: constants::cache::SWEEP_INTERVAL,
            viewers: ViewerMap::default(),
            loader: LoaderSettings::default(),
            render: RenderSettings::default(),
        }
    }
}

impl MediaConfig {
    pub fn with_cache_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.cache_root = root.into();
        self
    }

    pub fn tier_limits(&self) -> TierLimits {
        TierLimits {
            memory_budget: self.memory_budget,
            disk_budget: self.disk_budget,
            expiry: self.expiry,
            access_flush_interval: constants::cache::ACCESS_FLUSH_INTERVAL,
        }
    }
}

/// Budgets and expiry applied by the cache tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierLimits {
    pub memory_budget: ByteSize,
    pub disk_budget: ByteSize,
    pub expiry: Duration,
    pub access_flush_interval: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoaderSettings {
    /// Total attempts per fetch, including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Bound on a single attempt; exceeding it is a transient failure.
    pub attempt_timeout: Duration,
    pub max_response_bytes: ByteSize,
    pub max_concurrent: usize,
    /// Slots kept free of preload work so foreground fetches never queue
    /// behind it.
    pub foreground_reserved: usize,
    pub user_agent: String,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            max_attempts: constants::loader::MAX_ATTEMPTS,
            initial_backoff: constants::loader::INITIAL_BACKOFF,
            max_backoff: constants::loader::MAX_BACKOFF,
            attempt_timeout: constants::loader::ATTEMPT_TIMEOUT,
            max_response_bytes: constants::loader::MAX_RESPONSE_BYTES,
            max_concurrent: constants::loader::MAX_CONCURRENT,
            foreground_reserved: constants::loader::FOREGROUND_RESERVED,
            user_agent: constants::loader::USER_AGENT.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderSettings {
    pub decode_slice: Duration,
    pub thumbnail_max_edge: u32,
    pub retry_after: Duration,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            decode_slice: constants::render::DECODE_SLICE,
            thumbnail_max_edge: constants::render::THUMBNAIL_MAX_EDGE,
            retry_after: constants::render::RETRY_AFTER,
        }
    }
}

/// A viewer command line such as `mpv --loop`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewerCommand(String);

impl ViewerCommand {
    pub fn new(command: impl Into<String>) -> Option<Self> {
        let command = command.into();
        let trimmed = command.trim();
        (!trimmed.is_empty()).then(|| Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The executable name (first word).
    pub fn program(&self) -> &str {
        self.0.split_whitespace().next().unwrap_or_default()
    }

    /// Full argument vector with `target` appended.
    pub fn argv(&self, target: &str) -> Vec<String> {
        self.0
            .split_whitespace()
            .map(str::to_string)
            .chain(std::iter::once(target.to_string()))
            .collect()
    }

    pub fn is_installed(&self) -> bool {
        which::which(self.program()).is_ok()
    }
}

/// Per-kind external viewer commands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewerMap(BTreeMap<MediaKind, ViewerCommand>);

impl ViewerMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: MediaKind, command: ViewerCommand) -> Self {
        self.0.insert(kind, command);
        self
    }

    pub fn insert(&mut self, kind: MediaKind, command: ViewerCommand) {
        self.0.insert(kind, command);
    }

    pub fn get(&self, kind: MediaKind) -> Option<&ViewerCommand> {
        self.0.get(&kind)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (MediaKind, &ViewerCommand)> {
        self.0.iter().map(|(kind, cmd)| (*kind, cmd))
    }

    /// Probe `PATH` for well-known viewers, falling back to `xdg-open`.
    pub fn discover() -> Self {
        let found = |candidates: &[&str]| {
            candidates
                .iter()
                .find(|name| which::which(name).is_ok())
                .and_then(|name| ViewerCommand::new(*name))
        };

        let mut map = Self::new();
        if let Some(cmd) = found(constants::viewers::IMAGE) {
            map.insert(MediaKind::Image, cmd);
        }
        if let Some(cmd) = found(constants::viewers::PLAYER) {
            map.insert(MediaKind::Video, cmd.clone());
            map.insert(MediaKind::Audio, cmd);
        }
        if let Some(fallback) = found(&[constants::viewers::FALLBACK]) {
            for kind in [MediaKind::Image, MediaKind::Video, MediaKind::Audio] {
                map.0.entry(kind).or_insert_with(|| fallback.clone());
            }
        }
        map
    }

    /// Entries overridden by `other`.
    pub fn merged_with(mut self, other: &ViewerMap) -> Self {
        for (kind, cmd) in other.iter() {
            self.0.insert(kind, cmd.clone());
        }
        self
    }
}

pub fn default_cache_root() -> PathBuf {
    ProjectDirs::from("", "tootles", "tootles")
        .map(|dirs| dirs.cache_dir().join("media"))
        .unwrap_or_else(|| std::env::temp_dir().join("tootles").join("media"))
}

#[cfg(test)]
mod tests {
    use super::{ViewerCommand, ViewerMap};
    use tootles_model::MediaKind;

    #[test]
    fn argv_appends_target() {
        let cmd = ViewerCommand::new("  mpv --loop ").unwrap();
        assert_eq!(cmd.program(), "mpv");
        assert_eq!(cmd.argv("/tmp/a.mp4"), vec!["mpv", "--loop", "/tmp/a.mp4"]);
        assert!(ViewerCommand::new("   ").is_none());
    }

    #[test]
    fn merge_overrides_per_kind() {
        let base = ViewerMap::new()
            .with(MediaKind::Image, ViewerCommand::new("feh").unwrap())
            .with(MediaKind::Video, ViewerCommand::new("vlc").unwrap());
        let overrides =
            ViewerMap::new().with(MediaKind::Video, ViewerCommand::new("mpv").unwrap());
        let merged = base.merged_with(&overrides);
        assert_eq!(merged.get(MediaKind::Image).unwrap().as_str(), "feh");
        assert_eq!(merged.get(MediaKind::Video).unwrap().as_str(), "mpv");
        assert!(merged.get(MediaKind::Audio).is_none());
    }
}
