use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::PathBuf};

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub previews: FilePreviewConfig,
    #[serde(default)]
    pub cache: FileCacheConfig,
    #[serde(default)]
    pub loader: FileLoaderConfig,
    #[serde(default)]
    pub render: FileRenderConfig,
    #[serde(default)]
    pub viewers: FileViewerConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FilePreviewConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_images: Option<bool>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FileCacheConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_budget: Option<SizeValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_budget: Option<SizeValue>,
    /// humantime, e.g. `7d`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sweep_interval: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FileLoaderConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_backoff: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_backoff: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_response_size: Option<SizeValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrent: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub foreground_reserved: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FileRenderConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decode_slice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_max_edge: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<String>,
}

/// `[viewers]`: `discover` plus one command line per media kind.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileViewerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discover: Option<bool>,
    #[serde(flatten)]
    pub commands: BTreeMap<String, String>,
}

/// A byte size written either as an integer or as `"50MiB"`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum SizeValue {
    Bytes(u64),
    Text(String),
}

pub const ENV_PREFIX: &str = "TOOTLES_MEDIA_";

/// Raw `TOOTLES_MEDIA_*` overrides. Values are parsed (and reported) when the
/// configuration is composed.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub previews: Option<String>,
    pub inline_images: Option<String>,
    pub cache_dir: Option<PathBuf>,
    pub memory_budget: Option<String>,
    pub disk_budget: Option<String>,
    pub expiry: Option<String>,
    pub sweep_interval: Option<String>,
    pub max_attempts: Option<String>,
    pub request_timeout: Option<String>,
    pub max_response_size: Option<String>,
    pub max_concurrent: Option<String>,
    pub user_agent: Option<String>,
    pub discover_viewers: Option<String>,
    pub image_viewer: Option<String>,
    pub video_viewer: Option<String>,
    pub audio_viewer: Option<String>,
    pub unknown_viewer: Option<String>,
}

impl EnvConfig {
    /// Read from the process environment.
    pub fn gather() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read through `lookup`, which receives full variable names.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |suffix: &str| {
            lookup(&format!("{ENV_PREFIX}{suffix}"))
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
        };

        Self {
            config_path: var("CONFIG").map(PathBuf::from),
            previews: var("PREVIEWS"),
            inline_images: var("INLINE_IMAGES"),
            cache_dir: var("CACHE_DIR").map(PathBuf::from),
            memory_budget: var("MEMORY_BUDGET"),
            disk_budget: var("DISK_BUDGET"),
            expiry: var("EXPIRY"),
            sweep_interval: var("SWEEP_INTERVAL"),
            max_attempts: var("MAX_ATTEMPTS"),
            request_timeout: var("REQUEST_TIMEOUT"),
            max_response_size: var("MAX_RESPONSE_SIZE"),
            max_concurrent: var("MAX_CONCURRENT"),
            user_agent: var("USER_AGENT"),
            discover_viewers: var("DISCOVER_VIEWERS"),
            image_viewer: var("IMAGE_VIEWER"),
            video_viewer: var("VIDEO_VIEWER"),
            audio_viewer: var("AUDIO_VIEWER"),
            unknown_viewer: var("UNKNOWN_VIEWER"),
        }
    }
}

pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
