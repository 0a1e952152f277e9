use thiserror::Error;
use tootles_media::MediaConfig;

const MAX_ATTEMPTS_LIMIT: u32 = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigGuardRailError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
    #[error("loader.max_attempts must be between 1 and {MAX_ATTEMPTS_LIMIT}, got {0}")]
    Attempts(u32),
    #[error(
        "loader.foreground_reserved ({reserved}) must be lower than loader.max_concurrent ({concurrent})"
    )]
    NoPreloadSlots { reserved: usize, concurrent: usize },
    #[error("loader.initial_backoff ({initial:?}) exceeds loader.max_backoff ({max:?})")]
    Backoff {
        initial: std::time::Duration,
        max: std::time::Duration,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(
        &mut self,
        message: S,
        hint: H,
    ) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigWarning> {
        self.items.iter()
    }
}

/// Reject values the engine cannot run with; warn about odd but usable ones.
pub fn apply_guard_rails(
    config: &MediaConfig,
) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let mut warnings = ConfigWarnings::default();

    if config.memory_budget.is_zero() {
        return Err(ConfigGuardRailError::Zero {
            field: "cache.memory_budget",
        });
    }
    if config.disk_budget.is_zero() {
        return Err(ConfigGuardRailError::Zero {
            field: "cache.disk_budget",
        });
    }

    let loader = &config.loader;
    if !(1..=MAX_ATTEMPTS_LIMIT).contains(&loader.max_attempts) {
        return Err(ConfigGuardRailError::Attempts(loader.max_attempts));
    }
    if loader.max_concurrent == 0 {
        return Err(ConfigGuardRailError::Zero {
            field: "loader.max_concurrent",
        });
    }
    if loader.foreground_reserved >= loader.max_concurrent {
        return Err(ConfigGuardRailError::NoPreloadSlots {
            reserved: loader.foreground_reserved,
            concurrent: loader.max_concurrent,
        });
    }
    if loader.attempt_timeout.is_zero() {
        return Err(ConfigGuardRailError::Zero {
            field: "loader.request_timeout",
        });
    }
    if loader.max_response_bytes.is_zero() {
        return Err(ConfigGuardRailError::Zero {
            field: "loader.max_response_size",
        });
    }
    if loader.initial_backoff > loader.max_backoff {
        return Err(ConfigGuardRailError::Backoff {
            initial: loader.initial_backoff,
            max: loader.max_backoff,
        });
    }
    if config.render.thumbnail_max_edge == 0 {
        return Err(ConfigGuardRailError::Zero {
            field: "render.thumbnail_max_edge",
        });
    }

    if config.disk_budget < config.memory_budget {
        warnings.push_with_hint(
            format!(
                "disk budget ({}) is smaller than the memory budget ({})",
                config.disk_budget, config.memory_budget
            ),
            "Entries evicted from memory will usually have to be fetched again",
        );
    }
    if config.memory_budget < loader.max_response_bytes {
        warnings.push(format!(
            "responses up to {} are accepted but only {} fits in memory; larger media is served uncached",
            loader.max_response_bytes, config.memory_budget
        ));
    }
    if config.expiry.is_zero() {
        warnings.push("cache.expiry is 0; cached entries never expire");
    }
    if config.sweep_interval.is_zero() {
        warnings.push_with_hint(
            "cache.sweep_interval is 0; the background expiry sweep is disabled",
            "Expired entries are still dropped lazily when read",
        );
    }
    if config.previews_enabled && !config.inline_images && config.viewers.is_empty() {
        warnings.push_with_hint(
            "inline images are off and no external viewer is configured; every preview will be a placeholder",
            "Install feh or mpv, or set [viewers] entries",
        );
    }

    Ok(warnings)
}
