use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use directories::ProjectDirs;
use thiserror::Error;
use tootles_media::{ByteSize, MediaConfig, ViewerCommand, ViewerMap};
use tootles_model::MediaKind;
use tracing::debug;

use crate::{
    sources::{EnvConfig, FileConfig, SizeValue, parse_bool},
    validation::{self, ConfigGuardRailError, ConfigWarnings},
};

fn default_config_locations() -> Vec<PathBuf> {
    let mut locations = vec![
        PathBuf::from("tootles.toml"),
        PathBuf::from("config/tootles.toml"),
    ];
    if let Some(dirs) = ProjectDirs::from("", "tootles", "tootles") {
        locations.push(dirs.config_dir().join("media.toml"));
    }
    locations
}

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
    /// Replaces the process environment when set.
    pub environment: Option<HashMap<String, String>>,
    pub search_default_locations: bool,
}

/// Where the loaded values came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: MediaConfig,
    pub warnings: ConfigWarnings,
    pub metadata: ConfigMetadata,
}

#[derive(Debug)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            options: ConfigLoaderOptions {
                search_default_locations: true,
                ..Default::default()
            },
        }
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    /// Read variables from `vars` instead of the process environment.
    pub fn with_environment<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.options.environment = Some(
            vars.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    pub fn without_default_locations(mut self) -> Self {
        self.options.search_default_locations = false;
        self
    }

    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let (dotenv, env_file_loaded) = self.read_env_file()?;

        // Real variables win over `.env` entries, as with `dotenvy::dotenv`.
        let env_config = match &self.options.environment {
            Some(vars) => EnvConfig::from_lookup(|name| {
                vars.get(name).or_else(|| dotenv.get(name)).cloned()
            }),
            None => EnvConfig::from_lookup(|name| {
                std::env::var(name).ok().or_else(|| dotenv.get(name).cloned())
            }),
        };

        let (file_config, config_path) = self.load_file_config(&env_config)?;
        let config_present = file_config.is_some();

        let (config, warnings) =
            compose_config(file_config.unwrap_or_default(), env_config, config_present)?;

        debug!(
            config_path = ?config_path,
            env_file_loaded,
            warnings = warnings.len(),
            "media configuration loaded"
        );
        Ok(ConfigLoad {
            config,
            warnings,
            metadata: ConfigMetadata {
                config_path,
                env_file_loaded,
            },
        })
    }

    fn read_env_file(&self) -> Result<(HashMap<String, String>, bool), ConfigLoadError> {
        let iter = match &self.options.env_file {
            Some(path) => dotenvy::from_path_iter(path),
            None => dotenvy::dotenv_iter(),
        };
        let iter = match iter {
            Ok(iter) => iter,
            Err(dotenvy::Error::Io(_)) => return Ok((HashMap::new(), false)),
            Err(err) => return Err(err.into()),
        };
        let mut vars = HashMap::new();
        for item in iter {
            let (key, value) = item?;
            vars.insert(key, value);
        }
        Ok((vars, true))
    }

    fn load_file_config(
        &self,
        env_config: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let mut source = ConfigPathSource::default();

        if let Some(explicit) = &self.options.config_path {
            source.explicit = Some(explicit.clone());
        } else if let Some(from_env) = &env_config.config_path {
            source.env = Some(from_env.clone());
        }

        if source.is_empty() && self.options.search_default_locations {
            source.default = default_config_locations()
                .into_iter()
                .find(|candidate| candidate.exists());
        }

        let Some((path, provenance)) = source.resolved_path() else {
            return Ok((None, None));
        };
        if !path.exists() {
            if provenance.is_explicit() {
                return Err(ConfigLoadError::MissingConfig { path });
            }
            return Ok((None, None));
        }

        let contents = fs::read_to_string(&path).map_err(|err| ConfigLoadError::Io {
            path: path.clone(),
            source: err,
        })?;
        let file_config: FileConfig =
            toml::from_str(&contents).map_err(|err| ConfigLoadError::Parse {
                path: path.clone(),
                source: err,
            })?;

        Ok((Some(file_config), Some(path)))
    }
}

fn compose_config(
    file: FileConfig,
    env: EnvConfig,
    config_present: bool,
) -> Result<(MediaConfig, ConfigWarnings), ConfigLoadError> {
    let mut warnings = ConfigWarnings::default();
    if !config_present {
        warnings.push_with_hint(
            "No tootles.toml detected; using defaults and TOOTLES_MEDIA_* variables",
            "Create config/tootles.toml or set TOOTLES_MEDIA_CONFIG",
        );
    }

    let FileConfig {
        previews: file_previews,
        cache: file_cache,
        loader: file_loader,
        render: file_render,
        viewers: file_viewers,
    } = file;

    let mut config = MediaConfig::default();

    if let Some(enabled) = env_bool("TOOTLES_MEDIA_PREVIEWS", env.previews.as_deref())?
        .or(file_previews.enabled)
    {
        config.previews_enabled = enabled;
    }
    if let Some(inline) =
        env_bool("TOOTLES_MEDIA_INLINE_IMAGES", env.inline_images.as_deref())?
            .or(file_previews.inline_images)
    {
        config.inline_images = inline;
    }

    if let Some(root) = env.cache_dir.clone().or(file_cache.root.clone()) {
        config.cache_root = root;
    }
    if let Some(size) = pick_size(
        ("TOOTLES_MEDIA_MEMORY_BUDGET", env.memory_budget.as_deref()),
        ("cache.memory_budget", file_cache.memory_budget.as_ref()),
    )? {
        config.memory_budget = size;
    }
    if let Some(size) = pick_size(
        ("TOOTLES_MEDIA_DISK_BUDGET", env.disk_budget.as_deref()),
        ("cache.disk_budget", file_cache.disk_budget.as_ref()),
    )? {
        config.disk_budget = size;
    }
    if let Some(expiry) = pick_duration(
        ("TOOTLES_MEDIA_EXPIRY", env.expiry.as_deref()),
        ("cache.expiry", file_cache.expiry.as_deref()),
    )? {
        config.expiry = expiry;
    }
    if let Some(interval) = pick_duration(
        ("TOOTLES_MEDIA_SWEEP_INTERVAL", env.sweep_interval.as_deref()),
        ("cache.sweep_interval", file_cache.sweep_interval.as_deref()),
    )? {
        config.sweep_interval = interval;
    }

    let loader = &mut config.loader;
    if let Some(attempts) =
        env_number("TOOTLES_MEDIA_MAX_ATTEMPTS", env.max_attempts.as_deref())?
            .or(file_loader.max_attempts)
    {
        loader.max_attempts = attempts;
    }
    if let Some(raw) = file_loader.initial_backoff.as_deref() {
        loader.initial_backoff = parse_duration("loader.initial_backoff", raw)?;
    }
    if let Some(raw) = file_loader.max_backoff.as_deref() {
        loader.max_backoff = parse_duration("loader.max_backoff", raw)?;
    }
    if let Some(timeout) = pick_duration(
        ("TOOTLES_MEDIA_REQUEST_TIMEOUT", env.request_timeout.as_deref()),
        ("loader.request_timeout", file_loader.request_timeout.as_deref()),
    )? {
        loader.attempt_timeout = timeout;
    }
    if let Some(size) = pick_size(
        ("TOOTLES_MEDIA_MAX_RESPONSE_SIZE", env.max_response_size.as_deref()),
        ("loader.max_response_size", file_loader.max_response_size.as_ref()),
    )? {
        loader.max_response_bytes = size;
    }
    if let Some(concurrent) =
        env_number("TOOTLES_MEDIA_MAX_CONCURRENT", env.max_concurrent.as_deref())?
            .or(file_loader.max_concurrent)
    {
        loader.max_concurrent = concurrent;
    }
    if let Some(reserved) = file_loader.foreground_reserved {
        loader.foreground_reserved = reserved;
    }
    if let Some(agent) = env.user_agent.clone().or(file_loader.user_agent.clone()) {
        loader.user_agent = agent;
    }

    let render = &mut config.render;
    if let Some(raw) = file_render.decode_slice.as_deref() {
        render.decode_slice = parse_duration("render.decode_slice", raw)?;
    }
    if let Some(edge) = file_render.thumbnail_max_edge {
        render.thumbnail_max_edge = edge;
    }
    if let Some(raw) = file_render.retry_after.as_deref() {
        render.retry_after = parse_duration("render.retry_after", raw)?;
    }

    let discover = env_bool(
        "TOOTLES_MEDIA_DISCOVER_VIEWERS",
        env.discover_viewers.as_deref(),
    )?
    .or(file_viewers.discover)
    .unwrap_or(true);
    let configured = configured_viewers(&file_viewers.commands, &env)?;
    config.viewers = if discover {
        ViewerMap::discover().merged_with(&configured)
    } else {
        configured
    };

    for (kind, command) in config.viewers.iter() {
        if !command.is_installed() {
            warnings.push(format!(
                "{kind} viewer '{}' was not found on PATH",
                command.program()
            ));
        }
    }

    let guard_warnings = validation::apply_guard_rails(&config)?;
    warnings.extend(guard_warnings);

    Ok((config, warnings))
}

fn configured_viewers(
    file: &BTreeMap<String, String>,
    env: &EnvConfig,
) -> Result<ViewerMap, ConfigLoadError> {
    let mut map = ViewerMap::new();
    for (name, command) in file {
        let kind = MediaKind::from_str(name).map_err(|reason| ConfigLoadError::Invalid {
            field: format!("viewers.{name}"),
            reason,
        })?;
        if let Some(command) = ViewerCommand::new(command.as_str()) {
            map.insert(kind, command);
        }
    }
    let overrides = [
        (MediaKind::Image, &env.image_viewer),
        (MediaKind::Video, &env.video_viewer),
        (MediaKind::Audio, &env.audio_viewer),
        (MediaKind::Unknown, &env.unknown_viewer),
    ];
    for (kind, command) in overrides {
        if let Some(command) = command.as_deref().and_then(ViewerCommand::new) {
            map.insert(kind, command);
        }
    }
    Ok(map)
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigLoadError {
    ConfigLoadError::Invalid {
        field: field.to_string(),
        reason: reason.into(),
    }
}

fn env_bool(name: &str, raw: Option<&str>) -> Result<Option<bool>, ConfigLoadError> {
    raw.map(|raw| {
        parse_bool(raw).ok_or_else(|| invalid(name, format!("'{raw}' is not a boolean")))
    })
    .transpose()
}

fn env_number<T: FromStr>(name: &str, raw: Option<&str>) -> Result<Option<T>, ConfigLoadError> {
    raw.map(|raw| {
        raw.parse::<T>()
            .map_err(|_| invalid(name, format!("'{raw}' is not a valid number")))
    })
    .transpose()
}

fn parse_duration(field: &str, raw: &str) -> Result<Duration, ConfigLoadError> {
    humantime::parse_duration(raw).map_err(|err| invalid(field, format!("'{raw}': {err}")))
}

/// Environment first, then file.
fn pick_duration(
    env: (&str, Option<&str>),
    file: (&str, Option<&str>),
) -> Result<Option<Duration>, ConfigLoadError> {
    if let (name, Some(raw)) = env {
        return parse_duration(name, raw).map(Some);
    }
    if let (field, Some(raw)) = file {
        return parse_duration(field, raw).map(Some);
    }
    Ok(None)
}

fn pick_size(
    env: (&str, Option<&str>),
    file: (&str, Option<&SizeValue>),
) -> Result<Option<ByteSize>, ConfigLoadError> {
    if let (name, Some(raw)) = env {
        return ByteSize::from_str(raw).map(Some).map_err(|e| invalid(name, e));
    }
    match file {
        (_, Some(SizeValue::Bytes(bytes))) => Ok(Some(ByteSize::from_bytes(*bytes))),
        (field, Some(SizeValue::Text(raw))) => {
            ByteSize::from_str(raw).map(Some).map_err(|e| invalid(field, e))
        }
        (_, None) => Ok(None),
    }
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration file missing: {path}")]
    MissingConfig { path: PathBuf },
    #[error("failed to read configuration {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },
    #[error(transparent)]
    GuardRail(#[from] ConfigGuardRailError),
    #[error(transparent)]
    EnvFile(#[from] dotenvy::Error),
}

#[derive(Debug, Default)]
struct ConfigPathSource {
    explicit: Option<PathBuf>,
    env: Option<PathBuf>,
    default: Option<PathBuf>,
}

impl ConfigPathSource {
    fn is_empty(&self) -> bool {
        self.explicit.is_none() && self.env.is_none() && self.default.is_none()
    }

    fn resolved_path(&self) -> Option<(PathBuf, ConfigPathProvenance)> {
        if let Some(path) = &self.explicit {
            return Some((path.clone(), ConfigPathProvenance::Explicit));
        }
        if let Some(path) = &self.env {
            return Some((path.clone(), ConfigPathProvenance::Env));
        }
        if let Some(path) = &self.default {
            return Some((path.clone(), ConfigPathProvenance::Default));
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigPathProvenance {
    Explicit,
    Env,
    Default,
}

impl ConfigPathProvenance {
    fn is_explicit(self) -> bool {
        matches!(self, ConfigPathProvenance::Explicit | ConfigPathProvenance::Env)
    }
}

/// Render `config` back into the TOML layout read by [`ConfigLoader`].
pub fn to_toml(config: &MediaConfig) -> anyhow::Result<String> {
    use crate::sources::{
        FileCacheConfig, FileLoaderConfig, FilePreviewConfig, FileRenderConfig,
        FileViewerConfig,
    };

    let human = |d: Duration| humantime::format_duration(d).to_string();
    let file = FileConfig {
        previews: FilePreviewConfig {
            enabled: Some(config.previews_enabled),
            inline_images: Some(config.inline_images),
        },
        cache: FileCacheConfig {
            root: Some(config.cache_root.clone()),
            memory_budget: Some(SizeValue::Bytes(config.memory_budget.as_bytes())),
            disk_budget: Some(SizeValue::Bytes(config.disk_budget.as_bytes())),
            expiry: Some(human(config.expiry)),
            sweep_interval: Some(human(config.sweep_interval)),
        },
        loader: FileLoaderConfig {
            max_attempts: Some(config.loader.max_attempts),
            initial_backoff: Some(human(config.loader.initial_backoff)),
            max_backoff: Some(human(config.loader.max_backoff)),
            request_timeout: Some(human(config.loader.attempt_timeout)),
            max_response_size: Some(SizeValue::Bytes(
                config.loader.max_response_bytes.as_bytes(),
            )),
            max_concurrent: Some(config.loader.max_concurrent),
            foreground_reserved: Some(config.loader.foreground_reserved),
            user_agent: Some(config.loader.user_agent.clone()),
        },
        render: FileRenderConfig {
            decode_slice: Some(human(config.render.decode_slice)),
            thumbnail_max_edge: Some(config.render.thumbnail_max_edge),
            retry_after: Some(human(config.render.retry_after)),
        },
        viewers: FileViewerConfig {
            discover: Some(false),
            commands: config
                .viewers
                .iter()
                .map(|(kind, cmd)| (kind.as_str().to_string(), cmd.as_str().to_string()))
                .collect(),
        },
    };
    Ok(toml::to_string(&file)?)
}
