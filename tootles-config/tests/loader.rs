use std::{fs, path::Path, time::Duration};

use tempfile::TempDir;
use tootles_config::{ConfigGuardRailError, ConfigLoadError, ConfigLoader, to_toml};
use tootles_media::{ByteSize, MediaKind};

const NO_VARS: [(&str, &str); 0] = [];

/// Loader isolated from the process environment and the working directory.
fn isolated(dir: &TempDir) -> ConfigLoader {
    ConfigLoader::new()
        .without_default_locations()
        .with_env_file(dir.path().join("missing.env"))
        .with_environment(NO_VARS)
}

fn write(dir: &Path, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn defaults_apply_without_a_file() {
    let dir = tempfile::tempdir().unwrap();
    let load = isolated(&dir).load().unwrap();

    assert!(load.config.previews_enabled);
    assert_eq!(load.config.memory_budget, ByteSize::from_mib(50));
    assert_eq!(load.config.disk_budget, ByteSize::from_mib(500));
    assert_eq!(load.config.expiry, Duration::from_secs(7 * 24 * 60 * 60));
    assert_eq!(load.config.loader.max_attempts, 3);
    assert_eq!(load.config.loader.attempt_timeout, Duration::from_secs(30));
    assert_eq!(load.config.render.thumbnail_max_edge, 150);
    assert!(load.metadata.config_path.is_none());
    assert!(!load.metadata.env_file_loaded);
    assert!(
        load.warnings
            .iter()
            .any(|w| w.message.contains("No tootles.toml detected"))
    );
}

#[test]
fn file_values_are_applied() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(
        dir.path(),
        "tootles.toml",
        r#"
        [previews]
        enabled = true
        inline_images = false

        [cache]
        root = "/var/cache/tootles-test"
        memory_budget = "8 MiB"
        disk_budget = 104857600
        expiry = "2days"
        sweep_interval = "90s"

        [loader]
        max_attempts = 5
        request_timeout = "10s"
        max_concurrent = 4
        foreground_reserved = 2

        [render]
        thumbnail_max_edge = 96

        [viewers]
        discover = false
        video = "mpv --loop"
        "#,
    );

    let load = isolated(&dir).with_config_path(&path).load().unwrap();
    let config = &load.config;

    assert!(!config.inline_images);
    assert_eq!(config.cache_root, Path::new("/var/cache/tootles-test"));
    assert_eq!(config.memory_budget, ByteSize::from_mib(8));
    assert_eq!(config.disk_budget, ByteSize::from_mib(100));
    assert_eq!(config.expiry, Duration::from_secs(2 * 24 * 60 * 60));
    assert_eq!(config.sweep_interval, Duration::from_secs(90));
    assert_eq!(config.loader.max_attempts, 5);
    assert_eq!(config.loader.attempt_timeout, Duration::from_secs(10));
    assert_eq!(config.loader.foreground_reserved, 2);
    assert_eq!(config.render.thumbnail_max_edge, 96);
    assert_eq!(config.viewers.get(MediaKind::Video).unwrap().as_str(), "mpv --loop");
    assert!(config.viewers.get(MediaKind::Image).is_none());
    assert_eq!(load.metadata.config_path.as_deref(), Some(path.as_path()));
}

#[test]
fn environment_overrides_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(
        dir.path(),
        "tootles.toml",
        "[cache]\nmemory_budget = \"8MiB\"\nexpiry = \"1h\"\n[viewers]\ndiscover = false\n",
    );

    let load = isolated(&dir)
        .with_config_path(&path)
        .with_environment([
            ("TOOTLES_MEDIA_MEMORY_BUDGET", "16MiB"),
            ("TOOTLES_MEDIA_PREVIEWS", "off"),
            ("TOOTLES_MEDIA_IMAGE_VIEWER", "feh"),
        ])
        .load()
        .unwrap();

    assert_eq!(load.config.memory_budget, ByteSize::from_mib(16));
    assert_eq!(load.config.expiry, Duration::from_secs(3600));
    assert!(!load.config.previews_enabled);
    assert_eq!(load.config.viewers.get(MediaKind::Image).unwrap().as_str(), "feh");
}

#[test]
fn env_file_fills_unset_variables_only() {
    let dir = tempfile::tempdir().unwrap();
    let env_file = write(
        dir.path(),
        ".env",
        "TOOTLES_MEDIA_DISK_BUDGET=1GiB\nTOOTLES_MEDIA_MAX_ATTEMPTS=2\nTOOTLES_MEDIA_DISCOVER_VIEWERS=false\n",
    );

    let load = ConfigLoader::new()
        .without_default_locations()
        .with_env_file(&env_file)
        .with_environment([("TOOTLES_MEDIA_MAX_ATTEMPTS", "4")])
        .load()
        .unwrap();

    assert!(load.metadata.env_file_loaded);
    assert_eq!(load.config.disk_budget, ByteSize::from_gib(1));
    assert_eq!(load.config.loader.max_attempts, 4);
    assert!(load.config.viewers.is_empty());
}

#[test]
fn config_path_from_environment_must_exist() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.toml");

    let err = isolated(&dir)
        .with_environment([("TOOTLES_MEDIA_CONFIG", missing.to_str().unwrap())])
        .load()
        .unwrap_err();

    assert!(matches!(err, ConfigLoadError::MissingConfig { path } if path == missing));
}

#[test]
fn malformed_toml_reports_the_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(dir.path(), "tootles.toml", "[cache\nroot = 1");

    let err = isolated(&dir).with_config_path(&path).load().unwrap_err();
    match err {
        ConfigLoadError::Parse { path: reported, .. } => assert_eq!(reported, path),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn bad_values_name_their_source() {
    let dir = tempfile::tempdir().unwrap();

    let err = isolated(&dir)
        .with_environment([("TOOTLES_MEDIA_EXPIRY", "soon")])
        .load()
        .unwrap_err();
    assert!(
        matches!(&err, ConfigLoadError::Invalid { field, .. } if field == "TOOTLES_MEDIA_EXPIRY")
    );

    let path = write(
        dir.path(),
        "tootles.toml",
        "[cache]\ndisk_budget = \"12 parsecs\"\n",
    );
    let err = isolated(&dir).with_config_path(&path).load().unwrap_err();
    assert!(
        matches!(&err, ConfigLoadError::Invalid { field, .. } if field == "cache.disk_budget")
    );

    let path = write(dir.path(), "kinds.toml", "[viewers]\nhologram = \"holo\"\n");
    let err = isolated(&dir).with_config_path(&path).load().unwrap_err();
    assert!(
        matches!(&err, ConfigLoadError::Invalid { field, .. } if field == "viewers.hologram")
    );
}

#[test]
fn guard_rails_reject_unusable_limits() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(
        dir.path(),
        "tootles.toml",
        "[loader]\nmax_attempts = 0\n[viewers]\ndiscover = false\n",
    );

    let err = isolated(&dir).with_config_path(&path).load().unwrap_err();
    assert!(matches!(
        err,
        ConfigLoadError::GuardRail(ConfigGuardRailError::Attempts(0))
    ));
}

#[test]
fn written_config_loads_back_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(
        dir.path(),
        "tootles.toml",
        "[cache]\nmemory_budget = \"20MiB\"\nexpiry = \"3d\"\n[viewers]\ndiscover = false\naudio = \"mpv --no-video\"\n",
    );
    let first = isolated(&dir).with_config_path(&path).load().unwrap().config;

    let rendered = write(dir.path(), "rendered.toml", &to_toml(&first).unwrap());
    let second = isolated(&dir).with_config_path(&rendered).load().unwrap().config;

    assert_eq!(first, second);
}
