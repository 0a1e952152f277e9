use std::{fs, path::PathBuf};

use assert_cmd::{Command, cargo::cargo_bin_cmd};
use predicates::prelude::*;
use tempfile::TempDir;

struct Workspace {
    dir: TempDir,
    config: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("tootles.toml");
        let cache_root = dir.path().join("cache");
        fs::write(
            &config,
            format!(
                "[cache]\nroot = {:?}\nsweep_interval = \"0s\"\n\n[viewers]\ndiscover = false\nimage = \"feh -F\"\n",
                cache_root.display().to_string()
            ),
        )
        .unwrap();
        Self { dir, config }
    }

    fn cmd(&self) -> Command {
        let mut cmd = cargo_bin_cmd!("tootlesctl");
        cmd.current_dir(self.dir.path())
            .env("RUST_LOG", "warn")
            .arg("--config")
            .arg(&self.config)
            .arg("--env-file")
            .arg(self.dir.path().join("missing.env"));
        cmd
    }
}

#[test]
fn help_lists_every_subcommand() {
    let output = cargo_bin_cmd!("tootlesctl")
        .arg("--help")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8_lossy(&output);
    for command in ["fetch", "preview", "stats", "sweep", "clear", "viewers", "config"] {
        assert!(text.contains(command), "help missing '{command}'");
    }
    assert!(text.contains("--config"));
    assert!(text.contains("--env-file"));
}

#[test]
fn viewers_shows_configured_commands() {
    let ws = Workspace::new();
    ws.cmd()
        .arg("viewers")
        .assert()
        .success()
        .stdout(predicate::str::contains("feh -F"))
        .stdout(predicate::str::is_match(r"video\s+none").unwrap());
}

#[test]
fn stats_on_a_fresh_cache_is_empty() {
    let ws = Workspace::new();
    ws.cmd()
        .arg("stats")
        .assert()
        .success()
        .stdout(predicate::str::contains("cache root:"))
        .stdout(predicate::str::is_match(r"disk\s+0 entries").unwrap())
        .stdout(predicate::str::contains("expiry 7days"));
}

#[test]
fn sweep_and_clear_report_counts() {
    let ws = Workspace::new();
    ws.cmd()
        .arg("sweep")
        .assert()
        .success()
        .stdout(predicate::str::contains("removed 0 expired entries"));
    ws.cmd()
        .arg("clear")
        .assert()
        .success()
        .stdout(predicate::str::contains("removed 0 entries"));
}

#[test]
fn missing_config_file_is_an_error() {
    let ws = Workspace::new();
    cargo_bin_cmd!("tootlesctl")
        .current_dir(ws.dir.path())
        .arg("--config")
        .arg(ws.dir.path().join("nope.toml"))
        .arg("stats")
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load configuration"));
}

#[test]
fn unsupported_links_get_a_placeholder() {
    let ws = Workspace::new();
    ws.cmd()
        .args(["preview", "ftp://files.example.social/cat.png"])
        .args(["--description", "a cat"])
        .assert()
        .success()
        .stdout(predicate::str::contains("unsupported link"))
        .stdout(predicate::str::contains("a cat"));
}

#[test]
fn previews_can_be_disabled_from_the_environment() {
    let ws = Workspace::new();
    ws.cmd()
        .env("TOOTLES_MEDIA_PREVIEWS", "off")
        .args(["preview", "https://files.example.social/cat.png"])
        .assert()
        .success()
        .stdout(predicate::str::contains("previews disabled"));
}

#[test]
fn fetch_of_unsupported_link_fails() {
    let ws = Workspace::new();
    ws.cmd()
        .args(["fetch", "ftp://files.example.social/cat.png"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to fetch"));
}

#[test]
fn unknown_kind_is_rejected_by_the_parser() {
    let ws = Workspace::new();
    ws.cmd()
        .args(["fetch", "--kind", "hologram", "https://files.example.social/x"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn config_prints_effective_values() {
    let ws = Workspace::new();
    ws.cmd()
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("[cache]"))
        .stdout(predicate::str::contains("discover = false"));
}
