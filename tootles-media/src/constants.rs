//! Default values for the media engine configuration.

use std::time::Duration;

use crate::units::ByteSize;

pub mod cache {
    use super::*;

    /// Budget for the in-memory thumbnail tier.
    pub const MEMORY_BUDGET: ByteSize = ByteSize::from_mib(50);

    /// Budget for the on-disk full-resolution tier.
    pub const DISK_BUDGET: ByteSize = ByteSize::from_mib(500);

    /// Entries older than this (measured from when they were stored) are no
    /// longer served.
    pub const EXPIRY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

    /// Period of the background expiry sweep.
    pub const SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

    /// How often the disk tier persists its access-time snapshot.
    pub const ACCESS_FLUSH_INTERVAL: Duration = Duration::from_secs(30);

    /// Usage ratio (percent) above which access snapshots flush eagerly.
    pub const PRESSURE_PERCENT: u64 = 80;
}

pub mod loader {
    use super::*;

    pub const MAX_ATTEMPTS: u32 = 3;
    pub const INITIAL_BACKOFF: Duration = Duration::from_millis(250);
    pub const MAX_BACKOFF: Duration = Duration::from_secs(4);
    pub const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);
    pub const MAX_RESPONSE_BYTES: ByteSize = ByteSize::from_mib(50);
    pub const MAX_CONCURRENT: usize = 5;

    /// Download slots that preload work may never occupy.
    pub const FOREGROUND_RESERVED: usize = 1;

    pub const USER_AGENT: &str =
        concat!("tootles-media/", env!("CARGO_PKG_VERSION"));
}

pub mod render {
    use super::*;

    /// Longest the caller waits on a decode before receiving `Deferred`.
    pub const DECODE_SLICE: Duration = Duration::from_millis(40);

    /// Longest edge of inline thumbnails, in pixels.
    pub const THUMBNAIL_MAX_EDGE: u32 = 150;

    /// Retry hint attached to placeholders for transient problems.
    pub const RETRY_AFTER: Duration = Duration::from_secs(5);
}

/// Candidate external viewers looked up on `PATH`, in preference order.
pub mod viewers {
    pub const IMAGE: &[&str] = &["feh", "eog", "xviewer", "gwenview", "ristretto"];
    pub const PLAYER: &[&str] = &["mpv", "vlc", "mplayer", "totem"];
    pub const FALLBACK: &str = "xdg-open";
}
