use std::fmt;

use tootles_model::{MediaKind, MediaRef};

use crate::units::ByteSize;

/// Short status lines shown under a placeholder.
pub mod status {
    pub const DECODING: &str = "⏳ decoding…";
    pub const FAILED_TO_LOAD: &str = "❌ failed to load";
    pub const TIMED_OUT: &str = "⏰ timed out";
    pub const TOO_LARGE: &str = "🚫 too large to preview";
    pub const UNSUPPORTED_LINK: &str = "🚫 unsupported link";
    pub const UNSUPPORTED_FORMAT: &str = "🚫 unsupported format";
    pub const UNDECODABLE: &str = "⚠ could not decode";
    pub const NO_VIEWER: &str = "🔗 no viewer configured";
    pub const PREVIEWS_DISABLED: &str = "previews disabled";
    pub const CORRUPT: &str = "❌ corrupt media";
}

/// Non-error stand-in shown when a real preview cannot be produced (yet).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub kind: MediaKind,
    /// Accessibility text; never empty.
    pub alt_text: String,
    pub status: String,
    pub size_hint: Option<ByteSize>,
}

impl Placeholder {
    pub fn new(media: &MediaRef, status: impl Into<String>) -> Self {
        Self {
            kind: media.kind(),
            alt_text: media.alt_text().to_string(),
            status: status.into(),
            size_hint: media.size_hint().map(ByteSize::from_bytes),
        }
    }

    pub fn with_kind(mut self, kind: MediaKind) -> Self {
        self.kind = kind;
        self
    }

    /// The lines a text UI would print, top to bottom.
    pub fn lines(&self) -> Vec<String> {
        let mut lines = vec![format!("{} {}", self.kind.icon(), self.alt_text)];
        if let Some(size) = self.size_hint {
            lines.push(format!("💾 {size}"));
        }
        if !self.status.is_empty() {
            lines.push(self.status.clone());
        }
        lines
    }
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.lines().join("\n"))
    }
}
