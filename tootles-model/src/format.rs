//! Media kind detection from MIME types, attachment types and URL extensions.

use std::fmt::{self, Display, Formatter};

use url::Url;

const IMAGE_EXTENSIONS: &[&str] =
    &["jpg", "jpeg", "png", "gif", "webp", "svg", "bmp", "tiff"];
const VIDEO_EXTENSIONS: &[&str] =
    &["mp4", "webm", "mov", "avi", "mkv", "m4v", "ogv"];
const AUDIO_EXTENSIONS: &[&str] =
    &["mp3", "ogg", "wav", "m4a", "aac", "flac", "opus"];

const IMAGE_MIMETYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/svg+xml",
    "image/bmp",
    "image/tiff",
];
const VIDEO_MIMETYPES: &[&str] = &[
    "video/mp4",
    "video/webm",
    "video/quicktime",
    "video/x-msvideo",
    "video/x-matroska",
    "video/ogg",
];
const AUDIO_MIMETYPES: &[&str] = &[
    "audio/mpeg",
    "audio/ogg",
    "audio/wav",
    "audio/mp4",
    "audio/aac",
    "audio/flac",
    "audio/opus",
];

/// Declared kind of a remote media resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    #[default]
    Unknown,
}

impl MediaKind {
    pub const ALL: [Self; 4] =
        [Self::Image, Self::Video, Self::Audio, Self::Unknown];

    /// Detect the kind of a resource.
    ///
    /// An explicit MIME type wins, then the extension of the URL path.
    pub fn detect(url: &str, mime: Option<&str>) -> Self {
        if let Some(kind) = mime.and_then(Self::from_mime) {
            return kind;
        }
        Self::from_extension(&file_extension(url))
    }

    pub fn from_mime(mime: &str) -> Option<Self> {
        let mime = mime
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if IMAGE_MIMETYPES.contains(&mime.as_str()) {
            Some(Self::Image)
        } else if VIDEO_MIMETYPES.contains(&mime.as_str()) {
            Some(Self::Video)
        } else if AUDIO_MIMETYPES.contains(&mime.as_str()) {
            Some(Self::Audio)
        } else {
            None
        }
    }

    pub fn from_extension(ext: &str) -> Self {
        let ext = ext.to_ascii_lowercase();
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Self::Image
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Self::Video
        } else if AUDIO_EXTENSIONS.contains(&ext.as_str()) {
            Self::Audio
        } else {
            Self::Unknown
        }
    }

    /// Map a Mastodon attachment `type` field. `gifv` attachments are
    /// looping mp4 files, so they are treated as video.
    pub fn from_attachment_type(kind: &str) -> Self {
        match kind.trim().to_ascii_lowercase().as_str() {
            "image" => Self::Image,
            "video" | "gifv" => Self::Video,
            "audio" => Self::Audio,
            _ => Self::Unknown,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Unknown => "unknown",
        }
    }

    /// Human label used when the resource has no description.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Image => "Image",
            Self::Video => "Video",
            Self::Audio => "Audio",
            Self::Unknown => "Media file",
        }
    }

    pub const fn icon(self) -> &'static str {
        match self {
            Self::Image => "🖼",
            Self::Video => "🎬",
            Self::Audio => "🎵",
            Self::Unknown => "📎",
        }
    }

    pub fn is_supported(self) -> bool {
        self != Self::Unknown
    }

    /// Only still images can be drawn inside the terminal.
    pub fn can_display_inline(self) -> bool {
        self == Self::Image
    }
}

impl Display for MediaKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MediaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "image" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            "audio" => Ok(Self::Audio),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("unknown media kind '{other}'")),
        }
    }
}

/// Lowercased extension of the last path segment, without the dot.
///
/// Query strings and fragments are ignored. Returns an empty string when
/// the path has no extension.
pub fn file_extension(url: &str) -> String {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    };
    let segment = path.rsplit('/').next().unwrap_or_default();
    match segment.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ext.to_ascii_lowercase(),
        _ => String::new(),
    }
}
