use url::Url;

use crate::{
    error::Result,
    format::MediaKind,
    key::ResourceKey,
};

/// One remote media resource attached to a feed item.
///
/// Constructed per feed item at render time and immutable afterwards; the
/// builder-style `with_*` methods consume and return a new value. Identity is
/// the [`ResourceKey`]: equality and hashing ignore the hints.
#[derive(Debug, Clone)]
pub struct MediaRef {
    key: ResourceKey,
    url: Url,
    kind: MediaKind,
    size_hint: Option<u64>,
    description: Option<String>,
}

impl MediaRef {
    /// Create a reference with an explicit kind.
    pub fn new(url: &str, kind: MediaKind) -> Result<Self> {
        let (url, key) = ResourceKey::parse_url(url)?;
        Ok(Self {
            key,
            url,
            kind,
            size_hint: None,
            description: None,
        })
    }

    /// Create a reference whose kind is detected from the URL and MIME type.
    pub fn detect(url: &str, mime: Option<&str>) -> Result<Self> {
        Self::new(url, MediaKind::detect(url, mime))
    }

    /// Create a reference from the fields of a Mastodon attachment.
    ///
    /// The attachment `type` is trusted unless it is `unknown`, in which case
    /// the URL extension decides.
    pub fn from_attachment(
        url: &str,
        attachment_type: &str,
        description: Option<&str>,
    ) -> Result<Self> {
        let kind = match MediaKind::from_attachment_type(attachment_type) {
            MediaKind::Unknown => MediaKind::detect(url, None),
            kind => kind,
        };
        let media = Self::new(url, kind)?;
        Ok(match description {
            Some(text) => media.with_description(text),
            None => media,
        })
    }

    pub fn with_size_hint(mut self, bytes: u64) -> Self {
        self.size_hint = Some(bytes);
        self
    }

    pub fn with_description(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        let trimmed = text.trim();
        self.description = (!trimmed.is_empty()).then(|| trimmed.to_string());
        self
    }

    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn size_hint(&self) -> Option<u64> {
        self.size_hint
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Accessibility text, falling back to the kind label.
    pub fn alt_text(&self) -> &str {
        self.description().unwrap_or(self.kind.label())
    }
}

impl PartialEq for MediaRef {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for MediaRef {}

impl std::hash::Hash for MediaRef {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}
