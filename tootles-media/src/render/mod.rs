//! Turns cached bytes into something the UI can mount.
//!
//! The renderer never spawns viewer processes and never blocks the caller
//! for longer than the configured decode slice: slow decodes finish on the
//! blocking pool and are delivered through [`PendingRender`].

mod decode;
mod placeholder;
mod strategy;

pub use decode::RgbaThumbnail;
pub use placeholder::{Placeholder, status};

use std::{fmt, time::Duration};

use tokio::{sync::oneshot, task::JoinError};
use tootles_model::{MediaKind, MediaRef};
use tracing::debug;

use crate::{
    cache::Payload,
    config::{MediaConfig, RenderSettings, ViewerCommand, ViewerMap},
    error::{FetchError, RenderError},
};
use decode::{Decoded, decode_thumbnail};
use strategy::{Decision, DecodeResult, Plan};

/// Raster preview drawn inside the terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    /// Dimensions of the source image.
    pub width: u32,
    pub height: u32,
    pub thumbnail: RgbaThumbnail,
    pub alt_text: String,
}

impl InlineImage {
    /// Compact form kept in the memory tier; alt text is not included.
    pub fn to_cached_bytes(&self) -> Vec<u8> {
        decode::pack(self.width, self.height, &self.thumbnail)
    }
}

/// Intent to open the resource in an external program on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalView {
    pub command: ViewerCommand,
    pub kind: MediaKind,
    /// What the viewer should open (the resource URL).
    pub target: String,
    pub alt_text: String,
}

impl ExternalView {
    pub fn argv(&self) -> Vec<String> {
        self.command.argv(&self.target)
    }

    /// Hint line, e.g. "▶ press enter to play".
    pub fn hint(&self) -> &'static str {
        match self.kind {
            MediaKind::Image => "👁 press enter to view",
            MediaKind::Video => "▶ press enter to play",
            MediaKind::Audio => "🔊 press enter to play",
            MediaKind::Unknown => "🔗 press enter to open",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Presentation {
    Inline(InlineImage),
    External(ExternalView),
}

/// Decode still running after the caller's slice ran out.
#[derive(Debug)]
pub struct PendingRender(oneshot::Receiver<RenderOutcome>);

impl PendingRender {
    pub async fn wait(self) -> RenderOutcome {
        match self.0.await {
            Ok(outcome) => outcome,
            Err(_) => RenderOutcome::Failed(RenderFailure {
                error: RenderError::DecodeFailure("decode task dropped".into()),
                placeholder: None,
            }),
        }
    }

    /// Let `inspect` see the outcome before it is delivered. Runs even if
    /// the returned handle is dropped without waiting.
    pub(crate) fn inspect<F>(self, inspect: F) -> Self
    where
        F: FnOnce(&RenderOutcome) + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let outcome = self.wait().await;
            inspect(&outcome);
            let _ = tx.send(outcome);
        });
        Self(rx)
    }
}

#[derive(Debug)]
pub struct Deferred {
    pub placeholder: Placeholder,
    /// Set when trying again later may help.
    pub retry_after: Option<Duration>,
    /// Present when a result is still on its way.
    pub pending: Option<PendingRender>,
}

impl fmt::Display for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.placeholder)?;
        if let Some(after) = self.retry_after {
            write!(f, "\n↻ retry in {}s", after.as_secs().max(1))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderFailure {
    pub error: RenderError,
    pub placeholder: Option<Placeholder>,
}

/// Result of one render request.
#[derive(Debug)]
pub enum RenderOutcome {
    Rendered(Presentation),
    Deferred(Deferred),
    Failed(RenderFailure),
}

impl RenderOutcome {
    pub fn is_rendered(&self) -> bool {
        matches!(self, RenderOutcome::Rendered(_))
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, RenderOutcome::Deferred(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, RenderOutcome::Failed(_))
    }

    /// One-line summary for logs and the CLI.
    pub fn summary(&self) -> String {
        match self {
            RenderOutcome::Rendered(Presentation::Inline(img)) => format!(
                "inline {}x{} (thumbnail {}x{})",
                img.width, img.height, img.thumbnail.width, img.thumbnail.height
            ),
            RenderOutcome::Rendered(Presentation::External(view)) => {
                format!("external: {}", view.argv().join(" "))
            }
            RenderOutcome::Deferred(deferred) => {
                format!("deferred: {}", deferred.placeholder.status)
            }
            RenderOutcome::Failed(failure) => {
                format!("failed: {}", failure.error)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Renderer {
    settings: RenderSettings,
    inline_images: bool,
    viewers: ViewerMap,
}

impl Renderer {
    pub fn new(
        settings: RenderSettings,
        inline_images: bool,
        viewers: ViewerMap,
    ) -> Self {
        Self {
            settings,
            inline_images,
            viewers,
        }
    }

    pub fn from_config(config: &MediaConfig) -> Self {
        Self::new(
            config.render.clone(),
            config.inline_images,
            config.viewers.clone(),
        )
    }

    pub fn viewers(&self) -> &ViewerMap {
        &self.viewers
    }

    /// Whether `kind` is decoded into an inline thumbnail here.
    pub fn renders_inline(&self, kind: MediaKind) -> bool {
        self.inline_images && kind.can_display_inline()
    }

    /// Render `bytes` (already fetched for `media`) as `kind`.
    pub async fn render(
        &self,
        media: &MediaRef,
        bytes: Payload,
        kind: MediaKind,
    ) -> RenderOutcome {
        if bytes.is_empty() {
            return self.corrupt(media, kind, "zero-length payload");
        }

        let viewer = self.viewers.get(kind);
        match strategy::plan(kind, self.inline_images, viewer) {
            Plan::External(viewer) => self.external(media, kind, viewer),
            Plan::Placeholder => {
                self.unsupported(media, kind, status::NO_VIEWER)
            }
            Plan::Inline { fallback } => {
                self.decode_within_slice(media, bytes, kind, fallback).await
            }
        }
    }

    /// Inline result rebuilt from a thumbnail kept by
    /// [`InlineImage::to_cached_bytes`]. `None` if the blob is unusable.
    pub fn render_cached_thumbnail(
        &self,
        media: &MediaRef,
        blob: &[u8],
    ) -> Option<RenderOutcome> {
        let decoded = decode::unpack(blob)?;
        Some(self.inline(media, decoded))
    }

    async fn decode_within_slice(
        &self,
        media: &MediaRef,
        bytes: Payload,
        kind: MediaKind,
        fallback: Option<ViewerCommand>,
    ) -> RenderOutcome {
        let max_edge = self.settings.thumbnail_max_edge;
        let mut job = tokio::task::spawn_blocking(move || {
            decode_thumbnail(&bytes, max_edge)
        });

        match tokio::time::timeout(self.settings.decode_slice, &mut job).await {
            Ok(joined) => {
                self.after_decode(media, kind, fallback.as_ref(), joined)
            }
            Err(_) => {
                debug!(
                    key = %media.key().short(),
                    "decode exceeded slice; deferring"
                );
                let (tx, rx) = oneshot::channel();
                let renderer = self.clone();
                let media_for_job = media.clone();
                tokio::spawn(async move {
                    let joined = job.await;
                    let outcome = renderer.after_decode(
                        &media_for_job,
                        kind,
                        fallback.as_ref(),
                        joined,
                    );
                    let _ = tx.send(outcome);
                });
                RenderOutcome::Deferred(Deferred {
                    placeholder: Placeholder::new(media, status::DECODING)
                        .with_kind(kind),
                    retry_after: Some(self.settings.retry_after),
                    pending: Some(PendingRender(rx)),
                })
            }
        }
    }

    fn after_decode(
        &self,
        media: &MediaRef,
        kind: MediaKind,
        fallback: Option<&ViewerCommand>,
        joined: Result<Result<Decoded, RenderError>, JoinError>,
    ) -> RenderOutcome {
        let (result, decoded, error) = match joined {
            Ok(Ok(decoded)) => (DecodeResult::Ok, Some(decoded), None),
            Ok(Err(err @ RenderError::UnsupportedFormat(_))) => {
                (DecodeResult::Unsupported, None, Some(err))
            }
            Ok(Err(err)) => (DecodeResult::Broken, None, Some(err)),
            Err(join) => {
                let reason = format!("decoder aborted: {join}");
                let err = RenderError::DecodeFailure(reason);
                (DecodeResult::Broken, None, Some(err))
            }
        };
        if let Some(err) = &error {
            debug!(key = %media.key().short(), "inline decode failed: {err}");
        }

        match (strategy::after_decode(result, fallback), decoded) {
            (Decision::Inline, Some(decoded)) => self.inline(media, decoded),
            (Decision::External(viewer), _) => {
                self.external(media, kind, viewer)
            }
            (Decision::Retry, _) => RenderOutcome::Deferred(Deferred {
                placeholder: Placeholder::new(media, status::UNDECODABLE)
                    .with_kind(kind),
                retry_after: Some(self.settings.retry_after),
                pending: None,
            }),
            _ => self.unsupported(media, kind, status::UNSUPPORTED_FORMAT),
        }
    }

    fn inline(&self, media: &MediaRef, decoded: Decoded) -> RenderOutcome {
        RenderOutcome::Rendered(Presentation::Inline(InlineImage {
            width: decoded.width,
            height: decoded.height,
            thumbnail: decoded.thumbnail,
            alt_text: media.alt_text().to_string(),
        }))
    }

    fn external(
        &self,
        media: &MediaRef,
        kind: MediaKind,
        command: ViewerCommand,
    ) -> RenderOutcome {
        RenderOutcome::Rendered(Presentation::External(ExternalView {
            command,
            kind,
            target: media.url().to_string(),
            alt_text: media.alt_text().to_string(),
        }))
    }

    fn unsupported(
        &self,
        media: &MediaRef,
        kind: MediaKind,
        status: &str,
    ) -> RenderOutcome {
        RenderOutcome::Deferred(Deferred {
            placeholder: Placeholder::new(media, status).with_kind(kind),
            retry_after: None,
            pending: None,
        })
    }

    fn corrupt(
        &self,
        media: &MediaRef,
        kind: MediaKind,
        reason: &str,
    ) -> RenderOutcome {
        RenderOutcome::Failed(RenderFailure {
            error: RenderError::CorruptPayload(reason.to_string()),
            placeholder: Some(
                Placeholder::new(media, status::CORRUPT).with_kind(kind),
            ),
        })
    }

    /// Placeholder for a fetch that could not complete. Transient causes
    /// carry a retry hint.
    pub fn fetch_failed(
        &self,
        media: &MediaRef,
        error: &FetchError,
    ) -> RenderOutcome {
        let status = match error {
            FetchError::Timeout(_) => status::TIMED_OUT,
            FetchError::OversizeResponse { .. } => status::TOO_LARGE,
            FetchError::UnsupportedScheme(_) => status::UNSUPPORTED_LINK,
            _ => status::FAILED_TO_LOAD,
        };
        let retry_after =
            error.is_transient().then_some(self.settings.retry_after);
        RenderOutcome::Deferred(Deferred {
            placeholder: Placeholder::new(media, status),
            retry_after,
            pending: None,
        })
    }

    pub fn disabled(&self, media: &MediaRef) -> RenderOutcome {
        RenderOutcome::Deferred(Deferred {
            placeholder: Placeholder::new(media, status::PREVIEWS_DISABLED),
            retry_after: None,
            pending: None,
        })
    }
}
