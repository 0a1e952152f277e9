use tootles_model::MediaKind;

use crate::config::ViewerCommand;

/// What to try first for a payload, before decoding has happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Plan {
    /// Decode and draw inline; `fallback` is used if decoding fails.
    Inline { fallback: Option<ViewerCommand> },
    /// Hand the resource to an external viewer.
    External(ViewerCommand),
    /// Nothing can show it here.
    Placeholder,
}

/// First half of the decision table: inline capability and viewer
/// availability. Decode success is applied in [`after_decode`].
pub(crate) fn plan(
    kind: MediaKind,
    inline_capable: bool,
    viewer: Option<&ViewerCommand>,
) -> Plan {
    match (inline_capable && kind.can_display_inline(), viewer) {
        (true, viewer) => Plan::Inline {
            fallback: viewer.cloned(),
        },
        (false, Some(viewer)) => Plan::External(viewer.clone()),
        (false, None) => Plan::Placeholder,
    }
}

/// Outcome class once decoding has been attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DecodeResult {
    Ok,
    /// Recognised container but the data is broken.
    Broken,
    /// Format not recognised or not supported by the decoder.
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Decision {
    Inline,
    External(ViewerCommand),
    Placeholder,
    /// Placeholder plus a retry hint; the next request decodes again.
    Retry,
}

/// Second half of the decision table.
///
/// | decode      | viewer | result      |
/// |-------------|--------|-------------|
/// | ok          | any    | inline      |
/// | broken      | yes    | external    |
/// | broken      | no     | retry later |
/// | unsupported | yes    | external    |
/// | unsupported | no     | placeholder |
pub(crate) fn after_decode(
    result: DecodeResult,
    fallback: Option<&ViewerCommand>,
) -> Decision {
    match (result, fallback) {
        (DecodeResult::Ok, _) => Decision::Inline,
        (_, Some(viewer)) => Decision::External(viewer.clone()),
        (DecodeResult::Broken, None) => Decision::Retry,
        (DecodeResult::Unsupported, None) => Decision::Placeholder,
    }
}

#[cfg(test)]
mod tests {
    use super::{Decision, DecodeResult, Plan, after_decode, plan};
    use crate::config::ViewerCommand;
    use tootles_model::MediaKind;

    #[test]
    fn images_decode_inline_only_with_capability() {
        let feh = ViewerCommand::new("feh").unwrap();
        assert_eq!(
            plan(MediaKind::Image, true, Some(&feh)),
            Plan::Inline {
                fallback: Some(feh.clone())
            }
        );
        assert_eq!(
            plan(MediaKind::Image, false, Some(&feh)),
            Plan::External(feh)
        );
        assert_eq!(plan(MediaKind::Image, false, None), Plan::Placeholder);
    }

    #[test]
    fn non_image_kinds_never_decode() {
        let mpv = ViewerCommand::new("mpv").unwrap();
        assert_eq!(plan(MediaKind::Video, true, Some(&mpv)), Plan::External(mpv));
        assert_eq!(plan(MediaKind::Audio, true, None), Plan::Placeholder);
        assert_eq!(plan(MediaKind::Unknown, true, None), Plan::Placeholder);
    }

    #[test]
    fn failed_decodes_never_fail_the_request() {
        assert_eq!(
            after_decode(DecodeResult::Unsupported, None),
            Decision::Placeholder
        );
        assert_eq!(after_decode(DecodeResult::Broken, None), Decision::Retry);
        let feh = ViewerCommand::new("feh").unwrap();
        assert_eq!(
            after_decode(DecodeResult::Broken, Some(&feh)),
            Decision::External(feh)
        );
    }
}
