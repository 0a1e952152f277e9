use image::{GenericImageView, ImageError, imageops::FilterType};

use crate::error::RenderError;

/// RGBA8 pixels, row-major, `width * height * 4` bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct RgbaThumbnail {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl std::fmt::Debug for RgbaThumbnail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RgbaThumbnail")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("pixels", &self.pixels.len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Decoded {
    pub width: u32,
    pub height: u32,
    pub thumbnail: RgbaThumbnail,
}

/// Decode `bytes` and scale them to fit `max_edge`, keeping the aspect ratio.
///
/// CPU bound; callers run it on the blocking pool.
pub(crate) fn decode_thumbnail(
    bytes: &[u8],
    max_edge: u32,
) -> Result<Decoded, RenderError> {
    let format = image::guess_format(bytes)
        .map_err(|e| RenderError::UnsupportedFormat(e.to_string()))?;
    let img = image::load_from_memory_with_format(bytes, format).map_err(|e| match e
    {
        ImageError::Unsupported(err) => RenderError::UnsupportedFormat(err.to_string()),
        other => RenderError::DecodeFailure(other.to_string()),
    })?;

    let (width, height) = img.dimensions();
    let max_edge = max_edge.max(1);
    let scaled = if width > max_edge || height > max_edge {
        img.resize(max_edge, max_edge, FilterType::Lanczos3)
    } else {
        img
    };
    let rgba = scaled.to_rgba8();

    Ok(Decoded {
        width,
        height,
        thumbnail: RgbaThumbnail {
            width: rgba.width(),
            height: rgba.height(),
            pixels: rgba.into_raw(),
        },
    })
}

const CACHED_MAGIC: [u8; 4] = *b"TTH1";
const CACHED_HEADER_LEN: usize = 20;

/// Serialize a decoded thumbnail for the memory tier: magic, then source
/// width and height, thumbnail width and height (`u32` little endian), then
/// the RGBA pixels.
pub(crate) fn pack(
    width: u32,
    height: u32,
    thumbnail: &RgbaThumbnail,
) -> Vec<u8> {
    let len = CACHED_HEADER_LEN + thumbnail.pixels.len();
    let mut out = Vec::with_capacity(len);
    out.extend_from_slice(&CACHED_MAGIC);
    for dim in [width, height, thumbnail.width, thumbnail.height] {
        out.extend_from_slice(&dim.to_le_bytes());
    }
    out.extend_from_slice(&thumbnail.pixels);
    out
}

/// Inverse of [`pack`]; `None` when the blob is not a complete thumbnail.
pub(crate) fn unpack(blob: &[u8]) -> Option<Decoded> {
    let (header, pixels) = blob.split_at_checked(CACHED_HEADER_LEN)?;
    let (magic, dims) = header.split_at(CACHED_MAGIC.len());
    if magic != CACHED_MAGIC {
        return None;
    }
    let mut dims = dims
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]));
    let (width, height) = (dims.next()?, dims.next()?);
    let (thumb_width, thumb_height) = (dims.next()?, dims.next()?);

    let expected = u64::from(thumb_width) * u64::from(thumb_height) * 4;
    if pixels.len() as u64 != expected {
        return None;
    }
    Some(Decoded {
        width,
        height,
        thumbnail: RgbaThumbnail {
            width: thumb_width,
            height: thumb_height,
            pixels: pixels.to_vec(),
        },
    })
}
