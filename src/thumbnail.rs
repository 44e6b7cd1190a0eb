//! Embedded-thumbnail fast path
//!
//! Most RAW containers carry a camera-rendered JPEG preview. Pulling it out
//! costs no demosaic. TIFF-based containers are read in pure Rust first;
//! LibRaw is only opened for bytes that carry a known RAW header. Any miss or
//! failure is logged and reported as `None`.

use rsraw::{RawImage, ThumbFormat};
use tracing::{debug, warn};

use crate::formats::{sniff_raw_container, RawContainer};
use crate::metadata::embedded_jpeg;

/// Largest embedded JPEG, or `None` when absent, empty or unreadable
pub fn try_extract_thumbnail(buffer: &[u8]) -> Option<Vec<u8>> {
    if let Some(jpeg) = embedded_jpeg(buffer) {
        debug!(bytes = jpeg.len(), "Using IFD1 JPEG thumbnail");
        return Some(jpeg);
    }

    match sniff_raw_container(buffer) {
        Some(container) => libraw_thumbnail(buffer, container),
        None => {
            debug!("No RAW header, skipping LibRaw thumbnail lookup");
            None
        }
    }
}

fn libraw_thumbnail(buffer: &[u8], container: RawContainer) -> Option<Vec<u8>> {
    let mut raw = match RawImage::open(buffer) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("Thumbnail extraction could not open {:?} RAW: {:?}", container, e);
            return None;
        }
    };

    let thumbs = match raw.extract_thumbs() {
        Ok(thumbs) => thumbs,
        Err(e) => {
            warn!("Thumbnail extraction failed: {:?}", e);
            return None;
        }
    };

    let best = thumbs
        .into_iter()
        .filter(|thumb| matches!(thumb.format, ThumbFormat::Jpeg))
        .max_by_key(|thumb| (thumb.width as u64) * (thumb.height as u64))?;

    if best.data.is_empty() {
        debug!("Embedded thumbnail contained no data");
        return None;
    }

    debug!(
        width = best.width,
        height = best.height,
        bytes = best.data.len(),
        "Using embedded JPEG thumbnail"
    );
    Some(best.data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::fixtures::{camera_tiff, tiny_jpeg};

    #[test]
    fn test_non_raw_input_is_a_miss() {
        assert!(try_extract_thumbnail(b"plain text, not a camera file").is_none());
        assert!(try_extract_thumbnail(b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR").is_none());
        assert!(try_extract_thumbnail(&tiny_jpeg()).is_none());
        assert!(try_extract_thumbnail(&[]).is_none());
    }

    #[test]
    fn test_ifd1_jpeg_found_without_libraw() {
        let jpeg = tiny_jpeg();
        assert_eq!(try_extract_thumbnail(&camera_tiff(&jpeg, true)), Some(jpeg.clone()));

        let mut rw2 = camera_tiff(&jpeg, true);
        rw2[..4].copy_from_slice(b"IIU\0");
        assert_eq!(try_extract_thumbnail(&rw2), Some(jpeg));
    }
}
