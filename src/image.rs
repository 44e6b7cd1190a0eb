//! Raster post-processing
//!
//! Decode any raster the `image` crate understands, auto-rotate from EXIF,
//! fit inside an optional edge, and encode JPEG. Used after the demosaic
//! worker (TIFF in) and as the last-resort direct decode on RAW bytes.
//!
//! ICC and EXIF segments from the source are carried over. When pixels were
//! rotated the EXIF orientation tag is reset to 1 so viewers do not rotate
//! a second time.

use crate::error::{ConversionError, Result};
use fast_image_resize as fr;
use fr::images::Image as FrImage;
use image::codecs::jpeg::JpegEncoder;
use image::metadata::Orientation;
use image::{DynamicImage, ExtendedColorType, ImageDecoder, ImageReader};
use img_parts::jpeg::Jpeg;
use img_parts::{DynImage, ImageEXIF, ImageICC};
use std::io::Cursor;
use tracing::debug;

/// Editing / archival output
pub const ARCHIVAL_QUALITY: u8 = 95;

/// Direct decode of undemosaiced bytes is already degraded
pub const FALLBACK_QUALITY: u8 = 85;

const ORIENTATION_TAG: u16 = 0x0112;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeOptions {
    /// Longest-edge cap; images are never enlarged
    pub max_edge: Option<u32>,
    pub quality: u8,
}

impl EncodeOptions {
    pub fn archival() -> Self {
        Self {
            max_edge: None,
            quality: ARCHIVAL_QUALITY,
        }
    }

    pub fn fallback(max_edge: Option<u32>) -> Self {
        Self {
            max_edge,
            quality: FALLBACK_QUALITY,
        }
    }
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self::archival()
    }
}

#[derive(Debug, Clone)]
pub struct EncodedJpeg {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Decode, orient, constrain and JPEG-encode `buffer`
pub fn encode_jpeg(buffer: &[u8], options: &EncodeOptions) -> Result<EncodedJpeg> {
    let mut decoder = ImageReader::new(Cursor::new(buffer))
        .with_guessed_format()?
        .into_decoder()
        .map_err(|e| ConversionError::Decode(format!("Unsupported image data: {}", e)))?;

    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    let icc_profile = decoder.icc_profile().ok().flatten();

    let mut img = DynamicImage::from_decoder(decoder)
        .map_err(|e| ConversionError::Decode(format!("Failed to decode image: {}", e)))?;

    let rotated = orientation != Orientation::NoTransforms;
    if rotated {
        img.apply_orientation(orientation);
    }

    let rgb = img.to_rgb8();
    let (src_width, src_height) = rgb.dimensions();
    let (width, height) = match options.max_edge {
        Some(edge) => fit_inside(src_width, src_height, edge),
        None => (src_width, src_height),
    };

    let pixels = if (width, height) == (src_width, src_height) {
        rgb.into_raw()
    } else {
        debug!(
            "Resizing {}x{} -> {}x{}",
            src_width, src_height, width, height
        );
        resize_rgb(rgb.into_raw(), src_width, src_height, width, height)?
    };

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, options.quality)
        .encode(&pixels, width, height, ExtendedColorType::Rgb8)
        .map_err(|e| ConversionError::Encode(format!("JPEG encode failed: {}", e)))?;

    let bytes = carry_metadata(jpeg, source_exif(buffer), icc_profile, rotated)?;

    Ok(EncodedJpeg {
        bytes,
        width,
        height,
    })
}

/// Longest edge capped at `max_edge`, aspect preserved, never enlarged
pub fn fit_inside(width: u32, height: u32, max_edge: u32) -> (u32, u32) {
    let longest = width.max(height);
    if longest <= max_edge || max_edge == 0 {
        return (width, height);
    }

    let scale = max_edge as f64 / longest as f64;
    let scaled = |v: u32| ((v as f64 * scale).round() as u32).clamp(1, max_edge);
    (scaled(width), scaled(height))
}

fn resize_rgb(
    rgb: Vec<u8>,
    width: u32,
    height: u32,
    dst_width: u32,
    dst_height: u32,
) -> Result<Vec<u8>> {
    let src_image = FrImage::from_vec_u8(width, height, rgb, fr::PixelType::U8x3)
        .map_err(|e| ConversionError::Encode(format!("Failed to create source image: {:?}", e)))?;

    let mut dst_image = FrImage::new(dst_width, dst_height, src_image.pixel_type());

    let mut resizer = fr::Resizer::new();
    resizer
        .resize(&src_image, &mut dst_image, None)
        .map_err(|e| ConversionError::Encode(format!("Resize failed: {:?}", e)))?;

    Ok(dst_image.buffer().to_vec())
}

/// EXIF block of a JPEG / PNG / WebP source, if any
fn source_exif(buffer: &[u8]) -> Option<Vec<u8>> {
    match DynImage::from_bytes(buffer.to_vec().into()) {
        Ok(Some(image)) => image.exif().map(|exif| exif.to_vec()),
        _ => None,
    }
}

fn carry_metadata(
    jpeg: Vec<u8>,
    exif: Option<Vec<u8>>,
    icc_profile: Option<Vec<u8>>,
    rotated: bool,
) -> Result<Vec<u8>> {
    if exif.is_none() && icc_profile.is_none() {
        return Ok(jpeg);
    }

    let mut out = Jpeg::from_bytes(jpeg.into())
        .map_err(|e| ConversionError::Encode(format!("Failed to re-read encoded JPEG: {}", e)))?;

    if let Some(icc) = icc_profile {
        out.set_icc_profile(Some(icc.into()));
    }

    if let Some(mut exif) = exif {
        if rotated && reset_orientation(&mut exif).is_none() {
            debug!("EXIF orientation tag not found in IFD0");
        }
        out.set_exif(Some(exif.into()));
    }

    Ok(out.encoder().bytes().to_vec())
}

/// Rewrite the IFD0 orientation tag of a TIFF-structured EXIF block to 1
fn reset_orientation(exif: &mut [u8]) -> Option<()> {
    let little_endian = match exif.get(..2)? {
        b"II" => true,
        b"MM" => false,
        _ => return None,
    };

    let read_u16 = |data: &[u8], at: usize| -> Option<u16> {
        let b = data.get(at..at + 2)?;
        Some(if little_endian {
            u16::from_le_bytes([b[0], b[1]])
        } else {
            u16::from_be_bytes([b[0], b[1]])
        })
    };
    let read_u32 = |data: &[u8], at: usize| -> Option<u32> {
        let b = data.get(at..at + 4)?;
        Some(if little_endian {
            u32::from_le_bytes([b[0], b[1], b[2], b[3]])
        } else {
            u32::from_be_bytes([b[0], b[1], b[2], b[3]])
        })
    };

    let ifd0 = read_u32(exif, 4)? as usize;
    let count = read_u16(exif, ifd0)? as usize;

    for i in 0..count {
        let entry = ifd0 + 2 + i * 12;
        if read_u16(exif, entry)? == ORIENTATION_TAG {
            let one = if little_endian {
                1u16.to_le_bytes()
            } else {
                1u16.to_be_bytes()
            };
            exif.get_mut(entry + 8..entry + 10)?.copy_from_slice(&one);
            return Some(());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn jpeg_fixture(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, 90)
            .encode(img.as_raw(), width, height, ExtendedColorType::Rgb8)
            .unwrap();
        out
    }

    /// Big-endian TIFF header + IFD0 holding only Orientation
    fn exif_with_orientation(value: u16) -> Vec<u8> {
        let mut exif = b"MM\0*".to_vec();
        exif.extend_from_slice(&8u32.to_be_bytes());
        exif.extend_from_slice(&1u16.to_be_bytes());
        exif.extend_from_slice(&ORIENTATION_TAG.to_be_bytes());
        exif.extend_from_slice(&3u16.to_be_bytes());
        exif.extend_from_slice(&1u32.to_be_bytes());
        exif.extend_from_slice(&value.to_be_bytes());
        exif.extend_from_slice(&[0, 0]);
        exif.extend_from_slice(&0u32.to_be_bytes());
        exif
    }

    fn with_exif(jpeg: Vec<u8>, exif: Vec<u8>) -> Vec<u8> {
        let mut parsed = Jpeg::from_bytes(jpeg.into()).unwrap();
        parsed.set_exif(Some(exif.into()));
        parsed.encoder().bytes().to_vec()
    }

    #[test]
    fn test_fit_inside() {
        assert_eq!(fit_inside(4000, 3000, 2048), (2048, 1536));
        assert_eq!(fit_inside(3000, 4000, 1600), (1200, 1600));
        // Never enlarge
        assert_eq!(fit_inside(640, 480, 2048), (640, 480));
        assert_eq!(fit_inside(10000, 1, 100), (100, 1));
    }

    #[test]
    fn test_encode_preserves_size_without_cap() {
        let out = encode_jpeg(&jpeg_fixture(64, 48), &EncodeOptions::archival()).unwrap();
        assert_eq!((out.width, out.height), (64, 48));
        assert_eq!(image::guess_format(&out.bytes).unwrap(), image::ImageFormat::Jpeg);
    }

    #[test]
    fn test_encode_constrains_longest_edge() {
        let out = encode_jpeg(&jpeg_fixture(200, 100), &EncodeOptions::fallback(Some(50))).unwrap();
        assert_eq!((out.width, out.height), (50, 25));

        let decoded = image::load_from_memory(&out.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (50, 25));
    }

    #[test]
    fn test_encode_accepts_tiff_input() {
        let img = RgbImage::from_pixel(12, 8, Rgb([10, 200, 30]));
        let mut tiff = Cursor::new(Vec::new());
        img.write_to(&mut tiff, image::ImageFormat::Tiff).unwrap();

        let out = encode_jpeg(tiff.get_ref(), &EncodeOptions::archival()).unwrap();
        assert_eq!((out.width, out.height), (12, 8));
    }

    #[test]
    fn test_rotation_applied_and_orientation_reset() {
        let source = with_exif(jpeg_fixture(40, 20), exif_with_orientation(6));

        let out = encode_jpeg(&source, &EncodeOptions::archival()).unwrap();
        assert_eq!((out.width, out.height), (20, 40));

        let carried = Jpeg::from_bytes(out.bytes.into()).unwrap().exif().unwrap();
        assert_eq!(carried.to_vec(), exif_with_orientation(1));
    }

    #[test]
    fn test_reset_orientation_little_endian() {
        let mut exif = b"II*\0".to_vec();
        exif.extend_from_slice(&8u32.to_le_bytes());
        exif.extend_from_slice(&1u16.to_le_bytes());
        exif.extend_from_slice(&ORIENTATION_TAG.to_le_bytes());
        exif.extend_from_slice(&3u16.to_le_bytes());
        exif.extend_from_slice(&1u32.to_le_bytes());
        exif.extend_from_slice(&8u32.to_le_bytes());
        exif.extend_from_slice(&0u32.to_le_bytes());

        assert!(reset_orientation(&mut exif).is_some());
        assert_eq!(&exif[18..20], &1u16.to_le_bytes());

        assert!(reset_orientation(&mut b"garbage!".to_vec()).is_none());
    }

    #[test]
    fn test_undecodable_input_fails() {
        let err = encode_jpeg(
            b"CR2 bytes a generic decoder cannot read",
            &EncodeOptions::fallback(None),
        );
        assert!(err.is_err());
    }
}
