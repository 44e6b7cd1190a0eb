//! LibRaw access
//!
//! Demosaicing runs inside the worker process. [`read_camera_info`] is the
//! only call made in the host, and callers gate it on a RAW header sniff.

use crate::error::{ConversionError, Result};
use chrono::NaiveDateTime;
use image::codecs::tiff::TiffEncoder;
use image::{ExtendedColorType, ImageEncoder};
use rsraw::{GpsInfo, RawImage, BIT_DEPTH_8};
use std::io::Cursor;
use tracing::debug;

/// LibRaw's AHD interpolation quality index
const AHD_INTERPOLATION: i32 = 3;

/// LibRaw demosaic engine with the editing preset: camera white balance,
/// no auto-brightness, full size, AHD, 8-bit sRGB
#[derive(Debug, Default, Clone, Copy)]
pub struct RawProcessor;

/// Camera fields LibRaw decodes from the container and its maker notes.
/// Empty strings and zeros mean "not recorded".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CameraInfo {
    pub make: String,
    pub model: String,
    pub lens_make: String,
    pub lens_model: String,
    pub iso: u32,
    /// Seconds
    pub shutter: f32,
    pub aperture: f32,
    /// Millimetres
    pub focal_length: f32,
    pub captured_at: Option<NaiveDateTime>,
    /// Signed decimal degrees, (latitude, longitude)
    pub gps: Option<(f64, f64)>,
}

/// Open a RAW buffer and read its identification and exposure fields
pub fn read_camera_info(buffer: &[u8]) -> Result<CameraInfo> {
    let raw = RawImage::open(buffer)
        .map_err(|e| ConversionError::Decode(format!("Failed to open RAW file: {:?}", e)))?;

    let lens = raw.lens_info();
    let gps = raw.gps();

    Ok(CameraInfo {
        make: raw.make().trim().to_string(),
        model: raw.model().trim().to_string(),
        lens_make: lens.lens_make.trim().to_string(),
        lens_model: lens.lens_name.trim().to_string(),
        iso: raw.iso_speed(),
        shutter: raw.shutter(),
        aperture: raw.aperture(),
        focal_length: raw.focal_len(),
        captured_at: raw
            .datetime()
            .filter(|dt| dt.timestamp() > 0)
            .map(|dt| dt.naive_local()),
        gps: (gps != GpsInfo::default())
            .then(|| (dms_to_degrees(gps.latitude), dms_to_degrees(gps.longitude))),
    })
}

/// LibRaw signs every component, so the sum keeps the hemisphere
fn dms_to_degrees(dms: [f32; 3]) -> f64 {
    dms[0] as f64 + dms[1] as f64 / 60.0 + dms[2] as f64 / 3600.0
}

/// 8-bit interleaved RGB straight out of LibRaw
#[derive(Debug, Clone)]
pub struct DemosaicedImage {
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
}

impl DemosaicedImage {
    /// Encode as an uncompressed RGB TIFF for the trip back to the host
    pub fn to_tiff(&self) -> Result<Vec<u8>> {
        let mut out = Cursor::new(Vec::new());
        TiffEncoder::new(&mut out)
            .write_image(&self.rgb, self.width, self.height, ExtendedColorType::Rgb8)
            .map_err(|e| ConversionError::Encode(format!("TIFF encode failed: {}", e)))?;
        Ok(out.into_inner())
    }
}

impl RawProcessor {
    pub fn new() -> Self {
        Self
    }

    /// Open, unpack and demosaic a RAW container held in memory
    pub fn demosaic(&self, file_data: &[u8]) -> Result<DemosaicedImage> {
        let mut raw = RawImage::open(file_data).map_err(|e| {
            ConversionError::Decode(format!("Failed to open RAW file: {:?}", e))
        })?;

        apply_editing_preset(&mut raw);

        raw.unpack()
            .map_err(|e| ConversionError::Decode(format!("Failed to unpack RAW: {:?}", e)))?;

        let processed = raw
            .process::<BIT_DEPTH_8>()
            .map_err(|e| ConversionError::Decode(format!("Failed to process RAW: {:?}", e)))?;

        let width = processed.width();
        let height = processed.height();
        let channels = processed.colors() as usize;
        let pixels: &[u8] = &processed;

        debug!(width, height, channels, "LibRaw demosaic complete");

        let rgb = to_rgb(pixels, width, height, channels)?;
        Ok(DemosaicedImage { width, height, rgb })
    }
}

fn apply_editing_preset(raw: &mut RawImage) {
    let libraw_data: &mut rsraw_sys::libraw_data_t = raw.as_mut();
    let params = &mut libraw_data.params;

    params.use_camera_wb = 1;
    // Respect the photographer's exposure
    params.no_auto_bright = 1;
    params.bright = 1.0;
    params.highlight = 0;
    params.half_size = 0;
    params.user_qual = AHD_INTERPOLATION;

    // sRGB, 8 bits per sample
    params.output_color = 1;
    params.output_bps = 8;
}

/// Normalise LibRaw output (1 or 3+ colours) to packed RGB
fn to_rgb(pixels: &[u8], width: u32, height: u32, channels: usize) -> Result<Vec<u8>> {
    let pixel_count = width as usize * height as usize;
    if pixel_count == 0 {
        return Err(ConversionError::Decode("LibRaw produced an empty image".to_string()));
    }

    let expected = pixel_count * channels;
    if channels == 0 || pixels.len() < expected {
        return Err(ConversionError::Decode(format!(
            "LibRaw output too short: {} bytes for {}x{}x{}",
            pixels.len(),
            width,
            height,
            channels
        )));
    }

    let rgb = match channels {
        3 => pixels[..expected].to_vec(),
        1 => pixels[..expected].iter().flat_map(|&v| [v, v, v]).collect(),
        n if n > 3 => pixels[..expected]
            .chunks_exact(n)
            .flat_map(|px| [px[0], px[1], px[2]])
            .collect(),
        n => {
            return Err(ConversionError::Decode(format!(
                "unsupported LibRaw channel count {}",
                n
            )))
        }
    };
    Ok(rgb)
}
