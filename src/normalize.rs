//! Editing normalization policy
//!
//! Decides per upload whether RAW conversion is needed before the bytes go
//! to the image-edit collaborator. Non-RAW files pass through untouched and
//! undecoded; their byte length is read off the base64 text.
//! RAW files get a high-quality conversion, then one preview-mode retry,
//! then a user-facing "convert manually" error.
//!
//! Also hosts the server-side RAW preview used by upload screens.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, warn};

use crate::convert::{
    ConversionOptions, ConversionRequest, ConversionResult, ConversionSource, RawConverter,
};
use crate::error::{ConversionError, Result};
use crate::formats::file_extension;

const RAW_NAME_PATTERN: &str = r"(?i)\.(arw|cr2|cr3|nef|orf|pef|raf|rw2|sr2|dng)$";

/// Upload as it arrives from the client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagePayload {
    pub file_name: String,
    pub base64: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NormalizedFormat {
    Jpeg,
    Png,
    Webp,
}

impl NormalizedFormat {
    /// png / webp by extension, everything else jpeg
    pub fn from_file_name(file_name: &str) -> Self {
        match file_extension(file_name).as_str() {
            "png" => NormalizedFormat::Png,
            "webp" => NormalizedFormat::Webp,
            _ => NormalizedFormat::Jpeg,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            NormalizedFormat::Jpeg => "image/jpeg",
            NormalizedFormat::Png => "image/png",
            NormalizedFormat::Webp => "image/webp",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedImage {
    pub base64: String,
    pub file_name: String,
    pub normalized_format: NormalizedFormat,
    pub normalized_mime_type: &'static str,
    pub original_byte_length: usize,
    pub normalized_byte_length: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_conversion_source: Option<ConversionSource>,
}

impl NormalizedImage {
    fn from_conversion(result: ConversionResult, original_byte_length: usize) -> Self {
        Self {
            normalized_byte_length: result.bytes.len(),
            base64: result.base64,
            file_name: result.file_name,
            normalized_format: NormalizedFormat::Jpeg,
            normalized_mime_type: result.mime_type,
            original_byte_length,
            raw_conversion_source: Some(result.source),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawPreview {
    pub preview_data_url: String,
    pub source: ConversionSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

pub struct EditingNormalizer {
    converter: Arc<RawConverter>,
    raw_name: Regex,
    preview_edge: u32,
}

impl EditingNormalizer {
    pub fn new(converter: Arc<RawConverter>, preview_edge: u32) -> Result<Self> {
        let raw_name = Regex::new(RAW_NAME_PATTERN)
            .map_err(|e| ConversionError::InvalidInput(format!("RAW name pattern: {}", e)))?;

        Ok(Self {
            converter,
            raw_name,
            preview_edge,
        })
    }

    pub fn is_raw_name(&self, file_name: &str) -> bool {
        self.raw_name.is_match(file_name)
    }

    pub async fn normalize_for_editing(&self, payload: &ImagePayload) -> Result<NormalizedImage> {
        if !self.is_raw_name(&payload.file_name) {
            let format = NormalizedFormat::from_file_name(&payload.file_name);
            let byte_length = base64_byte_length(&payload.base64);
            return Ok(NormalizedImage {
                base64: payload.base64.clone(),
                file_name: payload.file_name.clone(),
                normalized_format: format,
                normalized_mime_type: format.mime_type(),
                original_byte_length: byte_length,
                normalized_byte_length: byte_length,
                raw_conversion_source: None,
            });
        }

        let original = decode_payload(payload)?;
        let original_byte_length = original.len();

        let mut request = ConversionRequest {
            bytes: original,
            file_name: payload.file_name.clone(),
            options: ConversionOptions::high_quality(),
        };

        let first_error = match self.converter.convert(&request).await {
            Ok(result) => return Ok(NormalizedImage::from_conversion(result, original_byte_length)),
            Err(e) => e,
        };
        warn!(
            "High-quality RAW conversion failed for {}, retrying in preview mode: {}",
            payload.file_name, first_error
        );

        request.options = ConversionOptions::preview(None);
        match self.converter.convert(&request).await {
            Ok(result) => Ok(NormalizedImage::from_conversion(result, original_byte_length)),
            Err(fallback_error) => {
                error!(
                    "RAW conversion fallback also failed for {}: {}",
                    payload.file_name, fallback_error
                );
                Err(ConversionError::ManualConversionRequired {
                    file_name: payload.file_name.clone(),
                })
            }
        }
    }

    /// Preview-mode conversion as a data URL; `None` (logged) on failure
    pub async fn generate_preview(&self, payload: &ImagePayload) -> Option<RawPreview> {
        let bytes = match decode_payload(payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Server RAW preview rejected {}: {}", payload.file_name, e);
                return None;
            }
        };

        let request = ConversionRequest {
            bytes,
            file_name: payload.file_name.clone(),
            options: ConversionOptions::preview(Some(self.preview_edge)),
        };

        match self.converter.convert(&request).await {
            Ok(result) => Some(RawPreview {
                preview_data_url: format!("data:{};base64,{}", result.mime_type, result.base64),
                source: result.source,
                width: result.dimensions.map(|(w, _)| w),
                height: result.dimensions.map(|(_, h)| h),
            }),
            Err(e) => {
                warn!("Server RAW preview generation failed for {}: {}", payload.file_name, e);
                None
            }
        }
    }
}

/// Decoded size of a base64 string, counted without decoding it
fn base64_byte_length(data: &str) -> usize {
    let symbols = data.bytes().filter(|b| !b.is_ascii_whitespace()).count();
    let padding = data.trim_end().bytes().rev().take_while(|b| *b == b'=').count().min(2);
    (symbols * 3 / 4).saturating_sub(padding)
}

fn decode_payload(payload: &ImagePayload) -> Result<Vec<u8>> {
    STANDARD.decode(payload.base64.trim().as_bytes()).map_err(|e| {
        ConversionError::InvalidInput(format!("{} is not valid base64: {}", payload.file_name, e))
    })
}
