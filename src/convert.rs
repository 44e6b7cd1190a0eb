//! RAW Conversion Orchestrator
//!
//! Sequences the three decode tiers behind one `convert` call:
//!
//! | Tier | Runs when | Output |
//! |------|-----------|--------|
//! | `Thumbnail` | always, first | embedded JPEG as-is |
//! | `Demosaic` | editing mode or `enforce_high_quality` | worker TIFF -> JPEG q95 |
//! | `RasterFallback` | demosaic skipped or failed | direct decode -> JPEG q85 |
//!
//! Tiers run strictly in order; the first one that yields non-empty bytes
//! wins and tags the result. Only when the last tier fails does the caller
//! see an error.
//!
//! Thumbnail wins even in editing mode. That trades fidelity for speed and
//! is kept as observed behaviour.
//!
//! Thumbnail lookup and JPEG encoding are CPU-bound and run on the blocking
//! pool, each with its own handle to the input buffer.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::ConverterConfig;
use crate::error::{ConversionError, Result};
use crate::formats::replace_extension;
use crate::image::{encode_jpeg, EncodeOptions, EncodedJpeg};
use crate::thumbnail::try_extract_thumbnail;
use crate::worker::DemosaicBridge;

pub const OUTPUT_MIME_TYPE: &str = "image/jpeg";
const OUTPUT_EXTENSION: &str = ".jpg";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionMode {
    Preview,
    #[default]
    Editing,
}

/// Which tier produced the bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConversionSource {
    #[serde(rename = "thumbnail")]
    Thumbnail,
    #[serde(rename = "demosaic")]
    Demosaic,
    #[serde(rename = "sharp")]
    RasterFallback,
}

impl ConversionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversionSource::Thumbnail => "thumbnail",
            ConversionSource::Demosaic => "demosaic",
            ConversionSource::RasterFallback => "sharp",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionOptions {
    pub mode: ConversionMode,
    /// Edge cap for the last-resort tier in preview mode
    pub max_preview_edge: Option<u32>,
    pub enforce_high_quality: bool,
}

impl ConversionOptions {
    pub fn preview(max_preview_edge: Option<u32>) -> Self {
        Self {
            mode: ConversionMode::Preview,
            max_preview_edge,
            enforce_high_quality: false,
        }
    }

    pub fn editing() -> Self {
        Self::default()
    }

    pub fn high_quality() -> Self {
        Self {
            mode: ConversionMode::Editing,
            max_preview_edge: None,
            enforce_high_quality: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub options: ConversionOptions,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversionResult {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub mime_type: &'static str,
    pub source: ConversionSource,
    pub base64: String,
    /// Pixel size when the tier re-encoded; embedded thumbnails are not decoded
    pub dimensions: Option<(u32, u32)>,
}

// ============================================================================
// Tier seams
// ============================================================================

pub trait ThumbnailExtractor: Send + Sync {
    fn extract(&self, buffer: &[u8]) -> Option<Vec<u8>>;
}

#[async_trait]
pub trait Demosaicer: Send + Sync {
    /// Demosaiced raster (TIFF) for the post-processor
    async fn demosaic(&self, buffer: &[u8]) -> Result<Vec<u8>>;
}

pub trait RasterEncoder: Send + Sync {
    fn encode(&self, buffer: &[u8], options: &EncodeOptions) -> Result<EncodedJpeg>;
}

/// IFD1 JPEG, then LibRaw embedded-preview lookup for sniffed RAW headers
pub struct LibRawThumbnails;

impl ThumbnailExtractor for LibRawThumbnails {
    fn extract(&self, buffer: &[u8]) -> Option<Vec<u8>> {
        try_extract_thumbnail(buffer)
    }
}

#[async_trait]
impl Demosaicer for DemosaicBridge {
    async fn demosaic(&self, buffer: &[u8]) -> Result<Vec<u8>> {
        DemosaicBridge::demosaic(self, buffer).await
    }
}

/// `image` + `fast_image_resize` JPEG encoder
pub struct JpegPostProcessor;

impl RasterEncoder for JpegPostProcessor {
    fn encode(&self, buffer: &[u8], options: &EncodeOptions) -> Result<EncodedJpeg> {
        encode_jpeg(buffer, options)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Thumbnail,
    Demosaic,
    RasterFallback,
}

/// Ordered tiers for a request
pub fn tier_plan(options: &ConversionOptions) -> Vec<Tier> {
    let mut plan = vec![Tier::Thumbnail];
    if options.mode == ConversionMode::Editing || options.enforce_high_quality {
        plan.push(Tier::Demosaic);
    }
    plan.push(Tier::RasterFallback);
    plan
}

// ============================================================================
// Orchestrator
// ============================================================================

pub struct RawConverter {
    thumbnails: Arc<dyn ThumbnailExtractor>,
    demosaicer: Arc<dyn Demosaicer>,
    encoder: Arc<dyn RasterEncoder>,
    default_preview_edge: u32,
}

impl RawConverter {
    pub fn new(
        thumbnails: Arc<dyn ThumbnailExtractor>,
        demosaicer: Arc<dyn Demosaicer>,
        encoder: Arc<dyn RasterEncoder>,
        default_preview_edge: u32,
    ) -> Self {
        Self {
            thumbnails,
            demosaicer,
            encoder,
            default_preview_edge,
        }
    }

    /// Production wiring: LibRaw thumbnails, subprocess demosaic, JPEG encoder
    pub fn from_config(config: &ConverterConfig) -> Self {
        Self::new(
            Arc::new(LibRawThumbnails),
            Arc::new(DemosaicBridge::from_config(config)),
            Arc::new(JpegPostProcessor),
            config.max_preview_edge,
        )
    }

    pub async fn convert(&self, request: &ConversionRequest) -> Result<ConversionResult> {
        let ConversionRequest {
            bytes,
            file_name,
            options,
        } = request;

        let shared: Arc<[u8]> = Arc::from(bytes.as_slice());
        let mut last_error: Option<ConversionError> = None;

        for tier in tier_plan(options) {
            debug!(?tier, file_name = %file_name, "Attempting conversion tier");

            let attempt = match tier {
                Tier::Thumbnail => match self.extract_thumbnail(&shared).await {
                    Some(jpeg) => Ok((jpeg, None, ConversionSource::Thumbnail)),
                    None => {
                        debug!("No embedded thumbnail in {}", file_name);
                        continue;
                    }
                },
                Tier::Demosaic => self.run_demosaic(&shared).await.map(|out| {
                    (
                        out.bytes,
                        Some((out.width, out.height)),
                        ConversionSource::Demosaic,
                    )
                }),
                Tier::RasterFallback => self.run_fallback(&shared, options).await.map(|out| {
                    (
                        out.bytes,
                        Some((out.width, out.height)),
                        ConversionSource::RasterFallback,
                    )
                }),
            };

            match attempt {
                Ok((jpeg, _, source)) if jpeg.is_empty() => {
                    warn!("{} tier produced no bytes for {}", source.as_str(), file_name);
                    last_error = Some(ConversionError::Encode(format!(
                        "{} tier produced an empty image",
                        source.as_str()
                    )));
                }
                Ok((jpeg, dimensions, source)) => {
                    info!(
                        source = source.as_str(),
                        bytes = jpeg.len(),
                        "Converted {}",
                        file_name
                    );
                    return Ok(ConversionResult {
                        base64: STANDARD.encode(&jpeg),
                        bytes: jpeg,
                        file_name: replace_extension(file_name, OUTPUT_EXTENSION),
                        mime_type: OUTPUT_MIME_TYPE,
                        source,
                        dimensions,
                    });
                }
                Err(e) => {
                    warn!(?tier, "Conversion tier failed for {}: {}", file_name, e);
                    last_error = Some(e);
                }
            }
        }

        let cause = last_error
            .map(|e| e.cause())
            .unwrap_or_else(|| "no conversion tier produced output".to_string());
        error!("All conversion tiers exhausted for {}: {}", file_name, cause);

        Err(ConversionError::Exhausted {
            file_name: file_name.clone(),
            cause,
        })
    }

    async fn extract_thumbnail(&self, bytes: &Arc<[u8]>) -> Option<Vec<u8>> {
        let thumbnails = Arc::clone(&self.thumbnails);
        let bytes = Arc::clone(bytes);

        match tokio::task::spawn_blocking(move || thumbnails.extract(&bytes)).await {
            Ok(found) => found,
            Err(e) => {
                warn!("Thumbnail task failed: {}", e);
                None
            }
        }
    }

    async fn run_demosaic(&self, bytes: &[u8]) -> Result<EncodedJpeg> {
        let tiff = self.demosaicer.demosaic(bytes).await?;
        self.encode(Arc::from(tiff), EncodeOptions::archival()).await
    }

    async fn run_fallback(
        &self,
        bytes: &Arc<[u8]>,
        options: &ConversionOptions,
    ) -> Result<EncodedJpeg> {
        let max_edge = match options.mode {
            ConversionMode::Preview => {
                Some(options.max_preview_edge.unwrap_or(self.default_preview_edge))
            }
            ConversionMode::Editing => None,
        };
        self.encode(Arc::clone(bytes), EncodeOptions::fallback(max_edge))
            .await
    }

    async fn encode(&self, buffer: Arc<[u8]>, options: EncodeOptions) -> Result<EncodedJpeg> {
        let encoder = Arc::clone(&self.encoder);

        tokio::task::spawn_blocking(move || encoder.encode(&buffer, &options))
            .await
            .map_err(|e| ConversionError::Encode(format!("JPEG encode task failed: {}", e)))?
    }
}

// ============================================================================
// Tests
// ============================================================================
