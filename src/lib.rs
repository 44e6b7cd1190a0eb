//! rawmint - camera RAW to JPEG conversion
//!
//! Turns RAW uploads (ARW, CR2, CR3, NEF, ORF, PEF, RAF, RW2, SR2, DNG) into
//! JPEGs through three tiers: the embedded thumbnail, a LibRaw demosaic run in
//! a disposable worker process, and a direct decode as the last resort.
//! Also extracts EXIF metadata and normalizes uploads for an image-edit step.

pub mod config;
pub mod convert;
pub mod error;
pub mod formats;
pub mod image;
pub mod ipc;
pub mod metadata;
pub mod metrics;
pub mod normalize;
pub mod organ;
pub mod raw;
pub mod thumbnail;
pub mod validation;
pub mod worker;

pub use config::ConverterConfig;
pub use convert::{
    ConversionMode, ConversionOptions, ConversionRequest, ConversionResult, ConversionSource,
    RawConverter,
};
pub use error::{ConversionError, Result};
pub use formats::{classify, is_raw_file_name, FormatClassification};
pub use metadata::{extract_metadata, ExtractedMetadata};
pub use normalize::{EditingNormalizer, ImagePayload, NormalizedImage, RawPreview};
pub use organ::{Organ, RawOrgan, Response, Stimulus};
pub use worker::{DemosaicBridge, ProcessLauncher};
