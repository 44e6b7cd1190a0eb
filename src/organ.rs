//! Organ interface for rawmint
//!
//! Exposes the conversion pipeline through the stimulus/response pattern so
//! orchestrators can discover and invoke it over a socket or in-process.
//!
//! ## Conventions
//!
//! - **Stimulus/Response Pattern**: All operations use standardized input/output
//! - **Capability Cards**: Self-describing, every input validated against its card
//! - **Byte payloads**: base64 strings in and out
//! - **Failures**: handler errors become `ok: false` responses, never panics
//!
//! ## Available Operations
//!
//! 1. `raw.convert` - RAW -> JPEG through the tiered pipeline
//! 2. `raw.preview` - Server-side preview as a data URL
//! 3. `raw.metadata` - Embedded tag extraction
//! 4. `image.normalize` - Prepare an upload for the image-edit step
//! 5. `format.classify` - Filename / MIME classification
//! 6. `media.capabilities` - Capability card query
//! 7. `metrics` - Counters snapshot
//!
//! ## Example
//!
//! ```rust,no_run
//! use rawmint::config::ConverterConfig;
//! use rawmint::organ::{Organ, RawOrgan, Stimulus};
//! use serde_json::json;
//! use std::collections::HashMap;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let organ = RawOrgan::new(&ConverterConfig::from_env()?)?;
//!
//! let response = organ.stimulate(Stimulus {
//!     op: "format.classify".to_string(),
//!     input: json!({"file_name": "IMG_0001.CR2"}),
//!     context: HashMap::new(),
//! }).await?;
//! assert!(response.output["is_raw"].as_bool().unwrap_or(false));
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ConverterConfig;
use crate::convert::{ConversionOptions, ConversionRequest, RawConverter};
use crate::error::ConversionError;
use crate::formats::{classify, is_supported_extension, is_supported_mime_type};
use crate::metadata::{extract_metadata, ExtractedMetadata};
use crate::metrics::{Metrics, Timer};
use crate::normalize::{EditingNormalizer, ImagePayload};
use crate::validation::validate_input;

pub const OPERATIONS: [&str; 7] = [
    "raw.convert",
    "raw.preview",
    "raw.metadata",
    "image.normalize",
    "format.classify",
    "media.capabilities",
    "metrics",
];

/// Stimulus - input to organ operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stimulus {
    pub op: String,
    pub input: Value,
    #[serde(default)]
    pub context: HashMap<String, String>,
}

/// Response - output from organ operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    pub output: Value,
    pub latency_ms: u64,
    pub cost: Option<f64>,
}

/// Organ trait - anything that answers stimuli and describes itself
#[async_trait]
pub trait Organ: Send + Sync {
    async fn stimulate(&self, stimulus: Stimulus) -> Result<Response, OrganError>;
    fn describe(&self) -> OrganCard;
}

/// Organ-level errors
#[derive(Debug, Error)]
pub enum OrganError {
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error(transparent)]
    Conversion(#[from] ConversionError),
}

impl OrganError {
    fn kind(&self) -> &'static str {
        match self {
            OrganError::UnsupportedOperation(_) => "UnsupportedOperation",
            OrganError::InvalidInput(_)
            | OrganError::Conversion(ConversionError::InvalidInput(_)) => "InvalidInput",
            OrganError::SerializationError(_) => "SerializationError",
            OrganError::Conversion(ConversionError::ManualConversionRequired { .. }) => {
                "ManualConversionRequired"
            }
            OrganError::Conversion(_) => "ConversionFailed",
        }
    }
}

/// Organ capability card
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganCard {
    pub name: String,
    pub version: String,
    pub description: String,
    pub division: String,
    pub subsystem: String,
    pub tags: Vec<String>,
    pub execution_modes: Vec<String>,
    pub functions: Vec<FunctionCard>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
}

/// Function capability card
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCard {
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub examples: Vec<String>,
    pub idempotent: bool,
    pub side_effects: Vec<String>,
    pub input_schema: Option<Value>,
    pub output_schema: Value,
}

#[derive(Debug, Deserialize)]
struct ConvertInput {
    file_name: String,
    base64: String,
    #[serde(flatten)]
    options: ConversionOptions,
}

#[derive(Debug, Deserialize)]
struct ClassifyInput {
    file_name: String,
    #[serde(default)]
    mime_type: Option<String>,
}

/// RAW conversion organ
pub struct RawOrgan {
    converter: Arc<RawConverter>,
    normalizer: EditingNormalizer,
    metrics: Arc<Metrics>,
}

impl RawOrgan {
    /// Production wiring from resolved configuration
    pub fn new(config: &ConverterConfig) -> Result<Self, OrganError> {
        Self::with_converter(Arc::new(RawConverter::from_config(config)), config)
    }

    /// Use a pre-built converter (alternative tiers, tests)
    pub fn with_converter(
        converter: Arc<RawConverter>,
        config: &ConverterConfig,
    ) -> Result<Self, OrganError> {
        config.validate()?;
        let normalizer =
            EditingNormalizer::new(Arc::clone(&converter), config.server_preview_edge)?;
        Ok(Self {
            converter,
            normalizer,
            metrics: Metrics::new(),
        })
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    /// Handle raw.convert operation
    async fn handle_raw_convert(&self, input: Value) -> Result<Value, OrganError> {
        let input: ConvertInput = serde_json::from_value(input)?;
        let bytes = decode_base64(&input.file_name, &input.base64)?;

        let result = self
            .converter
            .convert(&ConversionRequest {
                bytes,
                file_name: input.file_name,
                options: input.options,
            })
            .await?;

        self.metrics.record_source(result.source);

        Ok(json!({
            "file_name": result.file_name,
            "mime_type": result.mime_type,
            "source": result.source,
            "base64": result.base64,
            "size_bytes": result.bytes.len(),
            "width": result.dimensions.map(|(w, _)| w),
            "height": result.dimensions.map(|(_, h)| h),
        }))
    }

    /// Handle raw.preview operation - null output when no preview could be made
    async fn handle_raw_preview(&self, input: Value) -> Result<Value, OrganError> {
        let payload: ImagePayload = serde_json::from_value(input)?;

        match self.normalizer.generate_preview(&payload).await {
            Some(preview) => {
                self.metrics.record_source(preview.source);
                Ok(serde_json::to_value(&preview)?)
            }
            None => Ok(Value::Null),
        }
    }

    /// Handle raw.metadata operation
    async fn handle_raw_metadata(&self, input: Value) -> Result<Value, OrganError> {
        let payload: ImagePayload = serde_json::from_value(input)?;
        let bytes = decode_base64(&payload.file_name, &payload.base64)?;

        let file_name = payload.file_name.clone();
        let metadata = tokio::task::spawn_blocking(move || extract_metadata(&bytes, &file_name))
            .await
            .unwrap_or_else(|e| {
                warn!("Metadata task failed for {}: {}", payload.file_name, e);
                ExtractedMetadata::default()
            });
        let summary = metadata.exposure_summary();

        let mut output = serde_json::to_value(&metadata)?;
        output["exposure_summary"] = json!(summary);
        Ok(output)
    }

    /// Handle image.normalize operation
    async fn handle_image_normalize(&self, input: Value) -> Result<Value, OrganError> {
        let payload: ImagePayload = serde_json::from_value(input)?;
        let normalized = self.normalizer.normalize_for_editing(&payload).await?;

        if let Some(source) = normalized.raw_conversion_source {
            self.metrics.record_source(source);
        }
        Ok(serde_json::to_value(&normalized)?)
    }

    /// Handle format.classify operation
    fn handle_format_classify(&self, input: Value) -> Result<Value, OrganError> {
        let input: ClassifyInput = serde_json::from_value(input)?;
        let classification = classify(&input.file_name);

        let mut output = serde_json::to_value(&classification)?;
        output["is_supported_extension"] = json!(is_supported_extension(&input.file_name));
        output["is_supported_mime_type"] =
            json!(is_supported_mime_type(input.mime_type.as_deref()));
        Ok(output)
    }

    /// Handle media.capabilities operation
    fn handle_capabilities(&self) -> Result<Value, OrganError> {
        let card = self.describe();
        serde_json::to_value(&card).map_err(OrganError::SerializationError)
    }

    fn validate(&self, op: &str, input: &Value) -> Result<(), OrganError> {
        let card = self.describe();
        let schema = card
            .functions
            .iter()
            .find(|f| f.name == op)
            .and_then(|f| f.input_schema.as_ref());

        match schema {
            Some(schema) => {
                validate_input(input, schema).map_err(|e| OrganError::InvalidInput(e.cause()))
            }
            None => Ok(()),
        }
    }

    async fn dispatch(&self, op: &str, input: Value) -> Result<Value, OrganError> {
        self.validate(op, &input)?;

        match op {
            "raw.convert" => self.handle_raw_convert(input).await,
            "raw.preview" => self.handle_raw_preview(input).await,
            "raw.metadata" => self.handle_raw_metadata(input).await,
            "image.normalize" => self.handle_image_normalize(input).await,
            "format.classify" => self.handle_format_classify(input),
            "media.capabilities" => self.handle_capabilities(),
            "metrics" => Ok(json!(self.metrics.snapshot())),
            other => Err(OrganError::UnsupportedOperation(other.to_string())),
        }
    }
}

fn decode_base64(file_name: &str, data: &str) -> Result<Vec<u8>, OrganError> {
    STANDARD.decode(data.trim().as_bytes()).map_err(|e| {
        OrganError::InvalidInput(format!("{}: base64 payload is invalid: {}", file_name, e))
    })
}

#[async_trait]
impl Organ for RawOrgan {
    async fn stimulate(&self, stimulus: Stimulus) -> Result<Response, OrganError> {
        let timer = Timer::new();
        let op = stimulus.op.clone();

        if !OPERATIONS.contains(&op.as_str()) {
            let latency = timer.elapsed_ms();
            self.metrics.record_request(&op, false, latency);

            return Ok(Response {
                ok: false,
                output: json!({
                    "error": "UnsupportedOperation",
                    "op": op,
                    "available_operations": OPERATIONS,
                }),
                latency_ms: latency,
                cost: None,
            });
        }

        debug!(op = %op, "Dispatching stimulus");
        let result = self.dispatch(&op, stimulus.input).await;
        let latency = timer.elapsed_ms();

        match result {
            Ok(output) => {
                self.metrics.record_request(&op, true, latency);
                Ok(Response {
                    ok: true,
                    output,
                    latency_ms: latency,
                    cost: None,
                })
            }
            Err(e) => {
                warn!(op = %op, "Operation failed: {}", e);
                self.metrics.record_request(&op, false, latency);
                Ok(Response {
                    ok: false,
                    output: json!({
                        "error": e.kind(),
                        "message": e.to_string(),
                    }),
                    latency_ms: latency,
                    cost: None,
                })
            }
        }
    }

    fn describe(&self) -> OrganCard {
        let payload_schema = json!({
            "type": "object",
            "properties": {
                "file_name": { "type": "string", "description": "Original upload name; the extension drives RAW detection" },
                "base64": { "type": "string", "description": "File contents, base64-encoded" }
            },
            "required": ["file_name", "base64"]
        });

        OrganCard {
            name: "rawmint".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: "Camera RAW to JPEG conversion with embedded-thumbnail, isolated demosaic and direct-decode tiers".to_string(),
            division: "media".to_string(),
            subsystem: "raw-conversion".to_string(),
            tags: vec![
                "media".to_string(),
                "raw".to_string(),
                "libraw".to_string(),
                "jpeg".to_string(),
                "exif".to_string(),
                "conversion".to_string(),
            ],
            execution_modes: vec!["embedded".to_string(), "server".to_string()],
            author: None,
            repository: None,
            functions: vec![
                FunctionCard {
                    name: "raw.convert".to_string(),
                    description: "Convert a RAW file to JPEG: embedded thumbnail, then out-of-process demosaic (editing), then direct decode".to_string(),
                    tags: vec!["raw".to_string(), "conversion".to_string(), "jpeg".to_string()],
                    examples: vec![
                        "Convert a CR2 upload to an editable JPEG".to_string(),
                        "Produce a quick preview JPEG from an ARW".to_string(),
                    ],
                    idempotent: true,
                    side_effects: vec!["spawns demosaic worker process".to_string()],
                    input_schema: Some(json!({
                        "type": "object",
                        "properties": {
                            "file_name": { "type": "string", "description": "Original file name" },
                            "base64": { "type": "string", "description": "RAW bytes, base64-encoded" },
                            "mode": { "type": "string", "enum": ["preview", "editing"], "description": "Conversion mode (default: editing)" },
                            "max_preview_edge": { "type": "integer", "minimum": 1, "description": "Edge cap for the last-resort tier in preview mode (default: 2048)" },
                            "enforce_high_quality": { "type": "boolean", "description": "Attempt demosaic even in preview mode" }
                        },
                        "required": ["file_name", "base64"]
                    })),
                    output_schema: json!({
                        "type": "object",
                        "properties": {
                            "file_name": { "type": "string" },
                            "mime_type": { "type": "string" },
                            "source": { "type": "string", "enum": ["thumbnail", "demosaic", "sharp"] },
                            "base64": { "type": "string" },
                            "size_bytes": { "type": "integer" },
                            "width": { "type": ["integer", "null"] },
                            "height": { "type": ["integer", "null"] }
                        }
                    }),
                },
                FunctionCard {
                    name: "raw.preview".to_string(),
                    description: "Generate a preview-mode JPEG data URL for a RAW upload; null when no tier succeeds".to_string(),
                    tags: vec!["raw".to_string(), "preview".to_string()],
                    examples: vec!["Show a NEF thumbnail on the upload screen".to_string()],
                    idempotent: true,
                    side_effects: vec![],
                    input_schema: Some(payload_schema.clone()),
                    output_schema: json!({
                        "type": ["object", "null"],
                        "properties": {
                            "preview_data_url": { "type": "string" },
                            "source": { "type": "string" },
                            "width": { "type": "integer" },
                            "height": { "type": "integer" }
                        }
                    }),
                },
                FunctionCard {
                    name: "raw.metadata".to_string(),
                    description: "Extract camera, exposure, GPS and embedded preview from EXIF/TIFF tags; never fails".to_string(),
                    tags: vec!["metadata".to_string(), "exif".to_string()],
                    examples: vec!["Read camera and lens for a DNG".to_string()],
                    idempotent: true,
                    side_effects: vec![],
                    input_schema: Some(payload_schema.clone()),
                    output_schema: json!({
                        "type": "object",
                        "properties": {
                            "camera_make": { "type": ["string", "null"] },
                            "camera_model": { "type": ["string", "null"] },
                            "capture_date": { "type": ["string", "null"] },
                            "exposure_summary": { "type": ["string", "null"] },
                            "raw_tag_map": { "type": "object" }
                        }
                    }),
                },
                FunctionCard {
                    name: "image.normalize".to_string(),
                    description: "Pass through JPEG/PNG/WebP uploads; convert RAW uploads to JPEG with a preview-mode retry".to_string(),
                    tags: vec!["normalization".to_string(), "raw".to_string(), "editing".to_string()],
                    examples: vec!["Prepare an upload for the image-edit step".to_string()],
                    idempotent: true,
                    side_effects: vec!["spawns demosaic worker process".to_string()],
                    input_schema: Some(payload_schema),
                    output_schema: json!({
                        "type": "object",
                        "properties": {
                            "base64": { "type": "string" },
                            "file_name": { "type": "string" },
                            "normalized_format": { "type": "string", "enum": ["jpeg", "png", "webp"] },
                            "normalized_mime_type": { "type": "string" },
                            "original_byte_length": { "type": "integer" },
                            "normalized_byte_length": { "type": "integer" },
                            "raw_conversion_source": { "type": "string" }
                        }
                    }),
                },
                FunctionCard {
                    name: "format.classify".to_string(),
                    description: "Classify a file name as RAW or raster and check a declared MIME type against the edit allow-list".to_string(),
                    tags: vec!["format".to_string(), "validation".to_string()],
                    examples: vec!["Check whether IMG_0001.CR2 needs conversion".to_string()],
                    idempotent: true,
                    side_effects: vec![],
                    input_schema: Some(json!({
                        "type": "object",
                        "properties": {
                            "file_name": { "type": "string" },
                            "mime_type": { "type": "string" }
                        },
                        "required": ["file_name"]
                    })),
                    output_schema: json!({
                        "type": "object",
                        "properties": {
                            "extension": { "type": "string" },
                            "is_raw": { "type": "boolean" },
                            "is_supported_raster": { "type": "boolean" },
                            "inferred_mime_type": { "type": "string" },
                            "is_supported_extension": { "type": "boolean" },
                            "is_supported_mime_type": { "type": "boolean" }
                        }
                    }),
                },
                FunctionCard {
                    name: "media.capabilities".to_string(),
                    description: "Return organ capability card with all available functions and metadata".to_string(),
                    tags: vec!["metadata".to_string(), "discovery".to_string()],
                    examples: vec!["Discover available conversion operations".to_string()],
                    idempotent: true,
                    side_effects: vec![],
                    input_schema: None,
                    output_schema: json!({
                        "type": "object",
                        "properties": {
                            "name": { "type": "string" },
                            "version": { "type": "string" },
                            "functions": { "type": "array" }
                        }
                    }),
                },
                FunctionCard {
                    name: "metrics".to_string(),
                    description: "Request counters, latency and per-tier conversion counts".to_string(),
                    tags: vec!["metrics".to_string(), "observability".to_string()],
                    examples: vec!["How many conversions fell back to direct decode".to_string()],
                    idempotent: true,
                    side_effects: vec![],
                    input_schema: None,
                    output_schema: json!({ "type": "object" }),
                },
            ],
        }
    }
}
