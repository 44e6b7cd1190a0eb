use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("Demosaic worker failed: {0}")]
    Worker(String),

    #[error("Decode failed: {0}")]
    Decode(String),

    #[error("Encode failed: {0}")]
    Encode(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Failed to convert RAW file {file_name}: {cause}")]
    Exhausted { file_name: String, cause: String },

    #[error(
        "We couldn't process this RAW file ({file_name}) automatically. \
         Try converting it to JPEG manually and upload again."
    )]
    ManualConversionRequired { file_name: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConversionError {
    /// Short cause string without the variant prefix, used when a tier
    /// failure is embedded in a terminal error.
    pub fn cause(&self) -> String {
        match self {
            ConversionError::Worker(msg)
            | ConversionError::Decode(msg)
            | ConversionError::Encode(msg)
            | ConversionError::InvalidInput(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConversionError>;
