//! Process-wide converter configuration
//!
//! Resolved once at startup (environment or CLI flags) and shared read-only.

use crate::error::{ConversionError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable overriding the demosaic worker executable
pub const WORKER_PATH_ENV: &str = "RAWMINT_WORKER_PATH";

/// Environment variable overriding the worker round-trip deadline
pub const WORKER_TIMEOUT_ENV: &str = "RAWMINT_WORKER_TIMEOUT_MS";

pub const DEFAULT_WORKER_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_MAX_PREVIEW_EDGE: u32 = 2048;
pub const DEFAULT_SERVER_PREVIEW_EDGE: u32 = 1600;

const WORKER_BINARY_NAME: &str = "rawmint-worker";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverterConfig {
    /// Demosaic subprocess executable
    pub worker_path: PathBuf,

    /// Deadline for one spawn + request + response exchange
    pub worker_timeout: Duration,

    /// Edge cap for the last-resort tier in preview mode
    pub max_preview_edge: u32,

    /// Edge used by server-side preview generation
    pub server_preview_edge: u32,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            worker_path: default_worker_path(),
            worker_timeout: DEFAULT_WORKER_TIMEOUT,
            max_preview_edge: DEFAULT_MAX_PREVIEW_EDGE,
            server_preview_edge: DEFAULT_SERVER_PREVIEW_EDGE,
        }
    }
}

impl ConverterConfig {
    /// Build from `RAWMINT_*` environment variables over the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = std::env::var_os(WORKER_PATH_ENV) {
            if !path.is_empty() {
                config.worker_path = PathBuf::from(path);
            }
        }

        if let Ok(raw) = std::env::var(WORKER_TIMEOUT_ENV) {
            let millis: u64 = raw.trim().parse().map_err(|_| {
                ConversionError::InvalidInput(format!(
                    "{} must be a whole number of milliseconds, got {:?}",
                    WORKER_TIMEOUT_ENV, raw
                ))
            })?;
            config.worker_timeout = Duration::from_millis(millis);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_timeout.is_zero() {
            return Err(ConversionError::InvalidInput(
                "worker timeout must be greater than zero".to_string(),
            ));
        }
        if self.max_preview_edge == 0 || self.server_preview_edge == 0 {
            return Err(ConversionError::InvalidInput(
                "preview edges must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// `rawmint-worker` next to the running executable, else bare name on PATH
fn default_worker_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(WORKER_BINARY_NAME)))
        .unwrap_or_else(|| PathBuf::from(WORKER_BINARY_NAME))
}
