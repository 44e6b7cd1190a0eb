//! Metrics and observability for rawmint

use crate::convert::ConversionSource;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Global metrics collector
#[derive(Default)]
pub struct Metrics {
    pub total_requests: AtomicU64,
    pub successful_requests: AtomicU64,
    pub failed_requests: AtomicU64,
    pub total_latency_ms: AtomicU64,

    // Per-operation counters
    pub raw_convert_count: AtomicU64,
    pub raw_preview_count: AtomicU64,
    pub raw_metadata_count: AtomicU64,
    pub image_normalize_count: AtomicU64,
    pub format_classify_count: AtomicU64,

    // Which tier satisfied each conversion
    pub thumbnail_tier_count: AtomicU64,
    pub demosaic_tier_count: AtomicU64,
    pub fallback_tier_count: AtomicU64,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_request(&self, op: &str, success: bool, latency_ms: u64) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }

        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);

        // Increment operation-specific counter
        match op {
            "raw.convert" => self.raw_convert_count.fetch_add(1, Ordering::Relaxed),
            "raw.preview" => self.raw_preview_count.fetch_add(1, Ordering::Relaxed),
            "raw.metadata" => self.raw_metadata_count.fetch_add(1, Ordering::Relaxed),
            "image.normalize" => self.image_normalize_count.fetch_add(1, Ordering::Relaxed),
            "format.classify" => self.format_classify_count.fetch_add(1, Ordering::Relaxed),
            _ => 0,
        };
    }

    pub fn record_source(&self, source: ConversionSource) {
        let counter = match source {
            ConversionSource::Thumbnail => &self.thumbnail_tier_count,
            ConversionSource::Demosaic => &self.demosaic_tier_count,
            ConversionSource::RasterFallback => &self.fallback_tier_count,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let total = self.total_requests.load(Ordering::Relaxed);
        let successful = self.successful_requests.load(Ordering::Relaxed);
        let failed = self.failed_requests.load(Ordering::Relaxed);
        let total_latency = self.total_latency_ms.load(Ordering::Relaxed);

        MetricsSnapshot {
            total_requests: total,
            successful_requests: successful,
            failed_requests: failed,
            error_rate: if total > 0 { failed as f64 / total as f64 } else { 0.0 },
            avg_latency_ms: if total > 0 { total_latency / total } else { 0 },
            operations: OperationMetrics {
                raw_convert: self.raw_convert_count.load(Ordering::Relaxed),
                raw_preview: self.raw_preview_count.load(Ordering::Relaxed),
                raw_metadata: self.raw_metadata_count.load(Ordering::Relaxed),
                image_normalize: self.image_normalize_count.load(Ordering::Relaxed),
                format_classify: self.format_classify_count.load(Ordering::Relaxed),
            },
            sources: SourceMetrics {
                thumbnail: self.thumbnail_tier_count.load(Ordering::Relaxed),
                demosaic: self.demosaic_tier_count.load(Ordering::Relaxed),
                sharp: self.fallback_tier_count.load(Ordering::Relaxed),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub error_rate: f64,
    pub avg_latency_ms: u64,
    pub operations: OperationMetrics,
    pub sources: SourceMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationMetrics {
    pub raw_convert: u64,
    pub raw_preview: u64,
    pub raw_metadata: u64,
    pub image_normalize: u64,
    pub format_classify: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceMetrics {
    pub thumbnail: u64,
    pub demosaic: u64,
    pub sharp: u64,
}

/// Timer for tracking operation latency
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
