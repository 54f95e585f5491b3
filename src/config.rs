//! Environment-driven configuration for both binaries.
//!
//! Neither binary takes command-line arguments; everything comes from the
//! process environment (with an optional `.env` file for local runs). Both
//! configs are built and validated before any AWS client is constructed, so
//! a missing required variable is a config error the caller can turn into
//! exit code 1 without ever touching the network.

use std::{env, process, time::Duration};

use crate::prelude::*;

fn read_string_env(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_owned())
}

fn read_bool_env(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(value) => matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}

fn read_u32_env(name: &str, default: u32) -> Result<u32> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {name}: {value:?}")),
        Err(_) => Ok(default),
    }
}

fn read_f64_env(name: &str, default: f64) -> Result<f64> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {name}: {value:?}")),
        Err(_) => Ok(default),
    }
}

fn require_string_env(name: &str) -> Result<String> {
    env::var(name).with_context(|| format!("missing required environment variable {name}"))
}

/// Thresholds controlling the gibberish-text heuristic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GibberishThresholds {
    pub min_length: usize,
    pub replacement_char_ratio: f64,
    pub control_char_ratio: f64,
}

impl Default for GibberishThresholds {
    fn default() -> Self {
        Self {
            min_length: 20,
            replacement_char_ratio: 0.05,
            control_char_ratio: 0.10,
        }
    }
}

impl GibberishThresholds {
    fn from_env() -> Result<Self> {
        Ok(Self {
            min_length: read_u32_env("GIBBERISH_MIN_LENGTH", 20)? as usize,
            replacement_char_ratio: read_f64_env("GIBBERISH_REPLACEMENT_RATIO", 0.05)?,
            control_char_ratio: read_f64_env("GIBBERISH_CONTROL_RATIO", 0.10)?,
        })
    }
}

/// Configuration for the extraction worker binary.
#[derive(Debug, Clone)]
pub struct ExtractionWorkerConfig {
    pub array_index: u32,
    pub job_id: String,
    pub chunk_size: u32,
    pub manifest_bucket: String,
    pub manifest_key: String,
    pub output_bucket: String,
    pub output_prefix: String,
    pub exchange: String,
    pub metadata_bucket: String,
    pub metadata_key: String,
    pub enable_job_tracking: bool,
    pub job_tracking_table: String,
    pub enable_dedup: bool,
    pub dedup_table: String,
    pub ocr_queue_url: String,
    pub enable_ocr_queue: bool,
    pub ocr_page_chunk_size: u32,
    pub enable_inline_ocr: bool,
    pub gibberish: GibberishThresholds,
}

impl ExtractionWorkerConfig {
    pub fn from_env() -> Result<Self> {
        let job_id = read_string_env("JOB_ID", &format!("local-{}", process::id()));
        Ok(Self {
            array_index: read_u32_env("ARRAY_INDEX", 0)?,
            job_id,
            chunk_size: read_u32_env("CHUNK_SIZE", 1000)?,
            manifest_bucket: require_string_env("MANIFEST_BUCKET")?,
            manifest_key: require_string_env("MANIFEST_KEY")?,
            output_bucket: require_string_env("OUTPUT_BUCKET")?,
            output_prefix: read_string_env("OUTPUT_PREFIX", "processed"),
            exchange: read_string_env("EXCHANGE", ""),
            metadata_bucket: read_string_env("METADATA_BUCKET", ""),
            metadata_key: read_string_env("METADATA_KEY", ""),
            enable_job_tracking: read_bool_env("ENABLE_JOB_TRACKING", false),
            job_tracking_table: read_string_env("JOB_TRACKING_TABLE", ""),
            enable_dedup: read_bool_env("ENABLE_DEDUP", false),
            dedup_table: read_string_env("DEDUP_TABLE", ""),
            ocr_queue_url: read_string_env("OCR_QUEUE_URL", ""),
            enable_ocr_queue: read_bool_env("ENABLE_OCR_QUEUE", true),
            ocr_page_chunk_size: read_u32_env("OCR_PAGE_CHUNK_SIZE", 10)?,
            enable_inline_ocr: read_bool_env("ENABLE_INLINE_OCR", false),
            gibberish: GibberishThresholds::from_env()?,
        })
    }

    /// Row range `[start, end)` assigned to this worker by its array index.
    pub fn row_range(&self) -> (u64, u64) {
        let start = u64::from(self.array_index) * u64::from(self.chunk_size);
        let end = start + u64::from(self.chunk_size);
        (start, end)
    }

    pub fn row_range_usize(&self) -> (usize, usize) {
        let (start, end) = self.row_range();
        (start as usize, end as usize)
    }
}

/// Configuration for the OCR worker binary.
#[derive(Debug, Clone)]
pub struct OcrWorkerConfig {
    pub ocr_queue_url: String,
    pub output_bucket: String,
    pub output_prefix: String,
    pub max_messages: i32,
    pub wait_time: Duration,
    pub visibility_timeout: Duration,
    pub run_once: bool,
    pub enable_scale_in_protection: bool,
    pub scale_in_protection_minutes: u32,
    pub dedup_table: String,
    pub job_tracking_table: String,
}

impl OcrWorkerConfig {
    pub fn from_env() -> Result<Self> {
        let max_messages = read_u32_env("MAX_MESSAGES", 1)?;
        if !(1..=10).contains(&max_messages) {
            return Err(anyhow!("MAX_MESSAGES must be between 1 and 10, got {max_messages}"));
        }
        Ok(Self {
            ocr_queue_url: require_string_env("OCR_QUEUE_URL")?,
            output_bucket: require_string_env("OUTPUT_BUCKET")?,
            output_prefix: read_string_env("OUTPUT_PREFIX", "processed"),
            max_messages: max_messages as i32,
            wait_time: Duration::from_secs(u64::from(read_u32_env("WAIT_TIME_SECONDS", 10)?)),
            visibility_timeout: Duration::from_secs(u64::from(read_u32_env(
                "VISIBILITY_TIMEOUT_SECONDS",
                900,
            )?)),
            run_once: read_bool_env("RUN_ONCE", false),
            enable_scale_in_protection: read_bool_env("ENABLE_SCALE_IN_PROTECTION", false),
            scale_in_protection_minutes: read_u32_env("SCALE_IN_PROTECTION_MINUTES", 15)?,
            dedup_table: read_string_env("DEDUP_TABLE", ""),
            job_tracking_table: read_string_env("JOB_TRACKING_TABLE", ""),
        })
    }
}

/// Install `.env` (local-development convenience only, absent in
/// production containers) and a `tracing-subscriber` filter honoring
/// `LOG_LEVEL`, overridable by `RUST_LOG`.
pub fn init_logging(writer: impl for<'a> tracing_subscriber::fmt::MakeWriter<'a> + Send + Sync + 'static) {
    dotenvy::dotenv().ok();
    let default_level = read_string_env("LOG_LEVEL", "info");
    let filter = tracing_subscriber::EnvFilter::try_from_env("RUST_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_key_uses_literal_concatenation() {
        assert_eq!(
            crate::model::DedupEntry::partition_key("HKEX", "extraction"),
            "HKEX#extraction"
        );
    }

    #[test]
    fn gibberish_thresholds_default_values() {
        let thresholds = GibberishThresholds::default();
        assert_eq!(thresholds.min_length, 20);
        assert_eq!(thresholds.replacement_char_ratio, 0.05);
        assert_eq!(thresholds.control_char_ratio, 0.10);
    }
}
