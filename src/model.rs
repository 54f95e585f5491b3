//! Shared wire schema, used by the extraction worker, the OCR worker, and
//! their tests. Keeping these types in one place is what lets the OCR worker
//! re-use the extraction engine's record shape instead of duplicating it.

use std::collections::BTreeMap;

use crate::prelude::*;

/// One row pulled from a manifest CSV, after column-naming normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestRow {
    pub bucket: String,
    pub key: String,
    pub metadata: BTreeMap<String, String>,
}

/// File type detected for a source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Pdf,
    Html,
}

impl FileType {
    pub fn as_str(self) -> &'static str {
        match self {
            FileType::Pdf => "pdf",
            FileType::Html => "html",
        }
    }
}

/// Text and metadata extracted from a single page of a document.
///
/// This is the one record shape written to both primary extraction shards
/// and OCR patch files; the downstream index cannot tell which pipeline
/// produced a given record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRecord {
    pub unique_page_id: String,
    pub document_id: String,
    pub page_number: u32,
    pub total_pages: u32,
    pub text: String,
    pub ocr_required: bool,
    pub s3_key: String,
    pub file_type: FileType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filing_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filing_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl PageRecord {
    /// Build the `unique_page_id` used throughout the data model:
    /// `"{EXCHANGE}_{document_id}_pg{page_number}"` when an exchange is
    /// known, else `"{document_id}_pg{page_number}"`.
    pub fn unique_page_id(
        exchange: Option<&str>,
        document_id: &str,
        page_number: u32,
    ) -> String {
        match exchange {
            Some(exch) if !exch.is_empty() => {
                format!("{exch}_{document_id}_pg{page_number}")
            }
            _ => format!("{document_id}_pg{page_number}"),
        }
    }
}

/// A job enqueued onto the OCR work queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrJob {
    pub version: u32,
    pub exchange: String,
    pub source_id: String,
    pub s3_bucket: String,
    pub s3_key: String,
    pub broken_pages: Vec<u32>,
    pub submitted_at: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Status recorded in the dedup ledger for one source id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupStatus {
    Completed,
    Failed,
}

impl DedupStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DedupStatus::Completed => "COMPLETED",
            DedupStatus::Failed => "FAILED",
        }
    }
}

/// One row in the dedup ledger: `(exchange, job_type)` as partition key,
/// `source_id` as sort key.
#[derive(Debug, Clone)]
pub struct DedupEntry {
    pub exchange: String,
    pub job_type: String,
    pub source_id: String,
    pub status: DedupStatus,
    pub s3_key: String,
    pub pages_extracted: Option<u32>,
    pub error_message: Option<String>,
    pub job_id: String,
}

impl DedupEntry {
    /// The literal concatenation used as the ledger's partition key.
    pub fn partition_key(exchange: &str, job_type: &str) -> String {
        format!("{exchange}#{job_type}")
    }
}

/// Running counters for one extraction worker's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobStats {
    pub files_processed: u64,
    pub files_failed: u64,
    pub files_skipped: u64,
    pub pages_extracted: u64,
}

impl JobStats {
    /// `true` iff the worker should report a terminal `FAILED` job state:
    /// every considered file failed and none succeeded.
    pub fn is_total_failure(&self) -> bool {
        self.files_failed > 0 && self.files_processed == 0
    }
}

/// A single word's bounding box, in source-PDF point coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
    pub word: String,
}
