//! Extraction Engine: classifies document bytes, dispatches to the PDF or
//! HTML extractor, and merges S3-key-derived, manifest-row, and override
//! metadata into the records each extractor produces.

pub mod gibberish;
pub mod html;
pub mod pdf;

use std::collections::BTreeMap;

use flate2::read::GzDecoder;
use std::io::Read as _;

use crate::{
    model::{FileType, PageRecord},
    prelude::*,
};

/// Decompress `data` if it looks gzip-compressed (leading `1F 8B`).
/// Returns the original bytes unchanged on any decompression failure.
pub fn decompress_if_gzip(data: &[u8]) -> Vec<u8> {
    if data.len() >= 2 && data[0] == 0x1F && data[1] == 0x8B {
        let mut decoder = GzDecoder::new(data);
        let mut out = Vec::new();
        match decoder.read_to_end(&mut out) {
            Ok(_) => return out,
            Err(err) => warn!("failed to decompress gzip data: {err}"),
        }
    }
    data.to_vec()
}

/// Detect file type from a filename/key extension.
fn file_type_from_name(name: &str) -> Option<FileType> {
    let lower = name.to_ascii_lowercase();
    if lower.ends_with(".pdf") {
        Some(FileType::Pdf)
    } else if lower.ends_with(".htm") || lower.ends_with(".html") {
        Some(FileType::Html)
    } else {
        None
    }
}

/// Detect file type from magic bytes / content sniffing, after transparent
/// gzip decompression.
pub fn classify_from_content(data: &[u8]) -> Option<FileType> {
    let data = decompress_if_gzip(data);
    if data.starts_with(b"%PDF") {
        return Some(FileType::Pdf);
    }
    let sniff_len = data.len().min(1000);
    let text_start = String::from_utf8_lossy(&data[..sniff_len])
        .to_ascii_lowercase();
    let text_start = text_start.trim_start();
    if text_start.starts_with("<!doctype html") || text_start.starts_with("<html") {
        return Some(FileType::Html);
    }
    if text_start.contains("<html") || text_start.contains("<!doctype") {
        return Some(FileType::Html);
    }
    None
}

/// Classify a document: prefer the filename/key extension, fall back to
/// content sniffing.
pub fn classify(data: &[u8], name: &str) -> Option<FileType> {
    file_type_from_name(name).or_else(|| classify_from_content(data))
}

/// Metadata parsed positionally from an S3 object key, per §4.2.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyMetadata {
    pub exchange: Option<String>,
    pub company_id: Option<String>,
    pub filing_date: Option<String>,
    pub source_id: Option<String>,
}

const STRIPPED_EXTENSIONS: &[&str] = &["pdf", "htm", "html", "doc", "docx"];

fn strip_known_extension(key: &str) -> &str {
    if let Some((stem, ext)) = key.rsplit_once('.') {
        if STRIPPED_EXTENSIONS
            .iter()
            .any(|known| known.eq_ignore_ascii_case(ext))
        {
            return stem;
        }
    }
    key
}

/// Parse metadata from an S3 object key's path segments.
pub fn parse_s3_key_metadata(s3_key: &str) -> KeyMetadata {
    let key_no_ext = strip_known_extension(s3_key);
    let parts: Vec<&str> = key_no_ext.split('/').collect();
    let n = parts.len();

    let mut metadata = KeyMetadata::default();
    if n >= 6 {
        metadata.exchange = Some(parts[n - 6].to_ascii_uppercase());
        metadata.company_id = Some(parts[n - 5].to_owned());
        let (year, month, day) = (parts[n - 4], parts[n - 3], parts[n - 2]);
        if year.chars().all(|c| c.is_ascii_digit())
            && month.chars().all(|c| c.is_ascii_digit())
            && day.chars().all(|c| c.is_ascii_digit())
        {
            metadata.filing_date = Some(format!("{year}-{month}-{day}"));
        }
        metadata.source_id = Some(parts[n - 1].to_owned());
    } else if n >= 3 {
        metadata.exchange = Some(parts[n - 3].to_ascii_uppercase());
        metadata.company_id = Some(parts[n - 2].to_owned());
        metadata.source_id = Some(parts[n - 1].to_owned());
    } else if n >= 1 {
        metadata.source_id = Some(parts[n - 1].to_owned());
    }
    metadata
}

/// Fields that get merged onto a `PageRecord`, in lowest-to-highest
/// precedence order: parsed S3 key → manifest row metadata → exchange
/// override → explicit document id override.
#[derive(Debug, Clone, Default)]
pub struct MergedMetadata {
    pub exchange: Option<String>,
    pub company_id: Option<String>,
    pub company_name: Option<String>,
    pub filing_date: Option<String>,
    pub filing_type: Option<String>,
    pub title: Option<String>,
    pub source_id: Option<String>,
}

impl MergedMetadata {
    pub fn build(
        s3_key: Option<&str>,
        row_metadata: &BTreeMap<String, String>,
        exchange_override: Option<&str>,
        document_id_override: Option<&str>,
    ) -> Self {
        let key_meta = s3_key.map(parse_s3_key_metadata).unwrap_or_default();

        let mut merged = MergedMetadata {
            exchange: key_meta.exchange,
            company_id: key_meta.company_id,
            filing_date: key_meta.filing_date,
            source_id: key_meta.source_id,
            ..Default::default()
        };

        let non_empty = |value: &String| !value.is_empty();
        if let Some(v) = row_metadata.get("exchange").filter(|v| non_empty(v)) {
            merged.exchange = Some(v.clone());
        }
        if let Some(v) = row_metadata.get("company_id").filter(|v| non_empty(v)) {
            merged.company_id = Some(v.clone());
        }
        if let Some(v) = row_metadata.get("company_name").filter(|v| non_empty(v)) {
            merged.company_name = Some(v.clone());
        }
        if let Some(v) = row_metadata.get("filing_date").filter(|v| non_empty(v)) {
            merged.filing_date = Some(v.clone());
        }
        if let Some(v) = row_metadata.get("filing_type").filter(|v| non_empty(v)) {
            merged.filing_type = Some(v.clone());
        }
        if let Some(v) = row_metadata.get("title").filter(|v| non_empty(v)) {
            merged.title = Some(v.clone());
        }
        if let Some(v) = row_metadata.get("source_id").filter(|v| non_empty(v)) {
            merged.source_id = Some(v.clone());
        }

        if let Some(exchange) = exchange_override {
            if !exchange.is_empty() {
                merged.exchange = Some(exchange.to_owned());
            }
        }
        if let Some(document_id) = document_id_override {
            if !document_id.is_empty() {
                merged.source_id = Some(document_id.to_owned());
            }
        }

        merged
    }

    pub fn document_id(&self, filename: &str) -> String {
        self.source_id.clone().unwrap_or_else(|| {
            filename
                .rsplit_once('.')
                .map(|(stem, _)| stem.to_owned())
                .unwrap_or_else(|| filename.to_owned())
        })
    }

    pub fn apply(&self, record: &mut PageRecord) {
        record.exchange = self.exchange.clone();
        record.company_id = self.company_id.clone();
        record.company_name = self.company_name.clone();
        record.filing_date = self.filing_date.clone();
        record.filing_type = self.filing_type.clone();
        record.title = self.title.clone();
    }
}

/// Result of extracting a whole document: the pages produced, the
/// one-based page numbers that were gibberish on the primary path, and an
/// optional error (pages produced before the error, if any, are still
/// returned per §4.4's "accumulate returned pages" rule).
pub struct ExtractionOutcome {
    pub pages: Vec<PageRecord>,
    pub broken_pages: Vec<u32>,
    pub error: Option<String>,
}

/// Extract pages from document bytes, auto-detecting PDF vs HTML.
pub async fn extract_document(
    data: &[u8],
    filename: &str,
    s3_key: Option<&str>,
    row_metadata: &BTreeMap<String, String>,
    exchange_override: Option<&str>,
    document_id_override: Option<&str>,
    gibberish: &crate::config::GibberishThresholds,
    inline_ocr: bool,
) -> ExtractionOutcome {
    let detect_name = s3_key.unwrap_or(filename);
    let file_type = classify(data, detect_name);
    let data = decompress_if_gzip(data);

    let merged = MergedMetadata::build(s3_key, row_metadata, exchange_override, document_id_override);
    let document_id = merged.document_id(filename);

    match file_type {
        Some(FileType::Pdf) => pdf::extract_pdf(&data, &merged, &document_id, s3_key, gibberish, inline_ocr).await,
        Some(FileType::Html) => html::extract_html(&data, &merged, &document_id, s3_key),
        None => ExtractionOutcome {
            pages: Vec::new(),
            broken_pages: Vec::new(),
            error: Some(format!("unsupported file type for {filename}")),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_pdf_by_extension() {
        assert_eq!(classify(b"whatever", "doc.PDF"), Some(FileType::Pdf));
    }

    #[test]
    fn classifies_pdf_by_magic_bytes_when_extension_unknown() {
        assert_eq!(classify(b"%PDF-1.4 ...", "doc.bin"), Some(FileType::Pdf));
    }

    #[test]
    fn classifies_html_by_content() {
        let html = b"<!DOCTYPE html><html><body>hi</body></html>";
        assert_eq!(classify(html, "doc"), Some(FileType::Html));
    }

    #[test]
    fn classify_matches_after_gzip_round_trip_for_pdf() {
        use flate2::Compression;
        use flate2::write::GzEncoder;
        use std::io::Write as _;

        let raw = b"%PDF-1.4 hello world";
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(raw).unwrap();
        let gzipped = encoder.finish().unwrap();

        assert_eq!(classify_from_content(raw), classify_from_content(&gzipped));
    }

    #[test]
    fn parses_six_part_key() {
        let meta = parse_s3_key_metadata("a/b/2024/01/02/X.pdf");
        assert_eq!(meta.exchange.as_deref(), Some("A"));
        assert_eq!(meta.company_id.as_deref(), Some("b"));
        assert_eq!(meta.filing_date.as_deref(), Some("2024-01-02"));
        assert_eq!(meta.source_id.as_deref(), Some("X"));
    }

    #[test]
    fn parses_bare_key() {
        let meta = parse_s3_key_metadata("X.pdf");
        assert_eq!(meta.exchange, None);
        assert_eq!(meta.company_id, None);
        assert_eq!(meta.source_id.as_deref(), Some("X"));
    }

    #[test]
    fn parses_three_part_key() {
        let meta = parse_s3_key_metadata("hkex/00123/X.pdf");
        assert_eq!(meta.exchange.as_deref(), Some("HKEX"));
        assert_eq!(meta.company_id.as_deref(), Some("00123"));
        assert_eq!(meta.source_id.as_deref(), Some("X"));
    }

    #[test]
    fn non_numeric_date_triple_is_skipped() {
        let meta = parse_s3_key_metadata("a/b/yyyy/mm/dd/X.pdf");
        assert_eq!(meta.filing_date, None);
        assert_eq!(meta.source_id.as_deref(), Some("X"));
    }

    #[test]
    fn row_metadata_overrides_key_metadata() {
        let mut row = BTreeMap::new();
        row.insert("exchange".to_owned(), "SEC".to_owned());
        let merged = MergedMetadata::build(Some("hkex/00123/X.pdf"), &row, None, None);
        assert_eq!(merged.exchange.as_deref(), Some("SEC"));
    }

    #[test]
    fn exchange_override_wins_over_row_metadata() {
        let mut row = BTreeMap::new();
        row.insert("exchange".to_owned(), "SEC".to_owned());
        let merged = MergedMetadata::build(Some("hkex/00123/X.pdf"), &row, Some("DART"), None);
        assert_eq!(merged.exchange.as_deref(), Some("DART"));
    }

    #[test]
    fn document_id_override_wins_over_everything() {
        let merged = MergedMetadata::build(Some("hkex/00123/X.pdf"), &BTreeMap::new(), None, Some("OVERRIDE"));
        assert_eq!(merged.document_id("X.pdf"), "OVERRIDE");
    }
}
