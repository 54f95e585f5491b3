//! HTML extraction: decode with an encoding fallback chain, strip
//! non-content subtrees, and flatten the remaining text into one page.

use scraper::Html;

use super::{ExtractionOutcome, MergedMetadata, decompress_if_gzip};
use crate::model::{FileType, PageRecord};

const STRIPPED_TAGS: &[&str] = &["script", "style", "head", "meta", "link"];

/// Decode bytes trying `utf-8, gb2312, big5, latin-1` in order, falling
/// back to lossy UTF-8 if none of those succeed cleanly.
fn decode_best_effort(bytes: &[u8]) -> String {
    let encodings = [
        encoding_rs::UTF_8,
        encoding_rs::GB18030,
        encoding_rs::BIG5,
        encoding_rs::WINDOWS_1252,
    ];
    for encoding in encodings {
        let (text, _, had_errors) = encoding.decode(bytes);
        if !had_errors {
            return text.into_owned();
        }
    }
    String::from_utf8_lossy(bytes).into_owned()
}

/// Collapse 3+ consecutive newlines down to exactly two.
fn collapse_blank_lines(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut newline_run = 0;
    for c in text.chars() {
        if c == '\n' {
            newline_run += 1;
            if newline_run <= 2 {
                result.push(c);
            }
        } else {
            newline_run = 0;
            result.push(c);
        }
    }
    result
}

/// Walk every text node under the root, dropping any whose parent chain
/// includes a stripped tag, and join what's left with newlines.
fn strip_and_extract(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut lines = Vec::new();
    for node in document.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let in_stripped_subtree = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|el| STRIPPED_TAGS.contains(&el.name()))
        });
        if in_stripped_subtree {
            continue;
        }
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            lines.push(trimmed.to_owned());
        }
    }
    collapse_blank_lines(&lines.join("\n"))
}

pub fn extract_html(
    data: &[u8],
    meta: &MergedMetadata,
    document_id: &str,
    s3_key: Option<&str>,
) -> ExtractionOutcome {
    let decompressed = decompress_if_gzip(data);
    let html_text = decode_best_effort(&decompressed);
    let text = strip_and_extract(&html_text);

    let unique_page_id = PageRecord::unique_page_id(meta.exchange.as_deref(), document_id, 1);
    let mut record = PageRecord {
        unique_page_id,
        document_id: document_id.to_owned(),
        page_number: 1,
        total_pages: 1,
        text,
        ocr_required: false,
        s3_key: s3_key.unwrap_or_default().to_owned(),
        file_type: FileType::Html,
        exchange: None,
        company_id: None,
        company_name: None,
        filing_date: None,
        filing_type: None,
        title: None,
    };
    meta.apply(&mut record);

    ExtractionOutcome {
        pages: vec![record],
        broken_pages: Vec::new(),
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn strips_script_and_style() {
        let html = "<html><head><style>.a{}</style></head><body><script>evil()</script>hello world</body></html>";
        let meta = MergedMetadata::build(None, &BTreeMap::new(), None, None);
        let outcome = extract_html(html.as_bytes(), &meta, "doc1", None);
        assert_eq!(outcome.pages.len(), 1);
        assert!(outcome.pages[0].text.contains("hello world"));
        assert!(!outcome.pages[0].text.contains("evil"));
    }

    #[test]
    fn produces_single_page() {
        let html = "<html><body>hi</body></html>";
        let meta = MergedMetadata::build(None, &BTreeMap::new(), None, None);
        let outcome = extract_html(html.as_bytes(), &meta, "doc1", None);
        assert_eq!(outcome.pages[0].page_number, 1);
        assert_eq!(outcome.pages[0].total_pages, 1);
        assert_eq!(outcome.pages[0].file_type, FileType::Html);
    }

    #[test]
    fn collapses_long_blank_runs() {
        let text = "a\n\n\n\n\nb";
        assert_eq!(collapse_blank_lines(text), "a\n\nb");
    }

    #[test]
    fn decodes_invalid_utf8_via_fallback_chain() {
        // Latin-1 encoded bytes for "café" won't round-trip cleanly as
        // strict UTF-8, so the fallback chain should still produce text
        // rather than panicking.
        let bytes = [b'c', b'a', b'f', 0xE9];
        let decoded = decode_best_effort(&bytes);
        assert!(decoded.starts_with("caf"));
    }
}
