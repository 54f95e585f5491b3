//! PDF extraction: per-page text layer via `lopdf`, plus on-demand
//! single-page rasterization for the OCR path (a PDF page has no text
//! layer to give Textract; it needs an image).

use std::process::Stdio;

use futures::StreamExt as _;
use lopdf::Document as PdfDocument;
use tokio::{io::AsyncWriteExt as _, process::Command};

use super::{ExtractionOutcome, MergedMetadata, gibberish::is_gibberish_with_thresholds};
use crate::{
    async_utils::{blocking_iter_streams::BlockingIterStream, check_for_command_failure},
    config::GibberishThresholds,
    model::{FileType, PageRecord},
    prelude::*,
};

/// Open a PDF and return its page count along with the parsed document, so
/// callers can extract individual pages without re-parsing.
pub fn open(data: &[u8]) -> Result<PdfDocument> {
    PdfDocument::load_mem(data).context("failed to open PDF")
}

pub fn page_count(doc: &PdfDocument) -> u32 {
    doc.get_pages().len() as u32
}

fn page_text(doc: &PdfDocument, page_number: u32) -> Result<String> {
    doc.extract_text(&[page_number])
        .with_context(|| format!("failed to extract text from page {page_number}"))
}

/// Iterator that walks a PDF's pages in order, extracting text one page at a
/// time. Owns the parsed document so [`BlockingIterStream`] can ship it back
/// and forth across the blocking thread pool between pages.
struct PdfPageTextIter {
    doc: PdfDocument,
    pages: std::ops::RangeInclusive<u32>,
}

impl Iterator for PdfPageTextIter {
    type Item = Result<(u32, String)>;

    fn next(&mut self) -> Option<Self::Item> {
        let page_number = self.pages.next()?;
        let text = page_text(&self.doc, page_number).unwrap_or_else(|err| {
            warn!("failed to extract text from page {page_number}: {err}");
            String::new()
        });
        Some(Ok((page_number, text)))
    }
}

/// Default US Letter size in points, used when a page's `MediaBox` can't be
/// read (scanned/malformed PDFs are exactly the ones likely to need OCR).
const DEFAULT_PAGE_SIZE: (f64, f64) = (612.0, 792.0);

/// Page size in points, read from the page's (possibly inherited)
/// `MediaBox`, for converting OCR-normalized bounding boxes back to PDF
/// coordinates.
pub fn page_size(doc: &PdfDocument, page_number: u32) -> (f64, f64) {
    let Some(&page_id) = doc.get_pages().get(&page_number) else {
        return DEFAULT_PAGE_SIZE;
    };
    let media_box = doc
        .get_object(page_id)
        .ok()
        .and_then(|obj| obj.as_dict().ok())
        .and_then(|dict| dict.get(b"MediaBox").ok())
        .and_then(|obj| obj.as_array().ok())
        .map(|arr| arr.to_vec());

    let Some(arr) = media_box else {
        return DEFAULT_PAGE_SIZE;
    };
    if arr.len() != 4 {
        return DEFAULT_PAGE_SIZE;
    }
    let as_f64 = |o: &lopdf::Object| o.as_float().map(f64::from).or_else(|_| o.as_i64().map(|i| i as f64));
    match (as_f64(&arr[0]), as_f64(&arr[1]), as_f64(&arr[2]), as_f64(&arr[3])) {
        (Ok(x0), Ok(y0), Ok(x1), Ok(y1)) => ((x1 - x0).abs(), (y1 - y0).abs()),
        _ => DEFAULT_PAGE_SIZE,
    }
}

pub async fn extract_pdf(
    data: &[u8],
    meta: &MergedMetadata,
    document_id: &str,
    s3_key: Option<&str>,
    gibberish: &GibberishThresholds,
    inline_ocr: bool,
) -> ExtractionOutcome {
    let doc = match open(data) {
        Ok(doc) => doc,
        Err(err) => {
            return ExtractionOutcome {
                pages: Vec::new(),
                broken_pages: Vec::new(),
                error: Some(err.to_string()),
            };
        }
    };

    let total_pages = page_count(&doc);
    let mut pages = Vec::with_capacity(total_pages as usize);
    let mut broken_pages = Vec::new();

    // `lopdf`'s per-page text extraction is CPU-bound; run it on the
    // blocking thread pool one page at a time instead of tying up the
    // executor for large documents.
    let mut page_texts = BlockingIterStream::new(PdfPageTextIter {
        doc,
        pages: 1..=total_pages,
    });

    while let Some(result) = page_texts.next().await {
        let (page_number, text) = result.expect("PdfPageTextIter never yields Err");

        let is_broken = is_gibberish_with_thresholds(
            &text,
            gibberish.min_length,
            gibberish.replacement_char_ratio,
            gibberish.control_char_ratio,
        );

        let (text, ocr_required) = if is_broken {
            broken_pages.push(page_number);
            // With inline OCR enabled the caller still needs the raw,
            // gibberish text on hand so it can fall back to it if the OCR
            // call itself fails; with inline OCR disabled the page is
            // deferred entirely to the OCR queue, so the primary pipeline
            // never surfaces unusable text downstream.
            if inline_ocr { (text, true) } else { (String::new(), true) }
        } else {
            (text, false)
        };

        let unique_page_id =
            PageRecord::unique_page_id(meta.exchange.as_deref(), document_id, page_number);
        let mut record = PageRecord {
            unique_page_id,
            document_id: document_id.to_owned(),
            page_number,
            total_pages,
            text,
            ocr_required,
            s3_key: s3_key.unwrap_or_default().to_owned(),
            file_type: FileType::Pdf,
            exchange: None,
            company_id: None,
            company_name: None,
            filing_date: None,
            filing_type: None,
            title: None,
        };
        meta.apply(&mut record);
        pages.push(record);
    }

    ExtractionOutcome {
        pages,
        broken_pages,
        error: None,
    }
}

/// Rasterize one page of a PDF to PNG bytes, for feeding to the OCR
/// provider. A PDF's text layer is exactly what's broken on a gibberish
/// page, so the OCR provider needs pixels, not text; `lopdf` has no
/// rasterizer, so this shells out to `pdftocairo` the same way the rest of
/// this codebase's page iteration does for rendering.
pub async fn render_page_to_png(data: &[u8], page_number: u32) -> Result<Vec<u8>> {
    let page_arg = page_number.to_string();
    let mut child = Command::new("pdftocairo")
        .args(["-png", "-r", "300", "-f", &page_arg, "-l", &page_arg, "-singlefile", "-", "-"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .context("failed to launch pdftocairo")?;

    let mut stdin = child.stdin.take().expect("stdin was piped");
    let data = data.to_vec();
    let write_task = tokio::spawn(async move {
        let _ = stdin.write_all(&data).await;
    });

    let output = child
        .wait_with_output()
        .await
        .context("failed to wait for pdftocairo")?;
    write_task.abort();

    check_for_command_failure("pdftocairo", output.status)?;
    Ok(output.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn meta() -> MergedMetadata {
        MergedMetadata::build(None, &BTreeMap::new(), None, None)
    }

    #[tokio::test]
    async fn invalid_pdf_bytes_report_an_error() {
        let outcome = extract_pdf(b"not a pdf", &meta(), "doc1", None, &GibberishThresholds::default(), false).await;
        assert!(outcome.pages.is_empty());
        assert!(outcome.error.is_some());
    }
}
