//! The OCR provider abstraction and its Textract-backed implementation.
//!
//! Both the inline-OCR path (extraction worker) and the OCR worker consume
//! the same trait, so there is exactly one place that knows how to turn
//! page pixels into text and word boxes.

use aws_sdk_textract::types::{Block, BlockType, Document as TextractDocument};
use leaky_bucket::RateLimiter;

use crate::{prelude::*, retry::retry_transient_aws_call};

/// Text plus per-word bounding boxes recovered from one page image.
pub struct OcrPageResult {
    pub text: String,
    pub boxes: Vec<(f64, f64, f64, f64, String)>,
}

#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// OCR a single rendered page image (already rasterized to PNG/JPEG
    /// bytes by the caller).
    async fn ocr_page(&self, image_bytes: &[u8]) -> Result<OcrPageResult>;

    /// Optionally warm the provider so the first real call doesn't pay
    /// cold-start latency. Default is a no-op.
    async fn warm_up(&self) -> Result<()> {
        Ok(())
    }
}

const ESTIMATED_PAGE_COST: f64 = 0.004;

pub struct TextractOcrEngine {
    client: aws_sdk_textract::Client,
    rate_limiter: RateLimiter,
}

impl TextractOcrEngine {
    pub fn new(client: aws_sdk_textract::Client, concurrency_limit: usize) -> Self {
        let rate_limiter = RateLimiter::builder()
            .max(concurrency_limit.max(1))
            .initial(concurrency_limit.max(1))
            .refill(concurrency_limit.max(1))
            .interval(std::time::Duration::from_secs(1))
            .build();
        Self {
            client,
            rate_limiter,
        }
    }
}

#[async_trait]
impl OcrEngine for TextractOcrEngine {
    async fn ocr_page(&self, image_bytes: &[u8]) -> Result<OcrPageResult> {
        self.rate_limiter.acquire_one().await;

        let document = TextractDocument::builder()
            .bytes(aws_smithy_types::Blob::new(image_bytes.to_vec()))
            .build();

        let response = retry_transient_aws_call(|| {
            self.client
                .analyze_document()
                .document(document.clone())
                .feature_types(aws_sdk_textract::types::FeatureType::Layout)
                .send()
        })
        .await
        .context("Textract AnalyzeDocument call failed")?;

        let blocks = response.blocks.unwrap_or_default();
        Ok(reconstruct(&blocks))
    }
}

/// Reconstruct reading-order text and per-word boxes from a Textract block
/// tree: layout blocks give reading order, `WORD` blocks give text and
/// normalized geometry.
fn reconstruct(blocks: &[Block]) -> OcrPageResult {
    let mut lines = Vec::new();
    let mut boxes = Vec::new();

    for block in blocks {
        if block.block_type() != Some(&BlockType::Line) {
            continue;
        }
        if let Some(text) = &block.text {
            lines.push(text.clone());
        }
    }

    for block in blocks {
        if block.block_type() != Some(&BlockType::Word) {
            continue;
        }
        let Some(text) = &block.text else { continue };
        let Some(geometry) = &block.geometry else {
            continue;
        };
        let Some(bbox) = &geometry.bounding_box else {
            continue;
        };
        let left = bbox.left as f64;
        let top = bbox.top as f64;
        let width = bbox.width as f64;
        let height = bbox.height as f64;
        boxes.push((left, top, left + width, top + height, text.clone()));
    }

    OcrPageResult {
        text: lines.join("\n"),
        boxes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimated_page_cost_is_positive() {
        assert!(ESTIMATED_PAGE_COST > 0.0);
    }
}
