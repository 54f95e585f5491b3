//! OCR queue protocol (job canonicalization/chunking, the bounding-box
//! coordinate transform) and the OCR worker's consumer loop.

pub mod provider;
pub mod queue;
pub mod scale_in;

use crate::model::BoundingBox;

/// Sort, dedup, and drop non-positive page numbers, as both the publish
/// side (building an `OcrJob`) and the consume side (canonicalizing a
/// received message) require.
pub fn canonicalize_pages(pages: &[i64]) -> Vec<u32> {
    let mut cleaned: Vec<u32> = pages.iter().filter(|&&p| p > 0).map(|&p| p as u32).collect();
    cleaned.sort_unstable();
    cleaned.dedup();
    cleaned
}

/// Split canonicalized pages into message-sized chunks.
pub fn chunk_pages(pages: &[u32], chunk_size: usize) -> Vec<Vec<u32>> {
    if chunk_size == 0 {
        return vec![pages.to_vec()];
    }
    pages.chunks(chunk_size).map(|c| c.to_vec()).collect()
}

/// Transform a normalized `[0,1]` bounding box from the OCR provider into
/// source-PDF point coordinates, per §4.6: scale by page size, swap to
/// ensure `x0≤x1, y0≤y1`, clamp to the page rectangle, round to 0.1pt, and
/// drop empty words.
pub fn transform_bbox(
    x0: f64,
    y0: f64,
    x1: f64,
    y1: f64,
    word: &str,
    page_width: f64,
    page_height: f64,
) -> Option<BoundingBox> {
    let trimmed_word = word.trim();
    if trimmed_word.is_empty() {
        return None;
    }

    let (mut x0, mut x1) = (x0 * page_width, x1 * page_width);
    let (mut y0, mut y1) = (y0 * page_height, y1 * page_height);

    if x0 > x1 {
        std::mem::swap(&mut x0, &mut x1);
    }
    if y0 > y1 {
        std::mem::swap(&mut y0, &mut y1);
    }

    let clamp = |v: f64, max: f64| v.clamp(0.0, max);
    let round1 = |v: f64| (v * 10.0).round() / 10.0;

    Some(BoundingBox {
        x0: round1(clamp(x0, page_width)),
        y0: round1(clamp(y0, page_height)),
        x1: round1(clamp(x1, page_width)),
        y1: round1(clamp(y1, page_height)),
        word: trimmed_word.to_owned(),
    })
}

/// Deterministic patch object key: `{output_prefix}/{exchange_lower}/ocr-patches/{source_id}/pages_{first}_{last}_{digest}.jsonl`
/// where `digest` is the first 12 hex chars of `SHA-1(join(",", broken_pages))`.
pub fn patch_key(output_prefix: &str, exchange: &str, source_id: &str, broken_pages: &[u32]) -> String {
    use sha1::{Digest, Sha1};

    let joined = broken_pages
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",");
    let mut hasher = Sha1::new();
    hasher.update(joined.as_bytes());
    let digest_full = hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect::<String>();
    let digest = &digest_full[..12];

    let first = broken_pages.first().copied().unwrap_or(0);
    let last = broken_pages.last().copied().unwrap_or(0);
    let exchange_lower = exchange.to_ascii_lowercase();

    format!("{output_prefix}/{exchange_lower}/ocr-patches/{source_id}/pages_{first}_{last}_{digest}.jsonl")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_sorts_dedups_and_drops_nonpositive() {
        assert_eq!(canonicalize_pages(&[3, 1, 0, 1, -2, 2]), vec![1, 2, 3]);
    }

    #[test]
    fn chunk_pages_respects_size() {
        let pages: Vec<u32> = (1..=25).collect();
        let chunks = chunk_pages(&pages, 10);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 10);
        assert_eq!(chunks[2].len(), 5);
    }

    #[test]
    fn transform_bbox_swaps_and_clamps() {
        let bbox = transform_bbox(0.6, 0.9, 0.1, -0.1, "hi", 100.0, 200.0).unwrap();
        assert!(bbox.x0 <= bbox.x1);
        assert!(bbox.y0 <= bbox.y1);
        assert!(bbox.x0 >= 0.0 && bbox.x1 <= 100.0);
        assert!(bbox.y0 >= 0.0 && bbox.y1 <= 200.0);
    }

    #[test]
    fn transform_bbox_drops_empty_words() {
        assert!(transform_bbox(0.1, 0.1, 0.2, 0.2, "   ", 100.0, 100.0).is_none());
    }

    #[test]
    fn patch_key_is_a_pure_function_of_its_inputs() {
        let a = patch_key("processed", "HKEX", "123", &[1, 2, 3]);
        let b = patch_key("processed", "HKEX", "123", &[1, 2, 3]);
        assert_eq!(a, b);
        let c = patch_key("processed", "HKEX", "123", &[1, 2, 4]);
        assert_ne!(a, c);
    }

    #[test]
    fn patch_key_has_expected_shape() {
        let key = patch_key("processed", "HKEX", "123", &[2]);
        assert!(key.starts_with("processed/hkex/ocr-patches/123/pages_2_2_"));
        assert!(key.ends_with(".jsonl"));
    }
}
