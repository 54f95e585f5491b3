//! SQS-backed publish (producer, inside the extraction worker) and
//! receive/parse/validate (consumer, inside the OCR worker) halves of the
//! OCR work-queue protocol.

use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use aws_sdk_sqs::{Client as SqsClient, types::Message};
use chrono::Utc;

use super::{canonicalize_pages, chunk_pages};
use crate::{model::OcrJob, prelude::*};

static LOGGED_MISSING_QUEUE_URL: AtomicBool = AtomicBool::new(false);

/// ISO-8601 UTC, e.g. `"2024-01-15T10:30:00.123456Z"`.
fn submitted_at_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

/// Metadata keys allowed onto an `OcrJob`.
const JOB_METADATA_KEYS: &[&str] = &["company_id", "company_name", "filing_date", "filing_type", "title"];

/// Fields required to publish a job; missing any of these causes the
/// publish to be skipped with a warning, per §4.5.
pub struct PublishRequest<'a> {
    pub exchange: &'a str,
    pub source_id: &'a str,
    pub s3_bucket: &'a str,
    pub s3_key: &'a str,
    pub broken_pages: &'a [u32],
    pub metadata: &'a BTreeMap<String, String>,
}

/// Publish one OCR job per chunk of broken pages. Returns the number of
/// messages successfully sent.
pub async fn publish_ocr_jobs(
    client: &SqsClient,
    queue_url: &str,
    enable_ocr_queue: bool,
    page_chunk_size: u32,
    request: &PublishRequest<'_>,
) -> u64 {
    if !enable_ocr_queue || queue_url.is_empty() {
        if !LOGGED_MISSING_QUEUE_URL.swap(true, Ordering::Relaxed) {
            warn!("OCR queue publishing disabled or queue URL unset; broken pages will not be OCRed");
        }
        return 0;
    }

    if request.exchange.is_empty()
        || request.source_id.is_empty()
        || request.s3_bucket.is_empty()
        || request.s3_key.is_empty()
    {
        warn!(
            "skipping OCR publish for {}: missing required field(s)",
            request.source_id
        );
        return 0;
    }

    let pages = canonicalize_pages(&request.broken_pages.iter().map(|&p| p as i64).collect::<Vec<_>>());
    if pages.is_empty() {
        return 0;
    }

    let metadata: BTreeMap<String, String> = request
        .metadata
        .iter()
        .filter(|(k, _)| JOB_METADATA_KEYS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let mut sent = 0u64;
    for chunk in chunk_pages(&pages, page_chunk_size.max(1) as usize) {
        let job = OcrJob {
            version: 1,
            exchange: request.exchange.to_ascii_uppercase(),
            source_id: request.source_id.to_owned(),
            s3_bucket: request.s3_bucket.to_owned(),
            s3_key: request.s3_key.to_owned(),
            broken_pages: chunk,
            submitted_at: submitted_at_now(),
            metadata: metadata.clone(),
        };

        let body = match serde_json::to_string(&job) {
            Ok(body) => body,
            Err(err) => {
                warn!("failed to serialize OCR job for {}: {err}", request.source_id);
                continue;
            }
        };

        match client.send_message().queue_url(queue_url).message_body(body).send().await {
            Ok(_) => sent += 1,
            Err(err) => warn!("failed to publish OCR job for {}: {err}", request.source_id),
        }
    }

    sent
}

/// Receive up to `max_messages` from the queue with the given long-poll
/// wait time and visibility timeout.
pub async fn receive_messages(
    client: &SqsClient,
    queue_url: &str,
    max_messages: i32,
    wait_time: Duration,
    visibility_timeout: Duration,
) -> Result<Vec<Message>> {
    let response = client
        .receive_message()
        .queue_url(queue_url)
        .max_number_of_messages(max_messages)
        .wait_time_seconds(wait_time.as_secs() as i32)
        .visibility_timeout(visibility_timeout.as_secs() as i32)
        .send()
        .await
        .context("failed to receive messages from OCR queue")?;
    Ok(response.messages.unwrap_or_default())
}

pub async fn delete_message(client: &SqsClient, queue_url: &str, receipt_handle: &str) -> Result<()> {
    client
        .delete_message()
        .queue_url(queue_url)
        .receipt_handle(receipt_handle)
        .send()
        .await
        .context("failed to delete OCR message")?;
    Ok(())
}

/// Parse and validate a received message body into a canonicalized
/// `OcrJob`. Rejects missing required fields, a non-list or empty
/// `broken_pages`, or pages that coerce to non-positive after
/// canonicalization.
pub fn parse_and_validate(body: &str) -> Result<OcrJob> {
    let mut job: OcrJob = serde_json::from_str(body).context("OCR message body is not valid JSON")?;

    if job.exchange.is_empty() || job.source_id.is_empty() || job.s3_bucket.is_empty() || job.s3_key.is_empty() {
        return Err(anyhow!("OCR message missing a required field"));
    }

    job.broken_pages = canonicalize_pages(&job.broken_pages.iter().map(|&p| p as i64).collect::<Vec<_>>());
    if job.broken_pages.is_empty() {
        return Err(anyhow!("OCR message has no valid broken pages"));
    }

    Ok(job)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_missing_required_fields() {
        let body = serde_json::json!({
            "version": 1,
            "exchange": "",
            "source_id": "123",
            "s3_bucket": "b",
            "s3_key": "k",
            "broken_pages": [1],
            "submitted_at": "2024-01-01T00:00:00Z",
        })
        .to_string();
        assert!(parse_and_validate(&body).is_err());
    }

    #[test]
    fn rejects_empty_broken_pages() {
        let body = serde_json::json!({
            "version": 1,
            "exchange": "HKEX",
            "source_id": "123",
            "s3_bucket": "b",
            "s3_key": "k",
            "broken_pages": [0, -1],
            "submitted_at": "2024-01-01T00:00:00Z",
        })
        .to_string();
        assert!(parse_and_validate(&body).is_err());
    }

    #[test]
    fn canonicalizes_pages_on_parse() {
        let body = serde_json::json!({
            "version": 1,
            "exchange": "HKEX",
            "source_id": "123",
            "s3_bucket": "b",
            "s3_key": "k",
            "broken_pages": [3, 1, 1, 2],
            "submitted_at": "2024-01-01T00:00:00Z",
        })
        .to_string();
        let job = parse_and_validate(&body).unwrap();
        assert_eq!(job.broken_pages, vec![1, 2, 3]);
    }
}
