//! Extraction Worker orchestration: pulls a manifest row range into memory,
//! extracts each document, defers (or inlines) OCR for broken pages, shards
//! output to the object store, and reports job/ledger state.

use std::collections::BTreeMap;

use aws_sdk_s3::primitives::ByteStream;

use crate::{
    aws::AwsClients,
    config::ExtractionWorkerConfig,
    dedup::{DedupLedgerClient, ProcessedItem},
    extract::{self, ExtractionOutcome},
    job_tracking::{ALL_FILES_FAILED_MESSAGE, JobTrackingClient},
    manifest,
    metrics,
    model::{JobStats, ManifestRow, PageRecord},
    ocr::{
        provider::{OcrEngine, TextractOcrEngine},
        queue::{self, PublishRequest},
    },
    prelude::*,
    ui::{ProgressConfig, Ui},
};

const JOB_TYPE: &str = "extraction";
/// Output shards are split at this payload boundary, well under the real
/// 10 MiB cap, so one oversized record never tips a shard past it.
const SHARD_SOFT_LIMIT_BYTES: usize = 9 * 1024 * 1024;
const PROGRESS_LOG_INTERVAL: u64 = 100;

fn filename_from_key(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

fn metadata_fields_for_queue(record: &PageRecord) -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();
    if let Some(v) = &record.company_id {
        fields.insert("company_id".to_owned(), v.clone());
    }
    if let Some(v) = &record.company_name {
        fields.insert("company_name".to_owned(), v.clone());
    }
    if let Some(v) = &record.filing_date {
        fields.insert("filing_date".to_owned(), v.clone());
    }
    if let Some(v) = &record.filing_type {
        fields.insert("filing_type".to_owned(), v.clone());
    }
    if let Some(v) = &record.title {
        fields.insert("title".to_owned(), v.clone());
    }
    fields
}

/// A shard writer that batches `PageRecord`s into `~10 MiB` JSONL objects
/// keyed `{prefix}/batch_{array_index:06}_{part:03}.jsonl`.
struct ShardWriter<'a> {
    client: &'a aws_sdk_s3::Client,
    bucket: String,
    prefix: String,
    array_index: u32,
    part: u32,
    buffer: String,
}

impl<'a> ShardWriter<'a> {
    fn new(client: &'a aws_sdk_s3::Client, bucket: String, prefix: String, array_index: u32) -> Self {
        Self {
            client,
            bucket,
            prefix,
            array_index,
            part: 0,
            buffer: String::new(),
        }
    }

    fn shard_key(&self) -> String {
        format!("{}/batch_{:06}_{:03}.jsonl", self.prefix, self.array_index, self.part)
    }

    async fn push(&mut self, record: &PageRecord) -> Result<()> {
        let line = serde_json::to_string(record).context("failed to serialize a page record")?;
        if !self.buffer.is_empty() && self.buffer.len() + line.len() + 1 > SHARD_SOFT_LIMIT_BYTES {
            self.flush().await?;
        }
        self.buffer.push_str(&line);
        self.buffer.push('\n');
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let key = self.shard_key();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(std::mem::take(&mut self.buffer).into_bytes()))
            .content_type("application/x-ndjson")
            .send()
            .await
            .with_context(|| format!("failed to upload shard s3://{}/{key}", self.bucket))?;
        self.part += 1;
        Ok(())
    }
}

async fn download_object(client: &aws_sdk_s3::Client, bucket: &str, key: &str) -> Result<Vec<u8>> {
    let object = client
        .get_object()
        .bucket(bucket)
        .key(key)
        .send()
        .await
        .with_context(|| format!("failed to fetch s3://{bucket}/{key}"))?;
    let bytes = object
        .body
        .collect()
        .await
        .with_context(|| format!("failed to read body of s3://{bucket}/{key}"))?
        .into_bytes();
    Ok(bytes.to_vec())
}

/// Apply Textract OCR inline to the pages in `outcome.broken_pages`. On
/// success a page's raw (gibberish) text is replaced with the OCR result
/// and `ocr_required` cleared; on failure the page is left untouched, so
/// the original gibberish text `extract_pdf` kept for this inline-OCR run
/// survives, per §4.2. Used only when `ENABLE_INLINE_OCR` is set; the
/// default path defers OCR to the queue.
async fn apply_inline_ocr(
    data: &[u8],
    outcome: &mut ExtractionOutcome,
    textract: &aws_sdk_textract::Client,
) {
    if outcome.broken_pages.is_empty() {
        return;
    }
    let doc = match extract::pdf::open(data) {
        Ok(doc) => doc,
        Err(_) => return,
    };
    let engine = TextractOcrEngine::new(textract.clone(), 1);

    for &page_number in &outcome.broken_pages.clone() {
        let image = match extract::pdf::render_page_to_png(data, page_number).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("inline OCR rasterization failed for page {page_number}: {err}");
                continue;
            }
        };
        let result = match engine.ocr_page(&image).await {
            Ok(result) => result,
            Err(err) => {
                warn!("inline OCR call failed for page {page_number}: {err}");
                continue;
            }
        };
        if let Some(record) = outcome
            .pages
            .iter_mut()
            .find(|p| p.page_number == page_number)
        {
            record.text = result.text;
            record.ocr_required = false;
        }
    }
}

pub async fn run_extraction_worker(config: &ExtractionWorkerConfig, aws: &AwsClients, ui: &Ui) -> Result<i32> {
    let job_tracking = JobTrackingClient::new(&aws.dynamodb, config.job_tracking_table.clone());
    let dedup = DedupLedgerClient::new(&aws.dynamodb, config.dedup_table.clone());

    if config.enable_job_tracking {
        job_tracking.record_job_start(&config.job_id).await;
    }

    let metadata_lookup =
        manifest::load_metadata_lookup(&aws.s3, &config.metadata_bucket, &config.metadata_key).await;

    let (start, end) = config.row_range_usize();
    let rows = manifest::stream_manifest_range(&aws.s3, &config.manifest_bucket, &config.manifest_key, start, end)
        .await
        .context("failed to read manifest row range")?;

    let provisional_ids: Vec<String> = rows
        .iter()
        .map(|row| {
            extract::parse_s3_key_metadata(&row.key)
                .source_id
                .unwrap_or_else(|| filename_from_key(&row.key).to_owned())
        })
        .collect();

    let skip_set = if config.enable_dedup {
        dedup
            .batch_check_completed(&config.exchange, &provisional_ids, JOB_TYPE)
            .await
    } else {
        Default::default()
    };

    let mut stats = JobStats::default();
    let mut gibberish_pages = 0u32;
    let mut processed_items = Vec::new();
    let mut shard = ShardWriter::new(&aws.s3, config.output_bucket.clone(), config.output_prefix.clone(), config.array_index);

    let progress = ui.new_progress_bar(
        &ProgressConfig {
            emoji: "\u{1F4C4}",
            msg: "extracting",
            done_msg: "extraction complete",
        },
        rows.len() as u64,
    );

    for (idx, row) in rows.iter().enumerate() {
        progress.inc(1);
        if idx > 0 && idx % PROGRESS_LOG_INTERVAL as usize == 0 {
            info!("processed {idx}/{} rows", rows.len());
        }

        let provisional_id = &provisional_ids[idx];
        if skip_set.contains(provisional_id) {
            stats.files_skipped += 1;
            continue;
        }

        match process_row(row, &metadata_lookup, config, aws, &mut shard).await {
            Ok((mut outcome, document_id, decompressed)) => {
                if config.enable_inline_ocr {
                    apply_inline_ocr(&decompressed, &mut outcome, &aws.textract).await;
                    for record in &outcome.pages {
                        shard.push(record).await?;
                    }
                } else {
                    publish_broken_pages(config, aws, row, &outcome, &document_id).await;
                }

                gibberish_pages += outcome.broken_pages.len() as u32;

                if let Some(error) = &outcome.error {
                    stats.files_failed += 1;
                    if config.enable_job_tracking {
                        job_tracking
                            .record_file_error(&config.job_id, &document_id, error)
                            .await;
                    }
                    if config.enable_dedup {
                        dedup
                            .record_failed(&config.exchange, &document_id, &row.key, error, JOB_TYPE)
                            .await;
                    }
                } else {
                    stats.files_processed += 1;
                    stats.pages_extracted += outcome.pages.len() as u64;
                    processed_items.push(ProcessedItem {
                        source_id: document_id,
                        s3_key: row.key.clone(),
                        pages_extracted: outcome.pages.len() as u32,
                    });
                }
            }
            Err(err) => {
                stats.files_failed += 1;
                warn!("failed to process s3://{}/{}: {err}", row.bucket, row.key);
                if config.enable_job_tracking {
                    job_tracking
                        .record_file_error(&config.job_id, provisional_id, &err.to_string())
                        .await;
                }
            }
        }
    }

    shard.flush().await?;
    progress.finish();

    if config.enable_dedup && !processed_items.is_empty() {
        dedup
            .batch_record_processed(&config.exchange, &processed_items, &config.job_id, JOB_TYPE)
            .await;
    }

    if !config.exchange.is_empty() {
        metrics::record_gibberish_pages(&aws.cloudwatch, &config.exchange, gibberish_pages).await;
    }

    let exit_code = if stats.is_total_failure() { 1 } else { 0 };
    if config.enable_job_tracking {
        let (status, message) = if stats.is_total_failure() {
            ("FAILED", Some(ALL_FILES_FAILED_MESSAGE))
        } else {
            ("SUCCEEDED", None)
        };
        job_tracking
            .record_job_complete(&config.job_id, status, message)
            .await;
    }

    info!(
        "job {} complete: processed={} failed={} skipped={} pages={}",
        config.job_id, stats.files_processed, stats.files_failed, stats.files_skipped, stats.pages_extracted
    );

    Ok(exit_code)
}

/// Download, merge metadata, and extract a single manifest row. Returns the
/// extraction outcome and the resolved document id.
async fn process_row(
    row: &ManifestRow,
    metadata_lookup: &BTreeMap<String, BTreeMap<String, String>>,
    config: &ExtractionWorkerConfig,
    aws: &AwsClients,
    shard: &mut ShardWriter<'_>,
) -> Result<(ExtractionOutcome, String, Vec<u8>)> {
    let data = download_object(&aws.s3, &row.bucket, &row.key).await?;
    let decompressed = extract::decompress_if_gzip(&data);
    let filename = filename_from_key(&row.key);

    let key_meta = extract::parse_s3_key_metadata(&row.key);
    let lookup_id = key_meta.source_id.clone().unwrap_or_else(|| filename.to_owned());
    let mut merged_row_metadata = row.metadata.clone();
    if let Some(extra) = metadata_lookup.get(&lookup_id) {
        for (k, v) in extra {
            merged_row_metadata.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }

    let exchange_override = if config.exchange.is_empty() {
        None
    } else {
        Some(config.exchange.as_str())
    };

    let outcome = extract::extract_document(
        &data,
        filename,
        Some(&row.key),
        &merged_row_metadata,
        exchange_override,
        None,
        &config.gibberish,
        config.enable_inline_ocr,
    )
    .await;

    let document_id = outcome
        .pages
        .first()
        .map(|p| p.document_id.clone())
        .unwrap_or_else(|| lookup_id.clone());

    if outcome.error.is_none() && !config.enable_inline_ocr {
        for record in &outcome.pages {
            shard.push(record).await?;
        }
    }

    Ok((outcome, document_id, decompressed))
}

async fn publish_broken_pages(
    config: &ExtractionWorkerConfig,
    aws: &AwsClients,
    row: &ManifestRow,
    outcome: &ExtractionOutcome,
    document_id: &str,
) {
    if outcome.broken_pages.is_empty() {
        return;
    }
    let metadata = outcome
        .pages
        .first()
        .map(metadata_fields_for_queue)
        .unwrap_or_default();

    let broken_pages: Vec<u32> = outcome.broken_pages.clone();
    let request = PublishRequest {
        exchange: &config.exchange,
        source_id: document_id,
        s3_bucket: &row.bucket,
        s3_key: &row.key,
        broken_pages: &broken_pages,
        metadata: &metadata,
    };
    queue::publish_ocr_jobs(
        &aws.sqs,
        &config.ocr_queue_url,
        config.enable_ocr_queue,
        config.ocr_page_chunk_size,
        &request,
    )
    .await;
}
