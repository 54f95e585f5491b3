//! OCR Worker long-poll loop: consumes queued jobs for broken PDF pages,
//! rasterizes and OCRs each page, and writes a deterministic patch file
//! plus per-page bounding-box artifacts.

use aws_sdk_s3::primitives::ByteStream;

use crate::{
    aws::AwsClients,
    config::OcrWorkerConfig,
    extract::pdf,
    model::{BoundingBox, FileType, OcrJob, PageRecord},
    ocr::{self, provider::OcrEngine, queue, scale_in::ScaleInProtection},
    prelude::*,
    ui::{ProgressConfig, Ui},
};

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

async fn object_exists(client: &aws_sdk_s3::Client, bucket: &str, key: &str) -> bool {
    client.head_object().bucket(bucket).key(key).send().await.is_ok()
}

/// `ocr-bboxes/{exchange_lower}/{source_id}/page_{N}.json`, per §6 — this
/// key is NOT namespaced under `output_prefix`; bbox artifacts live in
/// their own top-level prefix in the output bucket.
fn bbox_key(exchange: &str, source_id: &str, page_number: u32) -> String {
    let exchange_lower = exchange.to_ascii_lowercase();
    format!("ocr-bboxes/{exchange_lower}/{source_id}/page_{page_number}.json")
}

/// The result of attempting to OCR one page of a job.
enum PageOutcome {
    /// Page number was outside `1..=total_pages`; the ground truth
    /// (`ocr_worker.py::_process_job`) skips these rather than failing the
    /// whole job, since a stale or miscomputed page number in the job
    /// shouldn't block every other page in it.
    OutOfRange,
    /// A real failure (rasterization or the OCR call itself); the whole
    /// message is left for redelivery.
    Failed,
    Ok { record: PageRecord, boxes: Vec<BoundingBox> },
}

async fn ocr_one_page(
    job: &OcrJob,
    page_number: u32,
    doc: &lopdf::Document,
    data: &[u8],
    engine: &dyn OcrEngine,
) -> PageOutcome {
    let total_pages = pdf::page_count(doc);

    if page_number == 0 || page_number > total_pages {
        warn!("OCR job {} references out-of-range page {page_number}/{total_pages}", job.source_id);
        return PageOutcome::OutOfRange;
    }

    let document_id = job.source_id.clone();
    let unique_page_id = PageRecord::unique_page_id(Some(&job.exchange), &document_id, page_number);
    let mut record = PageRecord {
        unique_page_id,
        document_id: document_id.clone(),
        page_number,
        total_pages,
        text: String::new(),
        ocr_required: true,
        s3_key: job.s3_key.clone(),
        file_type: FileType::Pdf,
        exchange: Some(job.exchange.clone()),
        company_id: job.metadata.get("company_id").cloned(),
        company_name: job.metadata.get("company_name").cloned(),
        filing_date: job.metadata.get("filing_date").cloned(),
        filing_type: job.metadata.get("filing_type").cloned(),
        title: job.metadata.get("title").cloned(),
    };

    let image = match pdf::render_page_to_png(data, page_number).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!("failed to rasterize page {page_number} for {}: {err}", job.source_id);
            return PageOutcome::Failed;
        }
    };

    let result = match engine.ocr_page(&image).await {
        Ok(result) => result,
        Err(err) => {
            warn!("OCR call failed for page {page_number} of {}: {err}", job.source_id);
            return PageOutcome::Failed;
        }
    };

    let (page_width, page_height) = pdf::page_size(doc, page_number);
    let boxes: Vec<BoundingBox> = result
        .boxes
        .into_iter()
        .filter_map(|(x0, y0, x1, y1, word)| ocr::transform_bbox(x0, y0, x1, y1, &word, page_width, page_height))
        .collect();

    record.text = result.text;
    record.ocr_required = false;

    PageOutcome::Ok { record, boxes }
}

/// Process one queue message end to end. Returns `true` if every page
/// succeeded and the message is safe to delete.
async fn process_message(job: &OcrJob, config: &OcrWorkerConfig, aws: &AwsClients, engine: &dyn OcrEngine) -> bool {
    let data = match download_object(&aws.s3, &job.s3_bucket, &job.s3_key).await {
        Ok(data) => data,
        Err(err) => {
            warn!("failed to download {} for OCR job: {err}", job.s3_key);
            return false;
        }
    };
    let data = crate::extract::decompress_if_gzip(&data);

    let doc = match pdf::open(&data) {
        Ok(doc) => doc,
        Err(err) => {
            warn!("failed to open PDF {} for OCR job: {err}", job.s3_key);
            return false;
        }
    };

    let mut all_ok = true;
    let mut patch_records = Vec::with_capacity(job.broken_pages.len());

    for &page_number in &job.broken_pages {
        let (record, boxes) = match ocr_one_page(job, page_number, &doc, &data, engine).await {
            PageOutcome::OutOfRange => continue,
            PageOutcome::Failed => {
                all_ok = false;
                continue;
            }
            PageOutcome::Ok { record, boxes } => (record, boxes),
        };

        if !boxes.is_empty() {
            let key = bbox_key(&job.exchange, &job.source_id, page_number);
            let body = match serde_json::to_vec(&boxes) {
                Ok(body) => body,
                Err(err) => {
                    warn!("failed to serialize bounding boxes for page {page_number}: {err}");
                    all_ok = false;
                    patch_records.push(record);
                    continue;
                }
            };
            if let Err(err) = aws
                .s3
                .put_object()
                .bucket(&config.output_bucket)
                .key(&key)
                .body(ByteStream::from(body))
                .content_type("application/json")
                .send()
                .await
            {
                warn!("failed to upload bounding boxes for page {page_number}: {err}");
                all_ok = false;
            }
        }

        patch_records.push(record);
    }

    if !all_ok {
        return false;
    }

    if patch_records.is_empty() {
        return true;
    }

    let patch_key = ocr::patch_key(&config.output_prefix, &job.exchange, &job.source_id, &job.broken_pages);
    if object_exists(&aws.s3, &config.output_bucket, &patch_key).await {
        return true;
    }

    let mut body = String::new();
    for record in &patch_records {
        match serde_json::to_string(record) {
            Ok(line) => {
                body.push_str(&line);
                body.push('\n');
            }
            Err(err) => {
                warn!("failed to serialize OCR patch record: {err}");
                return false;
            }
        }
    }

    if let Err(err) = aws
        .s3
        .put_object()
        .bucket(&config.output_bucket)
        .key(&patch_key)
        .body(ByteStream::from(body.into_bytes()))
        .content_type("application/x-ndjson")
        .send()
        .await
    {
        warn!("failed to upload OCR patch {patch_key}: {err}");
        return false;
    }

    true
}

pub async fn run_ocr_worker(
    config: &OcrWorkerConfig,
    aws: &AwsClients,
    engine: &dyn OcrEngine,
    ui: &Ui,
) -> Result<i32> {
    if let Err(err) = engine.warm_up().await {
        warn!("OCR provider warm-up failed, continuing anyway: {err}");
    }

    let protection = ScaleInProtection::new(
        aws.ecs.clone(),
        config.enable_scale_in_protection,
        config.scale_in_protection_minutes,
    );

    let spinner = ui.new_spinner(&ProgressConfig {
        emoji: "\u{1F50D}",
        msg: "waiting for OCR jobs",
        done_msg: "OCR worker stopped",
    });

    loop {
        let messages = queue::receive_messages(
            &aws.sqs,
            &config.ocr_queue_url,
            config.max_messages,
            config.wait_time,
            config.visibility_timeout,
        )
        .await?;

        if messages.is_empty() {
            if config.run_once {
                break;
            }
            continue;
        }

        for message in &messages {
            let Some(body) = &message.body else { continue };
            let job = match queue::parse_and_validate(body) {
                Ok(job) => job,
                Err(err) => {
                    warn!("discarding unparsable OCR message: {err}");
                    if let Some(handle) = &message.receipt_handle {
                        let _ = queue::delete_message(&aws.sqs, &config.ocr_queue_url, handle).await;
                    }
                    continue;
                }
            };

            spinner.set_message(format!("OCR {}", job.source_id));
            protection.enable().await;
            let succeeded = process_message(&job, config, aws, engine).await;
            protection.disable_for_task().await;

            if succeeded {
                if let Some(handle) = &message.receipt_handle {
                    if let Err(err) = queue::delete_message(&aws.sqs, &config.ocr_queue_url, handle).await {
                        warn!("failed to delete completed OCR message: {err}");
                    }
                }
            } else {
                warn!("OCR job {} did not fully succeed; leaving for redelivery", job.source_id);
            }
        }

        if config.run_once {
            break;
        }
    }

    spinner.finish();
    Ok(0)
}
