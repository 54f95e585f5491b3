//! Manifest Reader: streams a CSV row range (or a pre-split chunk file) from
//! the object store into [`ManifestRow`]s.

use std::collections::BTreeMap;

use aws_sdk_s3::Client as S3Client;
use csv_async::StringRecord;
use futures::TryStreamExt as _;

use crate::{model::ManifestRow, prelude::*};

/// Optional metadata columns recognized on a manifest row.
const METADATA_COLUMNS: &[&str] = &[
    "company_id",
    "company_name",
    "filing_date",
    "filing_type",
    "title",
    "source_id",
    "exchange",
    "report_date",
];

async fn get_object_as_string(client: &S3Client, bucket: &str, key: &str) -> Result<String> {
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
    String::from_utf8(bytes.to_vec())
        .with_context(|| format!("manifest s3://{bucket}/{key} is not valid UTF-8"))
}

/// A small header-name-to-index lookup, since [`StringRecord`] only indexes
/// positionally.
pub struct StringRecordPosition {
    index_by_name: BTreeMap<String, usize>,
}

impl StringRecordPosition {
    fn new(headers: &StringRecord) -> Self {
        let index_by_name = headers
            .iter()
            .enumerate()
            .map(|(i, name)| (name.to_owned(), i))
            .collect();
        Self { index_by_name }
    }

    fn get<'r>(&self, record: &'r StringRecord, name: &str) -> Option<&'r str> {
        self.index_by_name.get(name).and_then(|&i| record.get(i))
    }
}

/// Parse one CSV record into a [`ManifestRow`], supporting both
/// `{bucket,key}` and `{s3_bucket,s3_key}` column naming. Returns `None`
/// (and logs) if neither naming scheme yields a non-empty bucket and key.
fn row_from_record(record: &StringRecord, headers: &StringRecordPosition, idx: usize) -> Option<ManifestRow> {
    let get = |name: &str| headers.get(record, name);

    let bucket = get("bucket").or_else(|| get("s3_bucket")).unwrap_or_default();
    let key = get("key").or_else(|| get("s3_key")).unwrap_or_default();

    if bucket.is_empty() || key.is_empty() {
        warn!("invalid manifest row {idx}: missing bucket or key");
        return None;
    }

    let mut metadata = BTreeMap::new();
    for &column in METADATA_COLUMNS {
        if let Some(value) = get(column) {
            if !value.is_empty() {
                metadata.insert(column.to_owned(), value.to_owned());
            }
        }
    }
    if let Some(report_date) = metadata.remove("report_date") {
        metadata.entry("filing_date".to_owned()).or_insert(report_date);
    }

    Some(ManifestRow {
        bucket: bucket.to_owned(),
        key: key.to_owned(),
        metadata,
    })
}

/// Stream rows `[start, end)` (zero-based, excluding the header) from a CSV
/// manifest object. Failure to fetch the manifest is fatal, per §4.1.
///
/// Rows are read as an async stream directly off the S3 object body, rather
/// than buffered into one `csv::Reader`, so a worker never holds more of a
/// large manifest in memory than the rows its own chunk needs.
pub async fn stream_manifest_range(
    client: &S3Client,
    bucket: &str,
    key: &str,
    start: usize,
    end: usize,
) -> Result<Vec<ManifestRow>> {
    let object = client
        .get_object()
        .bucket(bucket)
        .key(key)
        .send()
        .await
        .with_context(|| format!("failed to fetch manifest s3://{bucket}/{key}"))?;
    let bytes = object
        .body
        .collect()
        .await
        .with_context(|| format!("failed to read body of manifest s3://{bucket}/{key}"))?
        .into_bytes();

    let mut reader = csv_async::AsyncReaderBuilder::new().create_reader(std::io::Cursor::new(bytes.to_vec()));
    let headers = StringRecordPosition::new(
        &reader
            .headers()
            .await
            .with_context(|| format!("failed to read manifest headers from s3://{bucket}/{key}"))?
            .clone(),
    );

    let mut records = reader.into_records();
    let mut rows = Vec::new();
    let mut idx = 0usize;
    while idx < end {
        let Some(record) = records
            .try_next()
            .await
            .with_context(|| format!("failed to parse manifest row {idx}"))?
        else {
            break;
        };
        if idx >= start {
            if let Some(row) = row_from_record(&record, &headers, idx) {
                rows.push(row);
            }
        }
        idx += 1;
    }
    Ok(rows)
}

/// Count the data rows (excluding header) in a manifest CSV.
pub async fn count_manifest_rows(client: &S3Client, bucket: &str, key: &str) -> Result<usize> {
    let object = client
        .get_object()
        .bucket(bucket)
        .key(key)
        .send()
        .await
        .with_context(|| format!("failed to fetch manifest s3://{bucket}/{key}"))?;
    let bytes = object
        .body
        .collect()
        .await
        .with_context(|| format!("failed to read body of manifest s3://{bucket}/{key}"))?
        .into_bytes();
    let mut reader = csv_async::AsyncReaderBuilder::new().create_reader(std::io::Cursor::new(bytes.to_vec()));
    let mut records = reader.records();
    let mut count = 0usize;
    while records
        .try_next()
        .await
        .with_context(|| format!("failed to parse manifest s3://{bucket}/{key}"))?
        .is_some()
    {
        count += 1;
    }
    Ok(count)
}

/// Load the optional `source_id → metadata` JSON lookup. Any failure to
/// fetch or parse returns an empty map rather than propagating, per
/// `load_metadata_lookup`'s documented behavior.
pub async fn load_metadata_lookup(
    client: &S3Client,
    bucket: &str,
    key: &str,
) -> BTreeMap<String, BTreeMap<String, String>> {
    if bucket.is_empty() || key.is_empty() {
        return BTreeMap::new();
    }
    match get_object_as_string(client, bucket, key).await {
        Ok(content) => serde_json::from_str(&content).unwrap_or_else(|err| {
            warn!("failed to parse metadata lookup s3://{bucket}/{key}: {err}");
            BTreeMap::new()
        }),
        Err(err) => {
            info!("metadata lookup not found or unreadable: {err}");
            BTreeMap::new()
        }
    }
}

/// Select the pre-split chunk file for a given array index, under chunked
/// mode: `{prefix}/chunk_{index:06}.csv`.
pub fn chunk_key(prefix: &str, array_index: u32) -> String {
    format!("{prefix}/chunk_{array_index:06}.csv")
}

/// Read an entire chunked manifest file (no row-range slicing: the whole
/// file belongs to this worker).
pub async fn stream_manifest_chunk(client: &S3Client, bucket: &str, key: &str) -> Result<Vec<ManifestRow>> {
    stream_manifest_range(client, bucket, key, 0, usize::MAX).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(fields: &[&str]) -> StringRecord {
        let mut rec = StringRecord::new();
        for field in fields {
            rec.push_field(field);
        }
        rec
    }

    #[test]
    fn supports_bucket_key_naming() {
        let headers = record(&["bucket", "key"]);
        let positions = StringRecordPosition::new(&headers);
        let row = record(&["my-bucket", "path/to/doc.pdf"]);
        let parsed = row_from_record(&row, &positions, 0).unwrap();
        assert_eq!(parsed.bucket, "my-bucket");
        assert_eq!(parsed.key, "path/to/doc.pdf");
    }

    #[test]
    fn supports_s3_bucket_s3_key_naming() {
        let headers = record(&["s3_bucket", "s3_key"]);
        let positions = StringRecordPosition::new(&headers);
        let row = record(&["my-bucket", "path/to/doc.pdf"]);
        let parsed = row_from_record(&row, &positions, 0).unwrap();
        assert_eq!(parsed.bucket, "my-bucket");
        assert_eq!(parsed.key, "path/to/doc.pdf");
    }

    #[test]
    fn renames_report_date_to_filing_date() {
        let headers = record(&["bucket", "key", "report_date"]);
        let positions = StringRecordPosition::new(&headers);
        let row = record(&["b", "k", "2024-01-02"]);
        let parsed = row_from_record(&row, &positions, 0).unwrap();
        assert_eq!(parsed.metadata.get("filing_date").map(String::as_str), Some("2024-01-02"));
        assert!(!parsed.metadata.contains_key("report_date"));
    }

    #[test]
    fn explicit_filing_date_wins_over_report_date() {
        let headers = record(&["bucket", "key", "report_date", "filing_date"]);
        let positions = StringRecordPosition::new(&headers);
        let row = record(&["b", "k", "2024-01-02", "2024-05-06"]);
        let parsed = row_from_record(&row, &positions, 0).unwrap();
        assert_eq!(parsed.metadata.get("filing_date").map(String::as_str), Some("2024-05-06"));
    }

    #[test]
    fn missing_bucket_and_key_is_skipped() {
        let headers = record(&["bucket", "key"]);
        let positions = StringRecordPosition::new(&headers);
        let row = record(&["", ""]);
        assert!(row_from_record(&row, &positions, 0).is_none());
    }

    #[test]
    fn chunk_key_is_zero_padded() {
        assert_eq!(chunk_key("manifests", 7), "manifests/chunk_000007.csv");
    }
}
