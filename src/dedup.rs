//! Dedup Ledger Client: batched reads/writes against a DynamoDB-shaped
//! key-value store, deciding which source ids to skip on a re-run.

use std::{
    collections::{BTreeSet, HashMap},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use aws_sdk_dynamodb::{
    Client as DynamoDbClient,
    types::{AttributeValue, WriteRequest},
};

use crate::{
    model::{DedupEntry, DedupStatus},
    prelude::*,
};

const CHECK_CHUNK_SIZE: usize = 100;
const WRITE_CHUNK_SIZE: usize = 25;
const RETRY_DELAY: Duration = Duration::from_millis(500);
const TTL_SECONDS: u64 = 90 * 24 * 60 * 60;

/// One item to record as successfully processed.
#[derive(Debug, Clone)]
pub struct ProcessedItem {
    pub source_id: String,
    pub s3_key: String,
    pub pages_extracted: u32,
}

fn ttl_value() -> i64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    (now + TTL_SECONDS) as i64
}

fn now_iso8601() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

pub struct DedupLedgerClient<'a> {
    client: &'a DynamoDbClient,
    table_name: String,
}

impl<'a> DedupLedgerClient<'a> {
    pub fn new(client: &'a DynamoDbClient, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }

    /// Return the subset of `source_ids` with a `COMPLETED` entry.
    /// Fail-open: any batch-get error returns whatever was gathered so far
    /// rather than propagating, so the caller re-processes instead of
    /// silently skipping.
    pub async fn batch_check_completed(
        &self,
        exchange: &str,
        source_ids: &[String],
        job_type: &str,
    ) -> BTreeSet<String> {
        let partition_key = DedupEntry::partition_key(exchange, job_type);
        let mut completed = BTreeSet::new();

        for chunk in source_ids.chunks(CHECK_CHUNK_SIZE) {
            let keys: Vec<HashMap<String, AttributeValue>> = chunk
                .iter()
                .map(|source_id| {
                    HashMap::from([
                        ("pk".to_owned(), AttributeValue::S(partition_key.clone())),
                        ("sk".to_owned(), AttributeValue::S(source_id.clone())),
                    ])
                })
                .collect();

            match self.batch_get(keys).await {
                Ok(items) => {
                    for item in items {
                        if item.get("status").and_then(|v| v.as_s().ok()) == Some(&"COMPLETED".to_owned()) {
                            if let Some(Ok(source_id)) = item.get("sk").map(|v| v.as_s()) {
                                completed.insert(source_id.clone());
                            }
                        }
                    }
                }
                Err(err) => {
                    warn!("dedup ledger batch-check failed, failing open: {err}");
                }
            }
        }

        completed
    }

    async fn batch_get(
        &self,
        keys: Vec<HashMap<String, AttributeValue>>,
    ) -> Result<Vec<HashMap<String, AttributeValue>>> {
        use aws_sdk_dynamodb::types::KeysAndAttributes;

        let mut remaining = keys;
        let mut items = Vec::new();
        let mut attempt = 0;

        loop {
            if remaining.is_empty() {
                break;
            }
            let keys_and_attrs = KeysAndAttributes::builder()
                .set_keys(Some(remaining.clone()))
                .build()
                .context("failed to build BatchGetItem request")?;

            let response = self
                .client
                .batch_get_item()
                .request_items(&self.table_name, keys_and_attrs)
                .send()
                .await
                .context("BatchGetItem failed")?;

            if let Some(responses) = response.responses {
                if let Some(table_items) = responses.get(&self.table_name) {
                    items.extend(table_items.iter().cloned());
                }
            }

            let unprocessed = response
                .unprocessed_keys
                .and_then(|mut m| m.remove(&self.table_name))
                .map(|k| k.keys)
                .unwrap_or_default();

            if unprocessed.is_empty() || attempt >= 1 {
                break;
            }
            attempt += 1;
            remaining = unprocessed;
            tokio::time::sleep(RETRY_DELAY).await;
        }

        Ok(items)
    }

    /// Record each processed item as `COMPLETED`. Returns the count
    /// successfully written.
    pub async fn batch_record_processed(
        &self,
        exchange: &str,
        items: &[ProcessedItem],
        job_id: &str,
        job_type: &str,
    ) -> u64 {
        let partition_key = DedupEntry::partition_key(exchange, job_type);
        let mut written = 0u64;

        for chunk in items.chunks(WRITE_CHUNK_SIZE) {
            let requests: Vec<WriteRequest> = chunk
                .iter()
                .filter_map(|item| {
                    let put = aws_sdk_dynamodb::types::PutRequest::builder()
                        .set_item(Some(HashMap::from([
                            ("pk".to_owned(), AttributeValue::S(partition_key.clone())),
                            ("sk".to_owned(), AttributeValue::S(item.source_id.clone())),
                            ("status".to_owned(), AttributeValue::S(DedupStatus::Completed.as_str().to_owned())),
                            ("s3_key".to_owned(), AttributeValue::S(item.s3_key.clone())),
                            ("pages_extracted".to_owned(), AttributeValue::N(item.pages_extracted.to_string())),
                            ("job_id".to_owned(), AttributeValue::S(job_id.to_owned())),
                            ("processed_at".to_owned(), AttributeValue::S(now_iso8601())),
                            ("ttl".to_owned(), AttributeValue::N(ttl_value().to_string())),
                        ])))
                        .build()
                        .ok()?;
                    Some(WriteRequest::builder().put_request(put).build())
                })
                .collect();

            match self.batch_write(requests).await {
                Ok(count) => written += count,
                Err(err) => warn!("dedup ledger batch-write failed: {err}"),
            }
        }

        written
    }

    async fn batch_write(&self, requests: Vec<WriteRequest>) -> Result<u64> {
        let mut remaining = requests;
        let mut written = 0u64;
        let mut attempt = 0;

        loop {
            if remaining.is_empty() {
                break;
            }
            let count = remaining.len() as u64;
            let response = self
                .client
                .batch_write_item()
                .request_items(&self.table_name, remaining.clone())
                .send()
                .await
                .context("BatchWriteItem failed")?;

            let unprocessed = response
                .unprocessed_items
                .and_then(|mut m| m.remove(&self.table_name))
                .unwrap_or_default();
            written += count - unprocessed.len() as u64;

            if unprocessed.is_empty() || attempt >= 1 {
                break;
            }
            attempt += 1;
            remaining = unprocessed;
            tokio::time::sleep(RETRY_DELAY).await;
        }

        Ok(written)
    }

    /// Best-effort single write of a `FAILED` entry.
    pub async fn record_failed(&self, exchange: &str, source_id: &str, s3_key: &str, error_message: &str, job_type: &str) {
        let partition_key = DedupEntry::partition_key(exchange, job_type);
        let truncated: String = error_message.chars().take(1000).collect();

        let result = self
            .client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(HashMap::from([
                ("pk".to_owned(), AttributeValue::S(partition_key)),
                ("sk".to_owned(), AttributeValue::S(source_id.to_owned())),
                ("status".to_owned(), AttributeValue::S(DedupStatus::Failed.as_str().to_owned())),
                ("s3_key".to_owned(), AttributeValue::S(s3_key.to_owned())),
                ("error_message".to_owned(), AttributeValue::S(truncated)),
                ("processed_at".to_owned(), AttributeValue::S(now_iso8601())),
                ("ttl".to_owned(), AttributeValue::N(ttl_value().to_string())),
            ])))
            .send()
            .await;

        if let Err(err) = result {
            warn!("failed to record FAILED dedup entry for {source_id}: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_error_messages_to_1000_chars() {
        let long_message = "x".repeat(2000);
        let truncated: String = long_message.chars().take(1000).collect();
        assert_eq!(truncated.chars().count(), 1000);
    }

    #[test]
    fn ttl_is_roughly_ninety_days_out() {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i64;
        let ttl = ttl_value();
        let delta = ttl - now;
        assert!((89 * 24 * 60 * 60..=91 * 24 * 60 * 60).contains(&delta));
    }
}
