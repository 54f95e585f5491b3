//! Job-tracking table: RUNNING/SUCCEEDED/FAILED entries and per-file error
//! records, all best-effort against a DynamoDB-shaped table.

use std::collections::HashMap;

use aws_sdk_dynamodb::{Client as DynamoDbClient, types::AttributeValue};

use crate::prelude::*;

const MAX_ERROR_LEN: usize = 1000;

pub struct JobTrackingClient<'a> {
    client: &'a DynamoDbClient,
    table_name: String,
}

impl<'a> JobTrackingClient<'a> {
    pub fn new(client: &'a DynamoDbClient, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }

    async fn put(&self, item: HashMap<String, AttributeValue>, context: &str) {
        if let Err(err) = self
            .client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(item))
            .send()
            .await
        {
            warn!("job tracking write failed ({context}): {err}");
        }
    }

    pub async fn record_job_start(&self, job_id: &str) {
        self.put(
            HashMap::from([
                ("job_id".to_owned(), AttributeValue::S(job_id.to_owned())),
                ("status".to_owned(), AttributeValue::S("RUNNING".to_owned())),
            ]),
            "record_job_start",
        )
        .await;
    }

    pub async fn record_job_complete(&self, job_id: &str, status: &str, error_message: Option<&str>) {
        let mut item = HashMap::from([
            ("job_id".to_owned(), AttributeValue::S(job_id.to_owned())),
            ("status".to_owned(), AttributeValue::S(status.to_owned())),
        ]);
        if let Some(message) = error_message {
            let truncated: String = message.chars().take(MAX_ERROR_LEN).collect();
            item.insert("error_message".to_owned(), AttributeValue::S(truncated));
        }
        self.put(item, "record_job_complete").await;
    }

    pub async fn record_file_error(&self, job_id: &str, source_id: &str, error_message: &str) {
        let truncated: String = error_message.chars().take(MAX_ERROR_LEN).collect();
        self.put(
            HashMap::from([
                ("job_id".to_owned(), AttributeValue::S(job_id.to_owned())),
                ("source_id".to_owned(), AttributeValue::S(source_id.to_owned())),
                ("error_message".to_owned(), AttributeValue::S(truncated)),
            ]),
            "record_file_error",
        )
        .await;
    }
}

/// The error message used for a terminal `FAILED` job state where every
/// considered file failed and none succeeded.
pub const ALL_FILES_FAILED_MESSAGE: &str = "All files failed to process";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_truncation_caps_at_max_len() {
        let long_message = "e".repeat(5000);
        let truncated: String = long_message.chars().take(MAX_ERROR_LEN).collect();
        assert_eq!(truncated.chars().count(), 1000);
    }
}
