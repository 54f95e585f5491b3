//! AWS client construction shared by both binaries.
//!
//! Every client here is built from the same [`aws_config::SdkConfig`], loaded
//! once per process and cloned into each service client. This is the "lazy,
//! shared, process-wide state" that both the extraction worker and the OCR
//! worker rely on for S3, SQS, DynamoDB, ECS, and Textract access.

use aws_config::BehaviorVersion;

use crate::prelude::*;

/// Load the user's AWS configuration using standard conventions.
pub async fn load_aws_config() -> Result<aws_config::SdkConfig> {
    Ok(aws_config::load_defaults(BehaviorVersion::v2025_01_17()).await)
}

/// The AWS clients shared across a single worker process.
#[derive(Clone)]
pub struct AwsClients {
    pub s3: aws_sdk_s3::Client,
    pub sqs: aws_sdk_sqs::Client,
    pub dynamodb: aws_sdk_dynamodb::Client,
    pub ecs: aws_sdk_ecs::Client,
    pub textract: aws_sdk_textract::Client,
    pub cloudwatch: aws_sdk_cloudwatch::Client,
}

impl AwsClients {
    /// Build every client from one shared config load.
    pub async fn load() -> Result<Self> {
        let config = load_aws_config().await?;
        Ok(Self {
            s3: aws_sdk_s3::Client::new(&config),
            sqs: aws_sdk_sqs::Client::new(&config),
            dynamodb: aws_sdk_dynamodb::Client::new(&config),
            ecs: aws_sdk_ecs::Client::new(&config),
            textract: aws_sdk_textract::Client::new(&config),
            cloudwatch: aws_sdk_cloudwatch::Client::new(&config),
        })
    }
}
