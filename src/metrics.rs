//! A thin CloudWatch metrics side channel. Metrics are an observability
//! convenience, not a correctness dependency: publish failures are logged
//! at `warn` and otherwise swallowed, never propagated.

use aws_sdk_cloudwatch::{
    Client as CloudWatchClient,
    types::{Dimension, MetricDatum, StandardUnit},
};

use crate::prelude::*;

const NAMESPACE: &str = "AsiaFilings/DataPipeline";

/// Increment `GibberishPagesDetected` by `count`, dimensioned by exchange.
pub async fn record_gibberish_pages(client: &CloudWatchClient, exchange: &str, count: u32) {
    if count == 0 {
        return;
    }

    let dimension = Dimension::builder().name("Exchange").value(exchange).build();

    let datum = MetricDatum::builder()
        .metric_name("GibberishPagesDetected")
        .unit(StandardUnit::Count)
        .value(f64::from(count))
        .dimensions(dimension)
        .build();

    let result = client
        .put_metric_data()
        .namespace(NAMESPACE)
        .metric_data(datum)
        .send()
        .await;

    if let Err(err) = result {
        warn!("failed to publish GibberishPagesDetected metric: {err}");
    }
}
