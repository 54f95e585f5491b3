//! CLI test cases for the two worker binaries.
//!
//! Neither binary takes arguments; both are configured entirely from the
//! environment and exit 1 on a config error before ever touching AWS.

use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;

fn extraction_worker() -> Command {
    Command::cargo_bin("extraction-worker").unwrap()
}

fn ocr_worker() -> Command {
    Command::cargo_bin("ocr-worker").unwrap()
}

#[test]
fn extraction_worker_fails_without_required_env() {
    extraction_worker()
        .env_clear()
        .assert()
        .failure()
        .code(1)
        .stderr(contains("MANIFEST_BUCKET"));
}

#[test]
fn extraction_worker_fails_with_manifest_bucket_but_no_key() {
    extraction_worker()
        .env_clear()
        .env("MANIFEST_BUCKET", "some-bucket")
        .env("OUTPUT_BUCKET", "some-output-bucket")
        .assert()
        .failure()
        .code(1)
        .stderr(contains("MANIFEST_KEY"));
}

#[test]
fn extraction_worker_fails_with_invalid_gibberish_ratio() {
    extraction_worker()
        .env_clear()
        .env("MANIFEST_BUCKET", "some-bucket")
        .env("MANIFEST_KEY", "manifest.csv")
        .env("OUTPUT_BUCKET", "some-output-bucket")
        .env("GIBBERISH_REPLACEMENT_RATIO", "not-a-float")
        .assert()
        .failure()
        .code(1)
        .stderr(contains("GIBBERISH_REPLACEMENT_RATIO"));
}

#[test]
fn ocr_worker_fails_without_required_env() {
    ocr_worker()
        .env_clear()
        .assert()
        .failure()
        .code(1)
        .stderr(contains("OCR_QUEUE_URL"));
}

#[test]
fn ocr_worker_fails_with_out_of_range_max_messages() {
    ocr_worker()
        .env_clear()
        .env("OCR_QUEUE_URL", "https://sqs.example.com/queue")
        .env("OUTPUT_BUCKET", "some-output-bucket")
        .env("MAX_MESSAGES", "11")
        .assert()
        .failure()
        .code(1)
        .stderr(contains("MAX_MESSAGES"));
}
