//! Entry point for the OCR worker binary. Long-polls the OCR queue and
//! backfills text for pages the extraction worker couldn't read directly.

use std::io::IsTerminal as _;

use filing_pipeline::{
    aws::AwsClients, config, ocr::provider::TextractOcrEngine, ocr_worker_runtime::run_ocr_worker, prelude::*,
    ui::Ui,
};

#[tokio::main]
async fn main() {
    let ui = Ui::init();
    if !std::io::stderr().is_terminal() {
        ui.hide_progress_bars();
    }
    config::init_logging(ui.get_stderr_writer());

    let exit_code = match run(&ui).await {
        Ok(code) => code,
        Err(err) => {
            error!("OCR worker failed: {err:#}");
            1
        }
    };
    std::process::exit(exit_code);
}

async fn run(ui: &Ui) -> Result<i32> {
    let config = config::OcrWorkerConfig::from_env()?;
    let aws = AwsClients::load().await?;
    let engine = TextractOcrEngine::new(aws.textract.clone(), 1);
    run_ocr_worker(&config, &aws, &engine, ui).await
}
