//! Entry point for the extraction worker binary. Configuration is read
//! entirely from the environment; see `config::ExtractionWorkerConfig`.

use std::io::IsTerminal as _;

use filing_pipeline::{aws::AwsClients, config, prelude::*, ui::Ui, worker::run_extraction_worker};

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
            error!("extraction worker failed: {err:#}");
            1
        }
    };
    std::process::exit(exit_code);
}

async fn run(ui: &Ui) -> Result<i32> {
    let config = config::ExtractionWorkerConfig::from_env()?;
    let aws = AwsClients::load().await?;
    run_extraction_worker(&config, &aws, ui).await
}
