//! Writes the synthetic dataset file for `bulk-load`.

use std::process::ExitCode;

use clap::Parser;
use copyflow_server::{commands, exit_code, init_tracing};
use tracing::error;

/// Generate the tab-separated dataset file.
///
/// Record count and path come from `COPYFLOW_RECORD_COUNT` and
/// `COPYFLOW_DATA_FILE`.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {}

#[tokio::main]
async fn main() -> ExitCode {
    let _args = Args::parse();
    init_tracing();

    match commands::generate_dataset().await {
        Ok(summary) => {
            println!(
                "wrote {} records ({} bytes) to {} in {} ms",
                summary.records,
                summary.bytes,
                summary.path.display(),
                summary.elapsed.as_millis()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %format!("{e:#}"), "dataset generation failed");
            exit_code(&e)
        }
    }
}
