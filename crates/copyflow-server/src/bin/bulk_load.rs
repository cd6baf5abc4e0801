//! Loads the dataset file into PostgreSQL with COPY.

use std::process::ExitCode;

use clap::Parser;
use copyflow_server::{cancel_on_ctrl_c, commands, exit_code, init_tracing};
use tracing::error;

/// Bulk-load the dataset file into the target table.
///
/// Connection settings come from `DB_*`, the target from `COPYFLOW_*`.
/// Ctrl-C aborts the COPY and restores the table before exiting.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {}

#[tokio::main]
async fn main() -> ExitCode {
    let _args = Args::parse();
    init_tracing();

    let cancel = cancel_on_ctrl_c();
    match commands::bulk_load(&cancel).await {
        Ok(report) => {
            println!("{}", report.throughput);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %format!("{e:#}"), "bulk load failed");
            exit_code(&e)
        }
    }
}
