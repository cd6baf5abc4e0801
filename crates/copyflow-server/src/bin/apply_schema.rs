//! Creates the target table.

use std::process::ExitCode;

use clap::Parser;
use copyflow_server::{commands, exit_code, init_tracing};
use tracing::error;

/// Apply the schema file (`COPYFLOW_SCHEMA_FILE`, default `sql/schema.sql`).
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {}

#[tokio::main]
async fn main() -> ExitCode {
    let _args = Args::parse();
    init_tracing();

    match commands::apply_schema().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "schema setup failed");
            exit_code(&e)
        }
    }
}
