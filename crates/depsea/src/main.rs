use std::process::ExitCode;

use clap::Parser;
use depsea::{Cli, RunStatus, init_tracing, run};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(RunStatus::Clean) => ExitCode::SUCCESS,
        Ok(RunStatus::IntegrityFailures(_)) => ExitCode::FAILURE,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "depsea failed");
            ExitCode::FAILURE
        }
    }
}
