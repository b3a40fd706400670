//! relmatrix - build a binary matrix and publish it to a GitHub release

use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use relmatrix_core::{Reporter, StderrReporter, SystemRunner};
use tracing_subscriber::EnvFilter;

use relmatrix_cli::Cli;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Some(shell) = cli.completions {
        let mut stdout = std::io::stdout().lock();
        relmatrix_cli::completions(shell, &mut stdout);
        stdout.flush().context("failed to write completions")?;
        return Ok(ExitCode::SUCCESS);
    }

    let reporter = Arc::new(StderrReporter::stderr());
    match relmatrix_cli::execute(cli, Arc::new(SystemRunner), reporter.clone()).await {
        Ok(summary) => {
            reporter.success(&format!(
                "Uploaded {} artifacts ({} failed)",
                summary.uploaded, summary.failed
            ));
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("{e}");
            Ok(ExitCode::FAILURE)
        }
    }
}
