//! relmatrix - build a binary matrix and publish it to a GitHub release
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
//!
//! Argument parsing and validation for the `relmatrix` binary. The work
//! itself lives in [`relmatrix_core::pipeline`].

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, Parser};
use clap_complete::{Shell, generate};
use relmatrix_core::pipeline::{self, ReleaseConfig, ReleaseError};
use relmatrix_core::{ApiError, CommandRunner, GithubClient, RepoRef, Reporter, UploadSummary};
use thiserror::Error;

/// Printed when the positional arguments are wrong.
pub const USAGE: &str =
    r#"Usage: "relmatrix {owner} {repo} {tagName} {projectName} --token {token} --api-url {apiUrl}""#;

/// Environment variable the token is read from when `--token` is absent.
pub const TOKEN_ENV: &str = "RELMATRIX_GITHUB_TOKEN";

/// Command line of the `relmatrix` binary.
#[derive(Debug, Parser)]
#[command(name = "relmatrix")]
#[command(version = env!("RELMATRIX_VERSION"))]
#[command(about = "Cross-compile a Go project for every platform and upload the binaries to a GitHub release")]
pub struct Cli {
    /// owner repo tagName projectName
    #[arg(value_name = "ARGS")]
    pub args: Vec<String>,

    /// GitHub API token
    #[arg(short, long, env = TOKEN_ENV, hide_env_values = true)]
    pub token: Option<String>,

    /// GitHub API base URL (GitHub Enterprise)
    #[arg(short, long)]
    pub api_url: Option<String>,

    /// Directory to build in [default: current directory]
    #[arg(short = 'p', long)]
    pub source_path: Option<PathBuf>,

    /// Only build for these operating systems
    #[arg(long = "os", value_name = "OS", value_delimiter = ',')]
    pub operating_systems: Vec<String>,

    /// Publish the release instead of leaving it as a draft
    #[arg(long)]
    pub publish: bool,

    /// Delete the release's existing assets before uploading
    #[arg(long)]
    pub remove_old_assets: bool,

    /// Print a completion script and exit
    #[arg(long, value_name = "SHELL", hide = true)]
    pub completions: Option<Shell>,
}

/// Everything that ends a run with a non-zero exit status.
#[derive(Error, Debug)]
pub enum CliError {
    /// No token on the command line or in the environment.
    #[error("You must specify a token")]
    MissingToken,

    /// Not exactly four positional arguments.
    #[error("{}", USAGE)]
    Usage,

    /// No `--source-path` and the working directory is unreadable.
    #[error("Unable to determine the current directory: {0}")]
    Cwd(#[source] std::io::Error),

    /// The API base URL is invalid.
    #[error(transparent)]
    Client(ApiError),

    /// The release run failed.
    #[error(transparent)]
    Release(#[from] ReleaseError),
}

impl Cli {
    /// Validate the arguments and turn them into a run configuration.
    ///
    /// Returns the token alongside, since it belongs to the client rather
    /// than the run.
    pub fn into_config(self) -> Result<(String, Option<String>, ReleaseConfig), CliError> {
        let token = self
            .token
            .filter(|t| !t.is_empty())
            .ok_or(CliError::MissingToken)?;

        let [owner, repo, tag, project]: [String; 4] =
            self.args.try_into().map_err(|_| CliError::Usage)?;

        let source_dir = match self.source_path {
            Some(path) => path,
            None => std::env::current_dir().map_err(CliError::Cwd)?,
        };

        Ok((
            token,
            self.api_url,
            ReleaseConfig {
                repo: RepoRef::new(owner, repo),
                tag,
                project,
                source_dir,
                publish: self.publish,
                remove_old_assets: self.remove_old_assets,
                operating_systems: self.operating_systems,
            },
        ))
    }
}

/// Validate `cli` and run the release.
pub async fn execute(
    cli: Cli,
    runner: Arc<dyn CommandRunner>,
    reporter: Arc<dyn Reporter>,
) -> Result<UploadSummary, CliError> {
    let (token, api_url, config) = cli.into_config()?;
    let client = GithubClient::new(token, api_url.as_deref()).map_err(CliError::Client)?;
    tracing::debug!(
        ?client,
        "releasing {} {} from {}",
        config.repo,
        config.tag,
        config.source_dir.display()
    );

    Ok(pipeline::run(&config, &client, runner, reporter).await?)
}

/// Write a completion script for `shell`.
pub fn completions(shell: Shell, out: &mut dyn Write) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "relmatrix", out);
}
