//! Process execution on the host via `tokio::process`.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use super::{CommandOutput, CommandRunner, CommandSpec, ExecError};

/// Runs commands for real, resolving executables with `which`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    fn resolve(&self, program: &str) -> Result<PathBuf, ExecError> {
        which::which(program).map_err(|e| {
            tracing::debug!("lookup of {program} failed: {e}");
            ExecError::NotFound {
                program: program.to_string(),
            }
        })
    }

    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ExecError> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(env) = &spec.env {
            // Start from a blank slate so host env vars never leak in.
            cmd.env_clear();
            cmd.envs(env.iter().map(|(k, v)| (k, v)));
        }

        tracing::debug!(dir = %spec.dir.display(), "running {spec}");
        let out = cmd.output().await?;

        let mut output = String::from_utf8_lossy(&out.stdout).into_owned();
        output.push_str(&String::from_utf8_lossy(&out.stderr));

        Ok(CommandOutput {
            code: out.status.code(),
            output,
        })
    }
}
