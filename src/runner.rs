//! External process runner used by the CGI command endpoint.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;

/// Captured output of one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs a command to completion and captures its output.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &Path, args: &[String]) -> CommandOutput;
}

/// Runs commands as child processes of this server.
#[derive(Debug, Default, Clone)]
pub struct NativeRunner;

#[async_trait]
impl CommandRunner for NativeRunner {
    async fn run(&self, command: &Path, args: &[String]) -> CommandOutput {
        let output = tokio::process::Command::new(command)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await;

        match output {
            Ok(out) => {
                let stdout = String::from_utf8_lossy(&out.stdout).into_owned();
                let mut stderr = String::from_utf8_lossy(&out.stderr).into_owned();
                if !out.status.success() && stderr.is_empty() {
                    stderr = format!("{} {}", command.display(), out.status);
                }
                CommandOutput { stdout, stderr }
            }
            Err(e) => {
                tracing::warn!(command = %command.display(), "Command failed to start: {e}");
                CommandOutput {
                    stdout: String::new(),
                    stderr: format!("{}: {e}", command.display()),
                }
            }
        }
    }
}
