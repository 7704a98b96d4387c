//! `POST /cgi-bin/ccgi.sh` command endpoint.
//!
//! The body is `<command>:<parameter>`. The command names an executable in
//! the configured `bin` directory and receives the parameter as its single
//! argument.

use std::path::Path;

use super::response::text_response;
use crate::runner::CommandRunner;

/// The only accepted `POST` request line.
pub const CGI_REQUEST_LINE: &str = "POST /cgi-bin/ccgi.sh HTTP/1.1";

/// A command name must be a plain file name inside the `bin` directory.
pub fn is_valid_command(command: &str) -> bool {
    !command.is_empty()
        && command != "."
        && command != ".."
        && !command.contains('/')
        && !command.contains('\\')
}

/// Splits a request body into command and parameter on the first colon.
pub fn split_body(body: &str) -> Option<(&str, &str)> {
    body.split_once(':')
}

/// Runs `command` from `bin_dir` and wraps its output.
///
/// A clean run answers `200` with stdout as text. When the command wrote to
/// stderr the raw output is returned unwrapped: stdout if it is non-empty,
/// otherwise stderr.
pub async fn run_command(
    runner: &dyn CommandRunner,
    bin_dir: &Path,
    command: &str,
    parameter: &str,
) -> Vec<u8> {
    let program = bin_dir.join(command);
    tracing::debug!(command, "Running CGI command");
    let out = runner.run(&program, &[parameter.to_string()]).await;

    if out.stderr.is_empty() {
        return text_response(&out.stdout);
    }
    tracing::warn!(command, stderr = %out.stderr.trim_end(), "CGI command reported errors");
    if out.stdout.is_empty() {
        out.stderr.into_bytes()
    } else {
        out.stdout.into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::CommandOutput;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::path::PathBuf;

    #[derive(Default)]
    struct FakeRunner {
        output: CommandOutput,
        calls: Mutex<Vec<(PathBuf, Vec<String>)>>,
    }

    #[async_trait]
    impl CommandRunner for FakeRunner {
        async fn run(&self, command: &Path, args: &[String]) -> CommandOutput {
            self.calls.lock().push((command.to_path_buf(), args.to_vec()));
            self.output.clone()
        }
    }

    fn runner(stdout: &str, stderr: &str) -> FakeRunner {
        FakeRunner {
            output: CommandOutput {
                stdout: stdout.into(),
                stderr: stderr.into(),
            },
            ..FakeRunner::default()
        }
    }

    #[test]
    fn command_names_are_plain_files() {
        assert!(is_valid_command("app"));
        assert!(is_valid_command("my-app.sh"));
        assert!(!is_valid_command(""));
        assert!(!is_valid_command(".."));
        assert!(!is_valid_command("../etc/passwd"));
        assert!(!is_valid_command("sub/app"));
    }

    #[test]
    fn body_splits_on_first_colon() {
        assert_eq!(split_body("app:a:b:c"), Some(("app", "a:b:c")));
        assert_eq!(split_body("app:"), Some(("app", "")));
        assert_eq!(split_body("app"), None);
    }

    #[tokio::test]
    async fn clean_run_is_wrapped_as_text() {
        let fake = runner("result", "");
        let rp = run_command(&fake, Path::new("/srv/bin"), "app", "x:y").await;
        let rp = String::from_utf8(rp).unwrap();
        assert!(rp.starts_with("HTTP/1.1 200 OK\n"));
        assert!(rp.ends_with("\n\nresult"));

        let calls = fake.calls.lock();
        assert_eq!(calls[0].0, PathBuf::from("/srv/bin/app"));
        assert_eq!(calls[0].1, vec!["x:y".to_string()]);
    }

    #[tokio::test]
    async fn stderr_only_returns_stderr_raw() {
        let fake = runner("", "boom");
        let rp = run_command(&fake, Path::new("bin"), "app", "").await;
        assert_eq!(rp, b"boom");
    }

    #[tokio::test]
    async fn stderr_with_stdout_returns_stdout_raw() {
        let fake = runner("partial", "warning");
        let rp = run_command(&fake, Path::new("bin"), "app", "").await;
        assert_eq!(rp, b"partial");
    }
}
