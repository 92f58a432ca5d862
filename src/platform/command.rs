//! Child-process plumbing shared by the platform backends.

use std::ffi::OsStr;
use std::process::{Output, Stdio};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::ExecutionError;
use crate::hands::ScriptRunner;
use crate::types::{PreparedScript, ScriptDialect, ScriptOutput};

/// Run `program` to completion, capturing both streams.
pub async fn output<I, S>(program: &str, args: I) -> std::io::Result<Output>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
}

/// Stdout of a helper that must exit cleanly; otherwise its stderr.
pub fn checked_stdout(program: &str, out: &Output) -> Result<String, String> {
    if out.status.success() {
        return Ok(String::from_utf8_lossy(&out.stdout).into_owned());
    }
    let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
    Err(if stderr.is_empty() {
        format!("{program} exited with {}", out.status)
    } else {
        stderr
    })
}

/// Convert interpreter output, reporting a silent non-zero exit through stderr.
pub fn script_output(out: &Output) -> ScriptOutput {
    let stdout = String::from_utf8_lossy(&out.stdout).into_owned();
    let mut stderr = String::from_utf8_lossy(&out.stderr).into_owned();

    if !out.status.success() && stderr.trim().is_empty() {
        stderr = match out.status.code() {
            Some(code) => format!("script exited with status {code}"),
            None => "script terminated by signal".to_string(),
        };
    }

    ScriptOutput {
        stdout: Some(stdout).filter(|s| !s.is_empty()),
        stderr: Some(stderr).filter(|s| !s.is_empty()),
    }
}

/// Runs script files through a command-line interpreter.
#[derive(Debug, Clone)]
pub struct InterpreterRunner {
    dialect: ScriptDialect,
    program: &'static str,
    args: &'static [&'static str],
}

impl InterpreterRunner {
    pub fn osascript() -> Self {
        Self {
            dialect: ScriptDialect::AppleScript,
            program: "osascript",
            args: &[],
        }
    }

    pub fn powershell() -> Self {
        Self {
            dialect: ScriptDialect::PowerShell,
            program: "powershell",
            args: &["-ExecutionPolicy", "Bypass", "-File"],
        }
    }

    pub fn shell() -> Self {
        Self {
            dialect: ScriptDialect::Shell,
            program: "sh",
            args: &[],
        }
    }

    pub fn for_dialect(dialect: ScriptDialect) -> Self {
        match dialect {
            ScriptDialect::AppleScript => Self::osascript(),
            ScriptDialect::PowerShell => Self::powershell(),
            ScriptDialect::Shell => Self::shell(),
        }
    }
}

#[async_trait]
impl ScriptRunner for InterpreterRunner {
    fn dialect(&self) -> ScriptDialect {
        self.dialect
    }

    async fn run_script(&self, script: &PreparedScript) -> Result<ScriptOutput, ExecutionError> {
        debug!(program = self.program, path = %script.path.display(), "spawning interpreter");
        let args = self
            .args
            .iter()
            .map(OsStr::new)
            .chain(std::iter::once(script.path.as_os_str()));
        let out = output(self.program, args)
            .await
            .map_err(|source| ExecutionError::Spawn {
                interpreter: self.program.to_string(),
                source,
            })?;
        Ok(script_output(&out))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::test_support::scratch_storage;

    async fn run_sh(body: &str) -> ScriptOutput {
        let (_tmp, storage) = scratch_storage();
        let (_guard, prepared) = storage.prepare_script(body, ScriptDialect::Shell).unwrap();
        InterpreterRunner::shell().run_script(&prepared).await.unwrap()
    }

    #[tokio::test]
    async fn stdout_is_captured() {
        let out = run_sh("echo hello").await;
        assert_eq!(out.stdout.as_deref(), Some("hello\n"));
        assert_eq!(out.stderr, None);
    }

    #[tokio::test]
    async fn silent_failure_is_folded_into_stderr() {
        let out = run_sh("exit 3").await;
        assert_eq!(out.stderr.as_deref(), Some("script exited with status 3"));
    }

    #[tokio::test]
    async fn real_stderr_wins_over_exit_status() {
        let out = run_sh("echo oops >&2; exit 1").await;
        assert_eq!(out.stderr.as_deref(), Some("oops\n"));
    }

    #[tokio::test]
    async fn missing_interpreter_is_a_spawn_error() {
        let (_tmp, storage) = scratch_storage();
        let (_guard, prepared) = storage.prepare_script("x", ScriptDialect::Shell).unwrap();
        let runner = InterpreterRunner {
            dialect: ScriptDialect::Shell,
            program: "definitely-not-an-interpreter",
            args: &[],
        };
        assert!(matches!(
            runner.run_script(&prepared).await,
            Err(ExecutionError::Spawn { .. })
        ));
    }
}
