use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::error::{MedicError, Result};

/// Output of a finished external command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Run `argv` with a hard timeout. The child is killed if the timeout fires
/// or the future is dropped.
pub async fn run_command(argv: &[String], timeout: Duration) -> Result<CommandOutput> {
    let (program, args) = argv.split_first().ok_or_else(|| MedicError::Command {
        command: String::new(),
        reason: "empty command".to_string(),
    })?;
    let shown = argv.join(" ");
    debug!("running `{}`", shown);

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| MedicError::Command {
            command: shown.clone(),
            reason: e.to_string(),
        })?;

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| MedicError::Command {
            command: shown.clone(),
            reason: format!("timed out after {timeout:?}"),
        })?
        .map_err(|e| MedicError::Command {
            command: shown.clone(),
            reason: e.to_string(),
        })?;

    Ok(CommandOutput {
        success: output.status.success(),
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

/// Like `run_command`, but a non-zero exit is an error
pub async fn run_checked(argv: &[String], timeout: Duration) -> Result<CommandOutput> {
    let output = run_command(argv, timeout).await?;
    if output.success {
        Ok(output)
    } else {
        Err(MedicError::Command {
            command: argv.join(" "),
            reason: match output.code {
                Some(code) if output.stderr.is_empty() => format!("exit status {code}"),
                Some(code) => format!("exit status {code}: {}", output.stderr),
                None => "terminated by signal".to_string(),
            },
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|p| p.to_string()).collect()
    }

    #[tokio::test]
    async fn test_run_command_captures_output() {
        let output = run_command(&argv(&["echo", "hello"]), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(output.success);
        assert_eq!(output.stdout, "hello");
    }

    #[tokio::test]
    async fn test_run_checked_rejects_failure() {
        let err = run_checked(&argv(&["false"]), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, MedicError::Command { .. }));
    }

    #[tokio::test]
    async fn test_run_command_times_out() {
        let err = run_command(&argv(&["sleep", "5"]), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_spawn_failure_names_full_command() {
        let err = run_command(
            &argv(&["medic-no-such-binary", "--flag", "value"]),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        match err {
            MedicError::Command { command, .. } => {
                assert_eq!(command, "medic-no-such-binary --flag value")
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_command() {
        assert!(run_command(&[], Duration::from_secs(1)).await.is_err());
    }
}
