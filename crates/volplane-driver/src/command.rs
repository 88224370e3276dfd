use tracing::debug;
use volplane_core::{Result, VolumeError};

/// Output from a command execution
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

fn render(program: &str, args: &[&str]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

/// Execute a command and fail on non-zero exit code
///
/// A non-zero exit becomes `IoFailure` carrying the command's stderr.
pub async fn exec(program: &str, args: &[&str]) -> Result<CommandOutput> {
    let output = exec_unchecked(program, args).await?;

    if output.exit_code != 0 {
        return Err(VolumeError::io_failure(
            format!(
                "'{}' failed with exit code {}: {}",
                render(program, args),
                output.exit_code,
                output.stderr.trim()
            ),
            None,
        ));
    }

    Ok(output)
}

/// Execute a command and return output regardless of exit code
///
/// The child is killed if the returned future is dropped, so a caller's
/// deadline also ends the process.
pub async fn exec_unchecked(program: &str, args: &[&str]) -> Result<CommandOutput> {
    let command = render(program, args);
    debug!("Executing: {}", command);

    let output = tokio::process::Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| {
            let message = format!("failed to spawn '{}': {}", command, e);
            VolumeError::io_failure(message, Some(Box::new(e)))
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let exit_code = output.status.code().unwrap_or(-1);

    debug!("Command exited with code {}: {}", exit_code, command);

    Ok(CommandOutput {
        stdout,
        stderr,
        exit_code,
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_exec_captures_stdout() {
        let output = exec("echo", &["hello"]).await.unwrap();
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.exit_code, 0);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_io_failure_with_stderr() {
        let err = exec("sh", &["-c", "echo no such export >&2; exit 32"])
            .await
            .unwrap_err();
        assert!(matches!(err, VolumeError::IoFailure { .. }));
        let rendered = err.to_string();
        assert!(rendered.contains("32"));
        assert!(rendered.contains("no such export"));
    }

    #[tokio::test]
    async fn test_missing_program_is_io_failure() {
        let err = exec("volplane-definitely-not-a-binary", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, VolumeError::IoFailure { .. }));
    }

    #[tokio::test]
    async fn test_dropped_command_is_killed() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("finished");
        let script = format!("sleep 0.3; touch {}", marker.display());

        let result = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            exec("sh", &["-c", &script]),
        )
        .await;
        assert!(result.is_err());

        tokio::time::sleep(std::time::Duration::from_millis(600)).await;
        assert!(!marker.exists());
    }
}
