//! Task executor: spawns the interpreter subprocess for a script, streams
//! stdout live, enforces a wall-clock timeout, and packages the result.
//!
//! Built on `tokio::process::Command` with two reader tasks (stdout/stderr)
//! plus a wait future, so the timeout can fire independently of however
//! long the output readers take to drain.

use std::process::Stdio;
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use rmm_protocol::{caps, ScriptType, TaskResultPayload, WsMessage};

/// Wall-clock timeout per subprocess.
const TASK_TIMEOUT: Duration = Duration::from_secs(300);
/// Fixed progress value while a task is still running.
const PROGRESS_RUNNING: u8 = 50;
const PROGRESS_DONE: u8 = 100;

/// Picks the interpreter invocation for a script type. `Shell`/`Adb` cover
/// Linux/Android targets alongside the Windows-oriented `Powershell`/`Cmd`.
fn command_for(script_type: ScriptType, body: &str) -> Command {
    let mut cmd = match script_type {
        ScriptType::Powershell => {
            let mut c = Command::new("powershell");
            c.args(["-NonInteractive", "-NoProfile", "-Command", body]);
            c
        }
        ScriptType::Cmd => {
            let mut c = Command::new("cmd");
            c.args(["/c", body]);
            c
        }
        ScriptType::Python => {
            let mut c = Command::new("python3");
            c.args(["-c", body]);
            c
        }
        ScriptType::Bash => {
            let mut c = Command::new("bash");
            c.args(["-c", body]);
            c
        }
        ScriptType::Shell => {
            let mut c = Command::new("sh");
            c.args(["-c", body]);
            c
        }
        ScriptType::Adb => {
            let mut c = Command::new("adb");
            c.args(["shell", body]);
            c
        }
    };
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    cmd
}

/// Runs one task to completion. `output_tx`, if present, receives
/// `task_output` frames for every stdout line as it arrives.
pub async fn run_task(
    task_id: Uuid,
    script_type: ScriptType,
    script_body: &str,
    output_tx: Option<mpsc::Sender<WsMessage>>,
) -> TaskResultPayload {
    let started_at = Utc::now();
    info!(%task_id, ?script_type, "running task");

    let mut cmd = command_for(script_type, script_body);
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!(%task_id, error = %e, "subprocess spawn failed");
            return TaskResultPayload {
                task_id,
                exit_code: Some(-1),
                stdout: String::new(),
                stderr: e.to_string(),
                started_at: Some(started_at),
            };
        }
    };

    let stdout = child.stdout.take().expect("piped stdout");
    let stderr = child.stderr.take().expect("piped stderr");

    let stdout_task = tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        let mut buf = String::new();
        while let Ok(Some(line)) = lines.next_line().await {
            buf.push_str(&line);
            buf.push('\n');
            if let Some(tx) = &output_tx {
                let _ = tx
                    .send(WsMessage::TaskOutput {
                        task_id,
                        output: format!("{line}\n"),
                        progress: PROGRESS_RUNNING,
                    })
                    .await;
            }
        }
        caps::truncate_utf8(&buf, caps::STDOUT_CAP_BYTES)
    });

    let stderr_task = tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        let mut buf = String::new();
        while let Ok(Some(line)) = lines.next_line().await {
            buf.push_str(&line);
            buf.push('\n');
        }
        caps::truncate_utf8(&buf, caps::STDERR_CAP_BYTES)
    });

    let wait_result = tokio::time::timeout(TASK_TIMEOUT, child.wait()).await;

    let (stdout_buf, stderr_buf, exit_code) = match wait_result {
        Ok(Ok(status)) => {
            let out = stdout_task.await.unwrap_or_default();
            let err = stderr_task.await.unwrap_or_default();
            (out, err, status.code().or(Some(-1)))
        }
        Ok(Err(e)) => {
            stdout_task.abort();
            stderr_task.abort();
            (String::new(), e.to_string(), Some(-1))
        }
        Err(_) => {
            warn!(%task_id, "task timed out, killing process tree");
            let _ = child.kill().await;
            let out = stdout_task.await.unwrap_or_default();
            let mut err = stderr_task.await.unwrap_or_default();
            err.push_str("timed out");
            (out, err, Some(-1))
        }
    };

    TaskResultPayload {
        task_id,
        exit_code,
        stdout: stdout_buf,
        stderr: stderr_buf,
        started_at: Some(started_at),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shell_echo_succeeds() {
        let result = run_task(Uuid::new_v4(), ScriptType::Shell, "echo hello", None).await;
        assert_eq!(result.exit_code, Some(0));
        assert!(result.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported() {
        let result = run_task(Uuid::new_v4(), ScriptType::Shell, "exit 7", None).await;
        assert_eq!(result.exit_code, Some(7));
    }

    #[tokio::test]
    async fn spawn_failure_reports_exit_code_negative_one() {
        let result = run_task(Uuid::new_v4(), ScriptType::Adb, "shell echo hi", None).await;
        // `adb` is unlikely to be on a CI PATH; either a clean run or a
        // spawn failure are both acceptable outcomes here, but a spawn
        // failure must still come back as exit_code -1, never a panic.
        if result.stdout.is_empty() && result.exit_code == Some(-1) {
            assert!(!result.stderr.is_empty());
        }
    }
}
