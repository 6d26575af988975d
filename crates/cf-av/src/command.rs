//! Builder for executing external tool commands with timeout support.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Default command timeout: 5 minutes.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Stderr lines kept for error messages when streaming.
const STDERR_TAIL_LINES: usize = 20;

/// Output captured from a tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Process exit status.
    pub status: ExitStatus,
    /// Captured standard output (lossy UTF-8).
    pub stdout: String,
    /// Captured standard error (lossy UTF-8). When streaming, only the
    /// trailing lines are kept.
    pub stderr: String,
}

/// A builder for constructing and executing external tool invocations.
///
/// # Example
///
/// ```no_run
/// use cf_av::ToolCommand;
/// use std::path::PathBuf;
///
/// # async fn example() -> cf_core::Result<()> {
/// let output = ToolCommand::new(PathBuf::from("ffprobe"))
///     .arg("-v").arg("quiet")
///     .arg("-print_format").arg("json")
///     .arg("-show_format")
///     .arg("/path/to/clip.mp4")
///     .execute()
///     .await?;
/// println!("{}", output.stdout);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl ToolCommand {
    /// Create a new command for the given program path.
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Append a single argument.
    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Set the maximum execution time.
    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.timeout = d;
        self
    }

    /// The arguments collected so far.
    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Execute the command, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// - Returns [`cf_core::Error::Tool`] if the process times out (message
    ///   includes the timeout duration).
    /// - Returns [`cf_core::Error::Tool`] if the process exits with a non-zero
    ///   status (message includes stderr).
    /// - Returns [`cf_core::Error::Tool`] if spawning the process fails.
    pub async fn execute(&self) -> cf_core::Result<ToolOutput> {
        let program_name = self.program_name();

        let child = self
            .command()
            .spawn()
            .map_err(|e| cf_core::Error::tool(&program_name, format!("failed to spawn: {e}")))?;

        // The child is killed on drop if the timeout wins.
        let result = tokio::time::timeout(self.timeout, child.wait_with_output()).await;

        match result {
            Ok(Ok(output)) => {
                let tool_output = ToolOutput {
                    status: output.status,
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                };
                check_status(&program_name, tool_output)
            }
            Ok(Err(e)) => Err(cf_core::Error::tool(
                program_name,
                format!("I/O error waiting for process: {e}"),
            )),
            Err(_elapsed) => Err(cf_core::Error::tool(
                program_name,
                format!("timed out after {:?}", self.timeout),
            )),
        }
    }

    /// Execute the command, handing each stderr line to `on_line` as it
    /// arrives.
    ///
    /// Used with ffmpeg's `-progress pipe:2` to stream progress. When
    /// `cancel` fires the process is killed and a `Tool` error is returned.
    pub async fn execute_with_stderr_callback(
        &self,
        mut on_line: impl FnMut(&str),
        cancel: Option<CancellationToken>,
    ) -> cf_core::Result<ToolOutput> {
        let program_name = self.program_name();
        let cancel = cancel.unwrap_or_default();

        let mut child = self
            .command()
            .spawn()
            .map_err(|e| cf_core::Error::tool(&program_name, format!("failed to spawn: {e}")))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| cf_core::Error::tool(&program_name, "stderr was not captured"))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| cf_core::Error::tool(&program_name, "stdout was not captured"))?;

        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stdout.read_to_end(&mut buf).await;
            String::from_utf8_lossy(&buf).to_string()
        });

        let mut lines = BufReader::new(stderr).lines();
        let mut tail: Vec<String> = Vec::with_capacity(STDERR_TAIL_LINES);
        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        on_line(&line);
                        if tail.len() == STDERR_TAIL_LINES {
                            tail.remove(0);
                        }
                        tail.push(line);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = child.kill().await;
                        return Err(cf_core::Error::tool(
                            program_name,
                            format!("failed to read stderr: {e}"),
                        ));
                    }
                },
                _ = cancel.cancelled() => {
                    let _ = child.kill().await;
                    return Err(cf_core::Error::tool(program_name, "cancelled"));
                }
                _ = &mut deadline => {
                    let _ = child.kill().await;
                    return Err(cf_core::Error::tool(
                        program_name,
                        format!("timed out after {:?}", self.timeout),
                    ));
                }
            }
        }

        let status = child.wait().await.map_err(|e| {
            cf_core::Error::tool(&program_name, format!("I/O error waiting for process: {e}"))
        })?;
        let stdout = stdout_task.await.unwrap_or_default();

        check_status(
            &program_name,
            ToolOutput {
                status,
                stdout,
                stderr: tail.join("\n"),
            },
        )
    }
}

fn check_status(program_name: &str, output: ToolOutput) -> cf_core::Result<ToolOutput> {
    if !output.status.success() {
        return Err(cf_core::Error::tool(
            program_name,
            format!("exited with status {}: {}", output.status, output.stderr.trim()),
        ));
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn execute_echo() {
        // `echo` should be universally available.
        let output = ToolCommand::new(PathBuf::from("echo"))
            .arg("hello")
            .execute()
            .await;

        match output {
            Ok(out) => {
                assert!(out.status.success());
                assert!(out.stdout.trim().contains("hello"));
            }
            Err(_) => {
                // On some minimal environments echo may not exist; skip.
            }
        }
    }

    #[tokio::test]
    async fn execute_nonexistent_tool() {
        let result = ToolCommand::new(PathBuf::from("nonexistent_tool_xyz_12345"))
            .execute()
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn timeout_fires() {
        let result = ToolCommand::new(PathBuf::from("sleep"))
            .arg("10")
            .timeout(Duration::from_millis(100))
            .execute()
            .await;
        assert!(result.is_err());
        let err = result.unwrap_err().to_string();
        assert!(err.contains("timed out"), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn stderr_lines_are_streamed() {
        let Ok(sh) = which::which("sh") else {
            return;
        };
        let mut seen = Vec::new();
        let output = ToolCommand::new(sh)
            .arg("-c")
            .arg("echo one >&2; echo two >&2; echo out")
            .execute_with_stderr_callback(|line| seen.push(line.to_string()), None)
            .await
            .unwrap();
        assert_eq!(seen, vec!["one", "two"]);
        assert_eq!(output.stdout.trim(), "out");
    }

    #[tokio::test]
    async fn streaming_respects_cancellation() {
        let Ok(sleep) = which::which("sleep") else {
            return;
        };
        let token = CancellationToken::new();
        token.cancel();
        let err = ToolCommand::new(sleep)
            .arg("10")
            .execute_with_stderr_callback(|_| {}, Some(token))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cancelled"), "unexpected error: {err}");
    }
}
