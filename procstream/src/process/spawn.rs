//! Process spawning with decoded, streaming output.
//!
//! Provides:
//! - Configurable stdio handling
//! - stdout/stderr as [`ChunkSource`]s, or merged into one tagged line stream
//! - Timeout support for collected runs
//! - Environment variable management
//! - Working directory configuration

use anyhow::{Context, Result};
use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::StreamResult;
use crate::stream::{merge, ChunkSource, Lines, Merge, SourceOptions, DEFAULT_CAPACITY};

/// Output line from a spawned process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutput {
    /// Line from stdout.
    Stdout(String),
    /// Line from stderr.
    Stderr(String),
}

impl ProcessOutput {
    /// The line text.
    pub fn line(&self) -> &str {
        match self {
            Self::Stdout(line) | Self::Stderr(line) => line,
        }
    }

    /// Name of the stream the line came from.
    pub const fn stream_name(&self) -> &'static str {
        match self {
            Self::Stdout(_) => "stdout",
            Self::Stderr(_) => "stderr",
        }
    }

    pub const fn is_stderr(&self) -> bool {
        matches!(self, Self::Stderr(_))
    }
}

/// Merged stdout/stderr lines of a child process.
pub type OutputLines = Merge<
    BoxStream<'static, StreamResult<ProcessOutput>>,
    BoxStream<'static, StreamResult<ProcessOutput>>,
>;

/// Configuration options for spawning a process.
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    /// The program to execute.
    pub program: String,

    /// Arguments to pass to the program.
    pub args: Vec<String>,

    /// Working directory for the process.
    pub working_dir: Option<PathBuf>,

    /// Environment variables to set (merged with current env).
    pub env: HashMap<String, String>,

    /// Environment variables to remove.
    pub env_remove: Vec<String>,

    /// Whether to clear the environment before adding env vars.
    pub env_clear: bool,

    /// Timeout for [`run`].
    pub timeout: Option<Duration>,

    /// Whether to capture stdout (default: true).
    pub capture_stdout: bool,

    /// Whether to capture stderr (default: true).
    pub capture_stderr: bool,

    /// Whether to pipe stdin (default: false).
    pub pipe_stdin: bool,

    /// Refill size of the output sources (default: 16384).
    pub buffer_capacity: usize,
}

impl ProcessOptions {
    /// Create new options for the given program.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: HashMap::new(),
            env_remove: Vec::new(),
            env_clear: false,
            timeout: None,
            capture_stdout: true,
            capture_stderr: true,
            pipe_stdin: false,
            buffer_capacity: DEFAULT_CAPACITY,
        }
    }

    /// Add an argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the working directory.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Remove an environment variable.
    pub fn env_remove(mut self, key: impl Into<String>) -> Self {
        self.env_remove.push(key.into());
        self
    }

    /// Clear the environment before setting variables.
    pub fn env_clear(mut self) -> Self {
        self.env_clear = true;
        self
    }

    /// Set a timeout for [`run`].
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    /// Discard stdout instead of capturing it.
    pub fn ignore_stdout(mut self) -> Self {
        self.capture_stdout = false;
        self
    }

    /// Discard stderr instead of capturing it.
    pub fn ignore_stderr(mut self) -> Self {
        self.capture_stderr = false;
        self
    }

    /// Enable stdin piping.
    pub fn pipe_stdin(mut self) -> Self {
        self.pipe_stdin = true;
        self
    }

    /// Set the refill size of the output sources.
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);

        if let Some(ref dir) = self.working_dir {
            cmd.current_dir(dir);
        }

        if self.env_clear {
            cmd.env_clear();
        }
        for key in &self.env_remove {
            cmd.env_remove(key);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        cmd.stdout(if self.capture_stdout {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.stderr(if self.capture_stderr {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.stdin(if self.pipe_stdin {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd
    }

    fn source_options(&self, label: &str) -> SourceOptions {
        SourceOptions::new()
            .capacity(self.buffer_capacity)
            .label(format!("{}:{label}", self.program))
    }
}

/// A running child whose captured pipes are exposed as [`ChunkSource`]s.
#[derive(Debug)]
pub struct SpawnedProcess {
    child: Child,

    /// Captured stdout, if any and not yet taken.
    pub stdout: Option<ChunkSource<ChildStdout>>,

    /// Captured stderr, if any and not yet taken.
    pub stderr: Option<ChunkSource<ChildStderr>>,

    /// Piped stdin, if requested.
    pub stdin: Option<ChildStdin>,
}

/// Spawn a process with its output wired into the decoding pipeline.
///
/// # Example
///
/// ```rust,no_run
/// use procstream::process::{spawn, ProcessOptions, ProcessOutput};
/// use tokio_stream::StreamExt;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let mut process = spawn(&ProcessOptions::new("ls").arg("-la"))?;
///     let mut lines = process.output_lines();
///
///     while let Some(output) = lines.next().await {
///         match output? {
///             ProcessOutput::Stdout(line) => println!("OUT: {line}"),
///             ProcessOutput::Stderr(line) => eprintln!("ERR: {line}"),
///         }
///     }
///
///     let status = process.wait().await?;
///     println!("Process exited with: {:?}", status.code());
///     Ok(())
/// }
/// ```
pub fn spawn(options: &ProcessOptions) -> Result<SpawnedProcess> {
    let mut child = options
        .command()
        .spawn()
        .with_context(|| format!("Failed to spawn process: {}", options.program))?;
    debug!(program = %options.program, pid = child.id(), "spawned");

    let stdout = child
        .stdout
        .take()
        .map(|pipe| ChunkSource::with_options(pipe, options.source_options("stdout")));
    let stderr = child
        .stderr
        .take()
        .map(|pipe| ChunkSource::with_options(pipe, options.source_options("stderr")));
    let stdin = child.stdin.take();

    Ok(SpawnedProcess {
        child,
        stdout,
        stderr,
        stdin,
    })
}

impl SpawnedProcess {
    /// OS process id.
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Take stdout and stderr and merge them into one line stream.
    ///
    /// A pipe that was not captured (or was already taken) contributes nothing.
    pub fn output_lines(&mut self) -> OutputLines {
        let stdout = self.stdout.take().map_or_else(
            || stream::empty().boxed(),
            |source| Lines::new(source).map_ok(ProcessOutput::Stdout).boxed(),
        );
        let stderr = self.stderr.take().map_or_else(
            || stream::empty().boxed(),
            |source| Lines::new(source).map_ok(ProcessOutput::Stderr).boxed(),
        );
        merge(stdout, stderr)
    }

    /// Kill the child. A child that already exited is not an error.
    pub fn kill(&mut self) -> Result<()> {
        match self.child.kill() {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(err) => Err(err).context("Failed to kill process"),
        }
    }

    /// Wait for the child to exit, off the async scheduler.
    ///
    /// Closes stdin first so a child reading it sees end of input.
    pub async fn wait(mut self) -> Result<ExitStatus> {
        drop(self.stdin.take());
        let mut child = self.child;
        tokio::task::spawn_blocking(move || child.wait())
            .await
            .context("Process wait task failed")?
            .context("Failed to wait for process to exit")
    }
}

/// Result from a completed process.
#[derive(Debug)]
pub struct ProcessResult {
    /// Exit status of the process.
    pub status: ExitStatus,

    /// All stdout lines collected.
    pub stdout: Vec<String>,

    /// All stderr lines collected.
    pub stderr: Vec<String>,

    /// Whether the process was killed due to timeout.
    pub timed_out: bool,
}

impl ProcessResult {
    /// Check if the process exited successfully.
    pub fn success(&self) -> bool {
        self.status.success() && !self.timed_out
    }

    /// Get stdout as a single string.
    pub fn stdout_string(&self) -> String {
        self.stdout.join("\n")
    }

    /// Get stderr as a single string.
    pub fn stderr_string(&self) -> String {
        self.stderr.join("\n")
    }

    /// Get the exit code, if available.
    pub fn code(&self) -> Option<i32> {
        self.status.code()
    }
}

/// Spawn a process and collect all output.
///
/// # Example
///
/// ```rust,no_run
/// use procstream::process::{run, ProcessOptions};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let result = run(
///         ProcessOptions::new("ls")
///             .arg("-la")
///             .working_dir("/tmp")
///     ).await?;
///
///     println!("Exit code: {:?}", result.code());
///     println!("Output:\n{}", result.stdout_string());
///     Ok(())
/// }
/// ```
pub async fn run(options: ProcessOptions) -> Result<ProcessResult> {
    let mut process = spawn(&options)?;
    drop(process.stdin.take());
    let mut lines = process.output_lines();

    let mut stdout_lines = Vec::new();
    let mut stderr_lines = Vec::new();

    let collect_future = async {
        while let Some(output) = lines.next().await {
            match output? {
                ProcessOutput::Stdout(line) => stdout_lines.push(line),
                ProcessOutput::Stderr(line) => stderr_lines.push(line),
            }
        }
        Ok::<_, crate::StreamError>(())
    };

    let timed_out = if let Some(duration) = options.timeout {
        match timeout(duration, collect_future).await {
            Ok(collected) => {
                collected.context("Failed to read process output")?;
                false
            }
            Err(_) => {
                warn!(program = %options.program, ?duration, "timed out, killing");
                process.kill()?;
                true
            }
        }
    } else {
        collect_future
            .await
            .context("Failed to read process output")?;
        false
    };
    drop(lines);

    let status = process.wait().await?;

    Ok(ProcessResult {
        status,
        stdout: stdout_lines,
        stderr: stderr_lines,
        timed_out,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_echo() {
        let result = run(ProcessOptions::new("echo").arg("hello world"))
            .await
            .unwrap();

        assert!(result.success());
        assert_eq!(result.stdout, vec!["hello world"]);
        assert!(result.stderr.is_empty());
    }

    #[tokio::test]
    async fn test_run_with_env() {
        let result = run(
            ProcessOptions::new("sh")
                .arg("-c")
                .arg("echo $MY_VAR")
                .env("MY_VAR", "test_value"),
        )
        .await
        .unwrap();

        assert!(result.success());
        assert_eq!(result.stdout, vec!["test_value"]);
    }

    #[tokio::test]
    async fn test_run_with_env_removed_and_cleared() {
        // cargo exports CARGO_PKG_NAME to the test process.
        let script = "echo \"[$CARGO_PKG_NAME][$ONLY]\"";
        let inherited = run(ProcessOptions::new("/bin/sh").arg("-c").arg(script))
            .await
            .unwrap();
        assert_eq!(inherited.stdout, vec!["[procstream][]"]);

        let removed = run(
            ProcessOptions::new("/bin/sh")
                .arg("-c")
                .arg(script)
                .env_remove("CARGO_PKG_NAME"),
        )
        .await
        .unwrap();
        assert_eq!(removed.stdout, vec!["[][]"]);

        let cleared = run(
            ProcessOptions::new("/bin/sh")
                .arg("-c")
                .arg(script)
                .env_clear()
                .env("ONLY", "kept"),
        )
        .await
        .unwrap();
        assert_eq!(cleared.stdout, vec!["[][kept]"]);
    }

    #[tokio::test]
    async fn test_run_with_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let result = run(ProcessOptions::new("pwd").working_dir(dir.path()))
            .await
            .unwrap();

        assert!(result.success());
        let name = dir.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(result.stdout[0].ends_with(&name));
    }

    #[tokio::test]
    async fn test_spawn_nonexistent() {
        let result = run(ProcessOptions::new("nonexistent_command_12345")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_run_with_timeout() {
        let result = run(
            ProcessOptions::new("sleep")
                .arg("10")
                .timeout(Duration::from_millis(100)),
        )
        .await
        .unwrap();

        assert!(result.timed_out);
        assert!(!result.success());
    }

    #[tokio::test]
    async fn test_run_stderr() {
        let result = run(ProcessOptions::new("sh").arg("-c").arg("echo error >&2"))
            .await
            .unwrap();

        assert!(result.success());
        assert!(result.stdout.is_empty());
        assert_eq!(result.stderr, vec!["error"]);
    }

    #[tokio::test]
    async fn test_exit_code() {
        let result = run(ProcessOptions::new("sh").arg("-c").arg("exit 42"))
            .await
            .unwrap();

        assert!(!result.success());
        assert_eq!(result.code(), Some(42));
    }

    #[tokio::test]
    async fn test_crlf_and_unterminated_output() {
        let result = run(ProcessOptions::new("printf").arg("one\\r\\ntwo\\rthree"))
            .await
            .unwrap();

        assert_eq!(result.stdout, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_output_lines_are_tagged() {
        let mut process = spawn(
            &ProcessOptions::new("sh")
                .arg("-c")
                .arg("echo out1; echo err1 >&2; echo out2"),
        )
        .unwrap();

        let outputs: Vec<ProcessOutput> = process
            .output_lines()
            .map(Result::unwrap)
            .collect()
            .await;
        let status = process.wait().await.unwrap();
        assert!(status.success());

        let stdout: Vec<&str> = outputs
            .iter()
            .filter(|o| !o.is_stderr())
            .map(ProcessOutput::line)
            .collect();
        assert_eq!(stdout, vec!["out1", "out2"]);
        assert!(outputs.contains(&ProcessOutput::Stderr("err1".to_string())));
    }

    #[tokio::test]
    async fn test_ignored_stderr_yields_nothing() {
        let mut process = spawn(
            &ProcessOptions::new("sh")
                .arg("-c")
                .arg("echo visible; echo hidden >&2")
                .ignore_stderr(),
        )
        .unwrap();
        assert!(process.stderr.is_none());

        let outputs: Vec<ProcessOutput> = process
            .output_lines()
            .map(Result::unwrap)
            .collect()
            .await;
        process.wait().await.unwrap();
        assert_eq!(outputs, vec![ProcessOutput::Stdout("visible".to_string())]);
    }

    #[tokio::test]
    async fn test_ignored_stdout_yields_only_stderr() {
        let mut process = spawn(
            &ProcessOptions::new("sh")
                .arg("-c")
                .arg("echo hidden; echo shown >&2")
                .ignore_stdout(),
        )
        .unwrap();
        assert!(process.stdout.is_none());
        assert!(process.id() > 0);

        let outputs: Vec<ProcessOutput> = process
            .output_lines()
            .map(Result::unwrap)
            .collect()
            .await;
        process.wait().await.unwrap();
        assert_eq!(outputs, vec![ProcessOutput::Stderr("shown".to_string())]);
    }

    #[tokio::test]
    async fn test_stdin_round_trip() {
        use std::io::Write;

        let mut process = spawn(&ProcessOptions::new("cat").pipe_stdin()).unwrap();
        let mut stdin = process.stdin.take().unwrap();
        stdin.write_all("héllo\nwörld\n".as_bytes()).unwrap();
        drop(stdin);

        let lines: Vec<String> = Lines::new(process.stdout.take().unwrap())
            .map(Result::unwrap)
            .collect()
            .await;
        process.wait().await.unwrap();
        assert_eq!(lines, vec!["héllo", "wörld"]);
    }
}
