//! Claude CLI process management

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::{Child, ChildStdout, Command},
    task::JoinHandle,
};
use tokio_stream::{wrappers::LinesStream, StreamExt};

use super::error::ClaudeError;
use super::locate::CliLocator;

/// Variables the CLI sets to detect that it is running inside itself.
/// Stripped so a session can be launched from within a Claude Code session.
pub const NESTED_SESSION_ENV: [&str; 2] = ["CLAUDECODE", "CLAUDE_CODE"];

/// How long a cancelled child gets to exit after SIGTERM before it is killed
const TERMINATE_GRACE: Duration = Duration::from_secs(5);
/// How long to wait for stderr to close once the child has exited
const STDERR_FLUSH: Duration = Duration::from_secs(2);

/// Parameters for one CLI invocation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnRequest {
    pub prompt: String,
    pub model: Option<String>,
    pub working_directory: PathBuf,
    pub resume_session_id: Option<String>,
    pub continue_session: bool,
    pub system_prompt: Option<String>,
    pub max_turns: Option<u32>,
    pub max_budget_usd: Option<f64>,
    pub allowed_tools: Vec<String>,
    pub permission_mode: Option<String>,
}

impl TurnRequest {
    pub fn new(prompt: impl Into<String>, working_directory: impl Into<PathBuf>) -> Self {
        Self {
            prompt: prompt.into(),
            working_directory: working_directory.into(),
            ..Self::default()
        }
    }

    /// Argument vector passed to the CLI
    pub fn args(&self) -> Vec<String> {
        // Always use print mode with streaming JSON
        let mut args = vec![
            "-p".to_string(),
            self.prompt.clone(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
        ];

        if let Some(model) = &self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        if let Some(session_id) = &self.resume_session_id {
            args.push("--resume".to_string());
            args.push(session_id.clone());
        }
        if self.continue_session {
            args.push("--continue".to_string());
        }
        if let Some(system_prompt) = &self.system_prompt {
            args.push("--system-prompt".to_string());
            args.push(system_prompt.clone());
        }
        if let Some(max_turns) = self.max_turns {
            args.push("--max-turns".to_string());
            args.push(max_turns.to_string());
        }
        if let Some(budget) = self.max_budget_usd {
            args.push("--max-budget-usd".to_string());
            args.push(budget.to_string());
        }
        if !self.allowed_tools.is_empty() {
            args.push("--allowedTools".to_string());
            args.push(self.allowed_tools.join(","));
        }
        if let Some(mode) = &self.permission_mode {
            args.push("--permission-mode".to_string());
            args.push(mode.clone());
        }

        args
    }
}

/// One running Claude CLI invocation.
///
/// Stdout is consumed line by line as it arrives; stderr is drained in the
/// background. The child is terminated when this value is dropped.
pub struct ClaudeProcess {
    child: Child,
    stdout: LinesStream<BufReader<ChildStdout>>,
    stderr_task: Option<JoinHandle<String>>,
    stderr: String,
    exit_status: Option<ExitStatus>,
    cancelled: bool,
    finished: bool,
}

impl ClaudeProcess {
    /// Resolve the executable and spawn it for `request`
    pub async fn start(locator: &CliLocator, request: &TurnRequest) -> Result<Self, ClaudeError> {
        let program = locator.resolve().await?;
        Self::spawn(&program, request)
    }

    pub fn spawn(program: &Path, request: &TurnRequest) -> Result<Self, ClaudeError> {
        if !request.working_directory.is_dir() {
            return Err(ClaudeError::InvalidWorkingDirectory(
                request.working_directory.clone(),
            ));
        }

        let mut cmd = Command::new(program);
        configure(&mut cmd, request);

        let mut child = cmd.spawn().map_err(|source| ClaudeError::Spawn {
            path: program.to_path_buf(),
            source,
        })?;
        tracing::debug!(
            "Started {} (pid {:?}) in {}",
            program.display(),
            child.id(),
            request.working_directory.display()
        );

        let stdout = child.stdout.take().ok_or_else(|| {
            ClaudeError::Io(std::io::Error::other("child stdout was not captured"))
        })?;
        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr).lines();
                let mut captured = String::new();
                loop {
                    match reader.next_line().await {
                        Ok(Some(line)) => {
                            let trimmed = line.trim();
                            if !trimmed.is_empty() {
                                tracing::debug!("Claude stderr: {}", trimmed);
                            }
                            captured.push_str(&line);
                            captured.push('\n');
                        }
                        Ok(None) => break,
                        // Non-UTF-8 diagnostics are skipped
                        Err(e) if e.kind() == std::io::ErrorKind::InvalidData => continue,
                        Err(_) => break,
                    }
                }
                captured
            })
        });

        Ok(Self {
            child,
            stdout: LinesStream::new(BufReader::new(stdout).lines()),
            stderr_task,
            stderr: String::new(),
            exit_status: None,
            cancelled: false,
            finished: false,
        })
    }

    /// Next stdout line, in the order the CLI wrote them.
    ///
    /// At end of output this waits for the exit status: a non-zero exit with
    /// stderr text is returned as an error after every stdout line has been
    /// delivered, a non-zero exit with empty stderr is a clean end. Cancel
    /// safe.
    pub async fn next_line(&mut self) -> Result<Option<String>, ClaudeError> {
        while !self.finished {
            match self.stdout.next().await {
                Some(Ok(line)) => return Ok(Some(line)),
                Some(Err(e)) if e.kind() == std::io::ErrorKind::InvalidData => {
                    tracing::debug!("Skipping non UTF-8 output line");
                }
                Some(Err(e)) => {
                    self.finished = true;
                    return Err(ClaudeError::Io(e));
                }
                None => {
                    self.finished = true;
                    let status = self.collect_exit().await?;
                    if status.success() || self.cancelled {
                        return Ok(None);
                    }
                    let stderr = self.stderr.trim();
                    if stderr.is_empty() {
                        tracing::debug!("Claude exited with {} and no diagnostics", status);
                        return Ok(None);
                    }
                    return Err(ClaudeError::from_exit(exit_code(&status), stderr.to_string()));
                }
            }
        }
        Ok(None)
    }

    /// Ask the child to stop. Idempotent, and a no-op once it has exited.
    pub fn cancel(&mut self) {
        if self.cancelled {
            return;
        }
        self.cancelled = true;

        if self.exit_status.is_some() || matches!(self.child.try_wait(), Ok(Some(_))) {
            return;
        }
        tracing::debug!("Terminating Claude process {:?}", self.child.id());
        terminate(&mut self.child);
    }

    /// Reap the child after `cancel`, escalating to a kill if it lingers
    pub async fn shutdown(&mut self) -> Result<(), ClaudeError> {
        if self.exit_status.is_some() {
            return Ok(());
        }
        self.finished = true;
        if tokio::time::timeout(TERMINATE_GRACE, self.child.wait())
            .await
            .is_err()
        {
            tracing::warn!("Claude process ignored SIGTERM, killing it");
            self.child.start_kill()?;
        }
        self.collect_exit().await?;
        Ok(())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Exit code once the process has been reaped
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_status.as_ref().map(exit_code)
    }

    /// Captured stderr, complete once the process has been reaped
    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    async fn collect_exit(&mut self) -> Result<ExitStatus, ClaudeError> {
        if let Some(status) = self.exit_status {
            return Ok(status);
        }
        let status = self.child.wait().await?;
        if let Some(task) = self.stderr_task.take() {
            let abort = task.abort_handle();
            match tokio::time::timeout(STDERR_FLUSH, task).await {
                Ok(Ok(text)) => self.stderr = text,
                Ok(Err(e)) => tracing::debug!("stderr reader failed: {}", e),
                Err(_) => {
                    tracing::debug!("stderr still open after exit, giving up on it");
                    abort.abort();
                }
            }
        }
        self.exit_status = Some(status);
        Ok(status)
    }
}

impl Drop for ClaudeProcess {
    fn drop(&mut self) {
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        // Try to kill the process if still running
        if self.exit_status.is_none() {
            let _ = self.child.start_kill();
        }
    }
}

/// Arguments, directory, scrubbed environment and piped stdio for `request`
fn configure(cmd: &mut Command, request: &TurnRequest) {
    cmd.args(request.args());
    cmd.current_dir(&request.working_directory);
    for var in NESTED_SESSION_ENV {
        cmd.env_remove(var);
    }

    // Set up stdio
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);
}

fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: plain signal send to a child we have not reaped yet
            let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
            if rc == 0 {
                return;
            }
        }
    }
    let _ = child.start_kill();
}

fn exit_code(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_args() {
        let request = TurnRequest::new("hello", "/tmp");
        assert_eq!(
            request.args(),
            vec!["-p", "hello", "--output-format", "stream-json", "--verbose"]
        );
    }

    #[test]
    fn test_all_args() {
        let request = TurnRequest {
            prompt: "fix it".to_string(),
            model: Some("sonnet".to_string()),
            working_directory: PathBuf::from("/tmp"),
            resume_session_id: Some("s1".to_string()),
            continue_session: true,
            system_prompt: Some("be terse".to_string()),
            max_turns: Some(3),
            max_budget_usd: Some(1.5),
            allowed_tools: vec!["Read".to_string(), "Bash".to_string()],
            permission_mode: Some("plan".to_string()),
        };
        assert_eq!(
            request.args(),
            vec![
                "-p",
                "fix it",
                "--output-format",
                "stream-json",
                "--verbose",
                "--model",
                "sonnet",
                "--resume",
                "s1",
                "--continue",
                "--system-prompt",
                "be terse",
                "--max-turns",
                "3",
                "--max-budget-usd",
                "1.5",
                "--allowedTools",
                "Read,Bash",
                "--permission-mode",
                "plan",
            ]
        );
    }

    #[test]
    fn test_empty_allowed_tools_omitted() {
        let mut request = TurnRequest::new("x", "/tmp");
        request.allowed_tools = Vec::new();
        assert!(!request.args().contains(&"--allowedTools".to_string()));
    }

    #[test]
    fn test_nested_session_env_is_removed() {
        use std::ffi::OsStr;

        let mut cmd = Command::new("claude");
        cmd.env("CLAUDECODE", "1").env("KEEP_ME", "x");
        configure(&mut cmd, &TurnRequest::new("hi", "/tmp"));

        let envs: Vec<_> = cmd.as_std().get_envs().collect();
        assert!(envs.contains(&(OsStr::new("CLAUDECODE"), None)));
        assert!(envs.contains(&(OsStr::new("CLAUDE_CODE"), None)));
        assert!(envs.contains(&(OsStr::new("KEEP_ME"), Some(OsStr::new("x")))));
    }

    #[tokio::test]
    async fn test_missing_working_directory() {
        let request = TurnRequest::new("x", "/definitely/not/a/dir");
        let err = match ClaudeProcess::spawn(Path::new("/bin/true"), &request) {
            Err(e) => e,
            Ok(_) => panic!("spawn should fail"),
        };
        assert!(matches!(err, ClaudeError::InvalidWorkingDirectory(_)));
    }
}
