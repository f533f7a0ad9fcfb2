//! Continuous capture subprocess
//!
//! Owns the external capture tool process: spawn with piped stdout/stderr,
//! and the two-phase shutdown the camera needs to release its USB handle.
//!
//! ```text
//!   stop(grace)
//!       │
//!       ├── SIGINT ──► poll try_wait() every 50ms ──► exited? ──► done
//!       │                         │
//!       │                  grace elapsed
//!       │                         ▼
//!       └─────────────────── SIGKILL + wait ──────────────────► done
//! ```

use std::ffi::OsString;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::process::{Child, ChildStderr, ChildStdout, Command};

use crate::error::CaptureError;

/// Program and arguments used to launch a capture tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureCommand {
    /// Executable name or path
    pub program: OsString,
    /// Arguments passed to the executable
    pub args: Vec<OsString>,
}

impl CaptureCommand {
    /// Create a command with no arguments
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// `<tool> --stdout --capture-movie`
    pub fn movie(program: impl Into<OsString>) -> Self {
        Self::new(program).args(["--stdout", "--capture-movie"])
    }

    /// Launch the process with stdout and stderr piped to the caller
    ///
    /// On failure nothing is left running: the child is only returned once
    /// both pipes have been taken.
    pub fn spawn(&self) -> Result<(CaptureProcess, CapturePipes), CaptureError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(CaptureError::Spawn)?;

        let stdout = child.stdout.take().ok_or(CaptureError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(CaptureError::MissingPipe("stderr"))?;
        let pid = child.id().unwrap_or_default();

        tracing::debug!(
            pid = pid,
            program = ?self.program,
            args = ?self.args,
            "Capture process spawned"
        );

        Ok((CaptureProcess { child, pid }, CapturePipes { stdout, stderr }))
    }
}

/// Output pipes of a running capture process
///
/// Both are registered with the tokio reactor, so reads never block a worker
/// thread; a read with no data ready simply parks the task.
#[derive(Debug)]
pub struct CapturePipes {
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

/// Handle to a running capture process
#[derive(Debug)]
pub struct CaptureProcess {
    child: Child,
    pid: u32,
}

/// How a capture process ended after [`CaptureProcess::stop`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Exited (or had already exited) within the grace period
    Graceful(ExitStatus),
    /// Ignored the interrupt and was killed
    Killed(ExitStatus),
}

impl CaptureProcess {
    /// OS process id
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Check for exit without blocking
    pub fn try_wait(&mut self) -> std::io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    /// Interrupt, wait up to `grace` polling every `poll`, then force-kill
    ///
    /// Only a failed forced kill is reported as an error; escalation itself is
    /// logged as a warning.
    pub async fn stop(
        mut self,
        grace: Duration,
        poll: Duration,
    ) -> Result<StopOutcome, CaptureError> {
        if let Ok(Some(status)) = self.child.try_wait() {
            return Ok(StopOutcome::Graceful(status));
        }

        if let Err(e) = interrupt(&mut self.child) {
            tracing::debug!(pid = self.pid, error = %e, "Failed to interrupt capture process");
        }

        let deadline = Instant::now() + grace;
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    tracing::debug!(pid = self.pid, status = %status, "Capture process exited");
                    return Ok(StopOutcome::Graceful(status));
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(pid = self.pid, error = %e, "try_wait failed");
                    break;
                }
            }
            if Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(poll).await;
        }

        tracing::warn!(
            pid = self.pid,
            grace_ms = grace.as_millis() as u64,
            "Capture process ignored interrupt, killing"
        );

        self.child.kill().await.map_err(CaptureError::KillFailed)?;
        let status = self.child.wait().await.map_err(CaptureError::KillFailed)?;
        Ok(StopOutcome::Killed(status))
    }
}

#[cfg(unix)]
fn interrupt(child: &mut Child) -> std::io::Result<()> {
    let Some(pid) = child.id() else {
        // Already reaped
        return Ok(());
    };

    // SAFETY: kill(2) has no memory-safety preconditions; pid refers to our
    // own un-reaped child so it cannot have been recycled.
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGINT) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn interrupt(child: &mut Child) -> std::io::Result<()> {
    child.start_kill()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn sh(script: &str) -> CaptureCommand {
        CaptureCommand::new("sh").arg("-c").arg(script)
    }

    #[test]
    fn test_movie_command() {
        let cmd = CaptureCommand::movie("gphoto2");
        assert_eq!(cmd.program, OsString::from("gphoto2"));
        assert_eq!(
            cmd.args,
            vec![OsString::from("--stdout"), OsString::from("--capture-movie")]
        );
    }

    #[tokio::test]
    async fn test_spawn_missing_binary() {
        let cmd = CaptureCommand::new("/nonexistent/capture-tool-xyz");
        let result = cmd.spawn();
        assert!(matches!(result, Err(CaptureError::Spawn(_))));
    }

    #[tokio::test]
    async fn test_stdout_is_piped() {
        let (process, mut pipes) = sh("printf hello").spawn().unwrap();
        let mut out = String::new();
        pipes.stdout.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "hello");

        let outcome = process
            .stop(Duration::from_millis(500), Duration::from_millis(10))
            .await
            .unwrap();
        assert!(matches!(outcome, StopOutcome::Graceful(_)));
    }

    #[tokio::test]
    async fn test_stop_interrupts() {
        let (process, _pipes) = sh("exec sleep 30").spawn().unwrap();

        let started = Instant::now();
        let outcome = process
            .stop(Duration::from_millis(2000), Duration::from_millis(50))
            .await
            .unwrap();

        assert!(matches!(outcome, StopOutcome::Graceful(_)));
        assert!(started.elapsed() < Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn test_stop_escalates_to_kill() {
        // Ignores SIGINT, so only SIGKILL ends it
        let (process, _pipes) = sh("trap '' INT; while true; do sleep 0.05; done")
            .spawn()
            .unwrap();
        // Give the shell time to install the trap
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = Instant::now();
        let outcome = process
            .stop(Duration::from_millis(200), Duration::from_millis(50))
            .await
            .unwrap();

        assert!(matches!(outcome, StopOutcome::Killed(_)));
        assert!(started.elapsed() >= Duration::from_millis(200));
    }
}
