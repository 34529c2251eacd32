//! REPL subprocess handle.
//!
//! Spawns the REPL with piped stdio in its own process group, so a terminal
//! interrupt aimed at the daemon does not reach it.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{info, warn};

/// Configuration for spawning the REPL.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    pub executable: PathBuf,
    pub args: Vec<String>,
}

impl SpawnConfig {
    pub fn new(executable: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            executable: executable.into(),
            args,
        }
    }
}

/// Control messages the REPL understands out of band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    /// Reinitialise while staying the same process (`SIGUSR1`).
    Reload,
    /// Stop the REPL's whole process group (`SIGTERM`). Used when aborting.
    Terminate,
}

/// Errors from subprocess operations.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Failed to spawn {executable}: {reason}")]
    SpawnFailed { executable: String, reason: String },

    #[error("REPL has no process id (already reaped)")]
    NoPid,

    #[error("Failed to send {signal:?} to REPL: {reason}")]
    Signal {
        signal: ControlSignal,
        reason: String,
    },

    #[error("Failed to wait for REPL: {0}")]
    Wait(#[source] std::io::Error),
}

/// Capability to deliver control signals to the REPL.
pub trait ProcessControl: Send + Sync {
    fn signal(&self, signal: ControlSignal) -> Result<(), ProcessError>;
}

/// The REPL's three byte streams.
#[derive(Debug)]
pub struct ProcessStreams {
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

/// Sends signals to the REPL by pid. Cheap to clone.
#[derive(Debug, Clone, Copy)]
pub struct ProcessSignaller {
    pid: Option<u32>,
}

impl ProcessControl for ProcessSignaller {
    #[cfg(unix)]
    fn signal(&self, signal: ControlSignal) -> Result<(), ProcessError> {
        use nix::sys::signal::{Signal, kill, killpg};
        use nix::unistd::Pid;

        let pid = self.pid.ok_or(ProcessError::NoPid)?;
        let pid = Pid::from_raw(i32::try_from(pid).map_err(|e| ProcessError::Signal {
            signal,
            reason: e.to_string(),
        })?);
        let sent = match signal {
            ControlSignal::Reload => kill(pid, Signal::SIGUSR1),
            // The REPL leads its own group, so its pid is the group id.
            ControlSignal::Terminate => killpg(pid, Signal::SIGTERM),
        };
        sent.map_err(|e| ProcessError::Signal {
            signal,
            reason: e.to_string(),
        })
    }

    #[cfg(not(unix))]
    fn signal(&self, signal: ControlSignal) -> Result<(), ProcessError> {
        Err(ProcessError::Signal {
            signal,
            reason: "signals are only supported on unix".to_string(),
        })
    }
}

/// Owns the running REPL process.
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    signaller: ProcessSignaller,
}

impl ProcessHandle {
    /// Spawn the REPL. Failure here is fatal for the service.
    pub fn spawn(config: &SpawnConfig) -> Result<(Self, ProcessStreams), ProcessError> {
        let executable = config.executable.display().to_string();
        let spawn_failed = |reason: String| ProcessError::SpawnFailed {
            executable: executable.clone(),
            reason,
        };

        let mut cmd = Command::new(&config.executable);
        cmd.args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        info!(
            executable = %executable,
            args = ?config.args,
            "Spawning REPL subprocess"
        );
        let mut child = cmd.spawn().map_err(|e| spawn_failed(e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_failed("Failed to capture stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_failed("Failed to capture stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| spawn_failed("Failed to capture stderr".to_string()))?;

        let signaller = ProcessSignaller { pid: child.id() };
        info!(pid = ?signaller.pid, "REPL subprocess started");

        Ok((
            Self { child, signaller },
            ProcessStreams {
                stdin,
                stdout,
                stderr,
            },
        ))
    }

    pub const fn signaller(&self) -> ProcessSignaller {
        self.signaller
    }

    pub const fn pid(&self) -> Option<u32> {
        self.signaller.pid
    }

    /// Wait for the REPL to exit.
    pub async fn wait(&mut self) -> Result<ExitStatus, ProcessError> {
        let status = self.child.wait().await.map_err(ProcessError::Wait)?;
        if status.success() {
            info!(?status, "REPL exited");
        } else {
            warn!(?status, "REPL exited abnormally");
        }
        Ok(status)
    }
}
