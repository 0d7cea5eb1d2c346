//! Process seam: the launch description, the live child handle, and the
//! launcher that creates both.
//!
//! The runner only talks to [`Launcher`] and [`ChildHandle`]. Production code
//! uses [`OsLauncher`]; tests provide fakes that never touch the OS.

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::future::Future;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use tokio::process::Command;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Everything needed to start the companion process. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

impl LaunchSpec {
    /// Positional arguments are `[script, endpoint, target]`, in that order.
    pub fn companion(
        runtime: &str,
        script: PathBuf,
        endpoint: &str,
        target_name: &str,
        working_dir: PathBuf,
    ) -> Self {
        Self {
            program: runtime.to_string(),
            args: vec![
                script.display().to_string(),
                endpoint.to_string(),
                target_name.to_string(),
            ],
            working_dir,
        }
    }
}

/// How a process ended: an exit code, or the signal that killed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitReport {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitReport {
    pub fn exited(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
        }
    }

    pub fn signaled(signal: Signal) -> Self {
        Self {
            code: None,
            signal: Some(signal as i32),
        }
    }

    pub fn from_status(status: std::process::ExitStatus) -> Self {
        Self {
            code: status.code(),
            signal: status.signal(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Shell convention: the exit code itself, or 128 + signal number.
    pub fn exit_code(&self) -> i32 {
        match (self.code, self.signal) {
            (Some(code), _) => code,
            (None, Some(sig)) => 128 + sig,
            (None, None) => 1,
        }
    }
}

impl std::fmt::Display for ExitReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(sig)) => match Signal::try_from(sig) {
                Ok(s) => write!(f, "killed by {}", s),
                Err(_) => write!(f, "killed by signal {}", sig),
            },
            (None, None) => write!(f, "unknown status"),
        }
    }
}

/// A live child process, exclusively owned by the runner.
pub trait ChildHandle: Send {
    fn id(&self) -> Option<u32>;

    /// Politely ask the child to stop (SIGTERM).
    fn terminate(&mut self) -> std::io::Result<()>;

    /// Stop the child unconditionally (SIGKILL).
    fn force_kill(&mut self) -> std::io::Result<()>;

    /// Resolve once the child has exited. Must be cancel-safe: dropping the
    /// future before completion loses nothing.
    fn wait(&mut self) -> BoxFuture<'_, std::io::Result<ExitReport>>;
}

/// Creates processes. Substitutable so preflight ordering can be tested
/// without spawning anything.
pub trait Launcher: Send + Sync {
    /// Run `program args...` to completion with its output discarded.
    fn probe<'a>(
        &'a self,
        program: &'a str,
        args: &'a [String],
    ) -> BoxFuture<'a, std::io::Result<ExitReport>>;

    /// Start the companion process and return its handle without waiting.
    fn spawn(&self, spec: &LaunchSpec) -> std::io::Result<Box<dyn ChildHandle>>;
}

/// Launcher backed by real OS processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsLauncher;

impl Launcher for OsLauncher {
    fn probe<'a>(
        &'a self,
        program: &'a str,
        args: &'a [String],
    ) -> BoxFuture<'a, std::io::Result<ExitReport>> {
        Box::pin(async move {
            let output = Command::new(program)
                .args(args)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output()
                .await?;
            tracing::debug!(
                program,
                stdout = %String::from_utf8_lossy(&output.stdout).trim(),
                "runtime probe finished"
            );
            Ok(ExitReport::from_status(output.status))
        })
    }

    /// The child gets the launcher's stdio unchanged so interactive output
    /// (login codes, prompts) shows up live. It runs in its own process group
    /// so a terminal Ctrl-C reaches only the launcher, which then relays a
    /// single SIGTERM to the whole group.
    fn spawn(&self, spec: &LaunchSpec) -> std::io::Result<Box<dyn ChildHandle>> {
        let child = Command::new(&spec.program)
            .args(&spec.args)
            .current_dir(&spec.working_dir)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()?;

        let pgid = child.id().map(|pid| Pid::from_raw(pid as i32));
        Ok(Box::new(OsChild { child, pgid }))
    }
}

/// A tokio child plus the process group it leads.
pub struct OsChild {
    child: tokio::process::Child,
    pgid: Option<Pid>,
}

impl OsChild {
    fn signal_group(&mut self, signal: Signal) -> std::io::Result<()> {
        let Some(pgid) = self.pgid else {
            return Ok(());
        };
        match killpg(pgid, signal) {
            Ok(()) => Ok(()),
            // Group already gone.
            Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(std::io::Error::from(e)),
        }
    }
}

impl ChildHandle for OsChild {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn terminate(&mut self) -> std::io::Result<()> {
        self.signal_group(Signal::SIGTERM)
    }

    fn force_kill(&mut self) -> std::io::Result<()> {
        self.signal_group(Signal::SIGKILL)?;
        match self.child.start_kill() {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn wait(&mut self) -> BoxFuture<'_, std::io::Result<ExitReport>> {
        Box::pin(async move {
            let status = self.child.wait().await?;
            self.pgid = None;
            Ok(ExitReport::from_status(status))
        })
    }
}
