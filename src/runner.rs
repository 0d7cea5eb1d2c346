/// Supervised runner: preflight checks, a single launch, and an interruptible
/// wait that turns cancellation into terminate → grace period → kill.
use crate::config::{Configuration, RuntimeConfig};
use crate::error::LaunchError;
use crate::preflight;
use crate::process::{ChildHandle, ExitReport, LaunchSpec, Launcher};
use crate::shutdown::{step, ShutdownAction, ShutdownEvent, ShutdownPhase};
use crate::signals::{CancelReason, CancelReceiver};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;

/// Everything resolved from configuration that a run needs.
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    pub runtime: RuntimeConfig,
    pub script: PathBuf,
    pub configuration: Configuration,
    pub working_dir: PathBuf,
}

/// Lifecycle of the runner's single child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildState {
    Absent,
    Running,
    Terminating,
    Exited(ExitReport),
}

/// Result of a completed (possibly cancelled) run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub report: ExitReport,
    /// First cancellation request received, if any.
    pub cancelled: Option<CancelReason>,
    /// True if the grace period ran out and the child was killed.
    pub forced: bool,
    pub duration: Duration,
    pub pid: Option<u32>,
}

impl RunOutcome {
    /// A cancellation that arrived before anything was spawned.
    pub fn not_launched(reason: CancelReason) -> Self {
        Self {
            report: ExitReport::exited(0),
            cancelled: Some(reason),
            forced: false,
            duration: Duration::ZERO,
            pid: None,
        }
    }

    /// Launcher exit code: 0 for a clean exit or a graceful cancellation,
    /// otherwise derived from the child's status.
    pub fn exit_code(&self) -> i32 {
        if self.cancelled.is_some() && !self.forced {
            0
        } else {
            self.report.exit_code()
        }
    }
}

enum Wakeup {
    Exited(std::io::Result<ExitReport>),
    Cancel(Option<CancelReason>),
    GraceElapsed,
}

pub struct Runner<L: Launcher> {
    launcher: L,
    grace_period: Duration,
    child: Option<Box<dyn ChildHandle>>,
    state: ChildState,
}

impl<L: Launcher> Runner<L> {
    pub fn new(launcher: L, grace_period: Duration) -> Self {
        Self {
            launcher,
            grace_period,
            child: None,
            state: ChildState::Absent,
        }
    }

    pub fn state(&self) -> ChildState {
        self.state
    }

    pub async fn verify_runtime_available(
        &self,
        runtime: &RuntimeConfig,
    ) -> Result<(), LaunchError> {
        preflight::verify_runtime_available(&self.launcher, runtime).await
    }

    pub fn verify_script_exists(&self, path: &Path) -> Result<PathBuf, LaunchError> {
        preflight::verify_script_exists(path)
    }

    /// Run both checks in order and build the launch description.
    pub async fn preflight(&self, plan: &LaunchPlan) -> Result<LaunchSpec, LaunchError> {
        self.verify_runtime_available(&plan.runtime).await?;
        let script = self.verify_script_exists(&plan.script)?;
        Ok(LaunchSpec::companion(
            &plan.runtime.command,
            script,
            &plan.configuration.endpoint,
            &plan.configuration.target_name,
            plan.working_dir.clone(),
        ))
    }

    /// Start the child. Refuses while another child is live.
    pub fn launch(&mut self, spec: &LaunchSpec) -> Result<Option<u32>, LaunchError> {
        if let Some(child) = &self.child {
            return Err(LaunchError::AlreadyRunning { pid: child.id() });
        }

        tracing::info!(
            program = %spec.program,
            args = ?spec.args,
            cwd = %spec.working_dir.display(),
            "spawning companion process"
        );
        let child = self
            .launcher
            .spawn(spec)
            .map_err(|e| LaunchError::Spawn {
                program: spec.program.clone(),
                source: e,
            })?;

        let pid = child.id();
        tracing::info!(pid = ?pid, "companion process started");
        self.child = Some(child);
        self.state = ChildState::Running;
        Ok(pid)
    }

    /// Wait for the child to exit, honouring cancellation requests.
    ///
    /// The first request sends SIGTERM and arms the grace timer; later
    /// requests are logged and ignored. If the grace period runs out the
    /// child is killed. Returns exactly once, at most two grace periods after
    /// the first request.
    pub async fn wait(&mut self, cancel: &mut CancelReceiver) -> Result<RunOutcome, LaunchError> {
        let grace_period = self.grace_period;
        let Some(child) = self.child.as_mut() else {
            return Err(LaunchError::Wait {
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no child process has been launched",
                ),
            });
        };

        let pid = child.id();
        let start = Instant::now();
        let mut phase = ShutdownPhase::Running;
        let mut deadline: Option<Instant> = None;
        let mut cancel_open = true;
        let mut cancelled: Option<CancelReason> = None;
        let mut forced = false;
        let mut final_report: Option<ExitReport> = None;

        while final_report.is_none() {
            let timer_armed = deadline.is_some();
            let grace_deadline = deadline.unwrap_or_else(Instant::now);
            let wakeup = tokio::select! {
                result = child.wait() => Wakeup::Exited(result),
                reason = cancel.recv(), if cancel_open => Wakeup::Cancel(reason),
                _ = tokio::time::sleep_until(grace_deadline), if timer_armed => Wakeup::GraceElapsed,
            };

            let event = match wakeup {
                Wakeup::Exited(Ok(report)) => ShutdownEvent::ChildExited(report),
                Wakeup::Exited(Err(e)) => {
                    self.child = None;
                    self.state = ChildState::Absent;
                    return Err(LaunchError::Wait { source: e });
                }
                Wakeup::Cancel(Some(reason)) => {
                    if cancelled.is_none() {
                        tracing::info!(
                            %reason,
                            pid = ?pid,
                            "cancellation requested, stopping companion process"
                        );
                        cancelled = Some(reason);
                    } else {
                        tracing::info!(%reason, "shutdown already in progress");
                    }
                    ShutdownEvent::CancelRequested
                }
                Wakeup::Cancel(None) => {
                    cancel_open = false;
                    continue;
                }
                Wakeup::GraceElapsed => {
                    deadline = None;
                    ShutdownEvent::GraceElapsed
                }
            };

            let (next, actions) = step(phase, event);
            phase = next;

            for action in actions {
                match action {
                    ShutdownAction::SendTerminate => {
                        self.state = ChildState::Terminating;
                        if let Err(e) = child.terminate() {
                            tracing::warn!(error = %e, "failed to send SIGTERM to companion");
                        }
                    }
                    ShutdownAction::StartGraceTimer => {
                        let now = Instant::now();
                        deadline = Some(now.checked_add(grace_period).unwrap_or_else(|| {
                            now + Duration::from_secs(crate::config::MAX_WAIT_SECS)
                        }));
                    }
                    ShutdownAction::ForceKill => {
                        tracing::warn!(
                            grace_secs = grace_period.as_secs_f64(),
                            "companion process did not exit within grace period, killing"
                        );
                        forced = true;
                        if let Err(e) = child.force_kill() {
                            tracing::warn!(error = %e, "failed to kill companion process");
                        }
                    }
                    ShutdownAction::Report(report) => final_report = Some(report),
                }
            }
        }

        self.child = None;
        let report = final_report.unwrap_or_else(crate::shutdown::unreaped_report);
        self.state = ChildState::Exited(report);

        let outcome = RunOutcome {
            report,
            cancelled,
            forced,
            duration: start.elapsed(),
            pid,
        };
        tracing::info!(
            status = %report,
            cancelled = outcome.cancelled.is_some(),
            forced,
            duration_secs = outcome.duration.as_secs(),
            "companion process finished"
        );

        if outcome.cancelled.is_none() && !report.success() {
            return Err(LaunchError::AbnormalExit { report });
        }
        Ok(outcome)
    }

    /// Preflight, launch, and wait. Nothing is spawned unless both checks pass.
    ///
    /// A cancellation that arrives before the spawn stops the run there: no
    /// child is started and the outcome counts as a graceful stop.
    pub async fn run(
        &mut self,
        plan: &LaunchPlan,
        cancel: &mut CancelReceiver,
    ) -> Result<RunOutcome, LaunchError> {
        let spec = tokio::select! {
            spec = self.preflight(plan) => spec?,
            Some(reason) = cancel.recv() => return Ok(self.stopped_before_launch(reason)),
        };
        if let Ok(reason) = cancel.try_recv() {
            return Ok(self.stopped_before_launch(reason));
        }
        self.launch(&spec)?;
        self.wait(cancel).await
    }

    fn stopped_before_launch(&self, reason: CancelReason) -> RunOutcome {
        tracing::info!(%reason, "cancellation requested before launch, not starting companion");
        RunOutcome::not_launched(reason)
    }
}
