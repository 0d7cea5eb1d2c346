//! Shutdown sequence as a pure transition function.
//!
//! The runner feeds events in and carries out the returned actions; nothing
//! here touches a process, so every path is testable on its own.

use crate::process::ExitReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    /// Child running, no cancellation seen.
    Running,
    /// SIGTERM sent, grace timer armed.
    Terminating,
    /// SIGKILL sent, waiting for the child to be reaped.
    Killing,
    /// Final status reported.
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownEvent {
    CancelRequested,
    ChildExited(ExitReport),
    GraceElapsed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownAction {
    SendTerminate,
    StartGraceTimer,
    ForceKill,
    /// Hand this status back to the caller. Emitted at most once.
    Report(ExitReport),
}

/// Status reported when a force-killed child is never reaped within the
/// second grace window.
pub fn unreaped_report() -> ExitReport {
    ExitReport::signaled(nix::sys::signal::Signal::SIGKILL)
}

/// Advance the sequence by one event.
pub fn step(phase: ShutdownPhase, event: ShutdownEvent) -> (ShutdownPhase, Vec<ShutdownAction>) {
    use ShutdownAction::*;
    use ShutdownEvent::*;
    use ShutdownPhase::*;

    match (phase, event) {
        (Done, _) => (Done, vec![]),
        (_, ChildExited(report)) => (Done, vec![Report(report)]),

        (Running, CancelRequested) => (Terminating, vec![SendTerminate, StartGraceTimer]),
        (Terminating | Killing, CancelRequested) => (phase, vec![]),

        // No timer is armed while running.
        (Running, GraceElapsed) => (Running, vec![]),
        (Terminating, GraceElapsed) => (Killing, vec![ForceKill, StartGraceTimer]),
        (Killing, GraceElapsed) => (Done, vec![Report(unreaped_report())]),
    }
}
