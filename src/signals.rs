/// Signal handling for graceful shutdown.
///
/// SIGINT (Ctrl-C), SIGTERM and SIGHUP are each turned into a
/// [`CancelReason`] and forwarded over a channel. The child lives in its own
/// process group, so a closing terminal only reaches the launcher; SIGHUP
/// has to stop the child the same way Ctrl-C does. Every delivery is forwarded; deduplication is
/// the runner's job.
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    Interrupt,
    Terminate,
    Hangup,
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CancelReason::Interrupt => write!(f, "SIGINT"),
            CancelReason::Terminate => write!(f, "SIGTERM"),
            CancelReason::Hangup => write!(f, "SIGHUP"),
        }
    }
}

pub type CancelReceiver = mpsc::UnboundedReceiver<CancelReason>;

pub struct SignalHandler {
    task: tokio::task::JoinHandle<()>,
}

impl SignalHandler {
    /// Register the handlers and start forwarding.
    ///
    /// Must be called inside a tokio runtime. Once installed, SIGINT no
    /// longer kills the launcher outright.
    pub fn install() -> std::io::Result<(SignalHandler, CancelReceiver)> {
        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;
        let mut hangup = signal(SignalKind::hangup())?;
        let (tx, rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            loop {
                let reason = tokio::select! {
                    Some(()) = interrupt.recv() => CancelReason::Interrupt,
                    Some(()) = terminate.recv() => CancelReason::Terminate,
                    Some(()) = hangup.recv() => CancelReason::Hangup,
                    else => break,
                };
                tracing::debug!(%reason, "signal received");
                if tx.send(reason).is_err() {
                    break;
                }
            }
        });

        Ok((SignalHandler { task }, rx))
    }
}

impl Drop for SignalHandler {
    fn drop(&mut self) {
        self.task.abort();
    }
}
