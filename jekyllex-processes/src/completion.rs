use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::process::ExitStatus;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// How a dispatched command ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Exited on its own with this code.
    Exited(i32),
    /// Terminated by a signal nobody in this process sent.
    Signaled(i32),
    /// Stopped through `kill`/`terminate`.
    Killed,
    /// Cancelled after running longer than the configured timeout.
    TimedOut,
    /// Never ran to completion, e.g. the shell went away underneath it.
    Failed(String),
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        matches!(self, CommandOutcome::Exited(0))
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            CommandOutcome::Exited(code) => Some(*code),
            _ => None,
        }
    }

    pub(crate) fn from_status(status: ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;

        if let Some(code) = status.code() {
            CommandOutcome::Exited(code)
        } else if let Some(signal) = status.signal() {
            CommandOutcome::Signaled(signal)
        } else {
            CommandOutcome::Failed(format!("unrecognized exit status: {status}"))
        }
    }
}

impl fmt::Display for CommandOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandOutcome::Exited(code) => write!(f, "exited with code {code}"),
            CommandOutcome::Signaled(signal) => write!(f, "terminated by signal {signal}"),
            CommandOutcome::Killed => f.write_str("killed"),
            CommandOutcome::TimedOut => f.write_str("timed out"),
            CommandOutcome::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Resolves once a dispatched command has finished.
///
/// For shell commands this happens after the last output line of the command
/// is in the log; for the server it happens when the process exits.
#[derive(Debug)]
pub struct Completion {
    rx: oneshot::Receiver<CommandOutcome>,
}

impl Completion {
    pub(crate) fn new(rx: oneshot::Receiver<CommandOutcome>) -> Self {
        Self { rx }
    }

    pub(crate) fn channel() -> (oneshot::Sender<CommandOutcome>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self::new(rx))
    }

    pub async fn wait(self) -> CommandOutcome {
        self.await
    }
}

impl Future for Completion {
    type Output = CommandOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|result| {
            result.unwrap_or_else(|_| {
                CommandOutcome::Failed("command was dropped before it finished".to_string())
            })
        })
    }
}
