use nix::sys::signal::{self as nix_signal, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Turns SIGINT/SIGTERM/SIGHUP into a cancellation; a second signal exits immediately.
#[derive(Debug)]
pub struct Shutdown {
    token: CancellationToken,
    last_signal: AtomicI32,
}

impl Shutdown {
    /// Cancel `token` on the first signal.
    pub fn new(token: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            token,
            last_signal: AtomicI32::new(0),
        })
    }

    pub fn install_signals(self: &Arc<Self>) -> io::Result<()> {
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sighup = signal(SignalKind::hangup())?;
        let shutdown = Arc::clone(self);

        tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    _ = sigint.recv() => Signal::SIGINT,
                    _ = sigterm.recv() => Signal::SIGTERM,
                    _ = sighup.recv() => Signal::SIGHUP,
                };

                if shutdown.last_signal().is_some() {
                    info!("Received second signal, forcing exit...");
                    shutdown.exit_process();
                }

                info!("Received {:?}, shutting down gracefully...", received);
                shutdown
                    .last_signal
                    .store(received as i32, Ordering::Relaxed);
                shutdown.token.cancel();
            }
        });
        Ok(())
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn last_signal(&self) -> Option<Signal> {
        match self.last_signal.load(Ordering::Relaxed) {
            0 => None,
            i => Signal::try_from(i).ok(),
        }
    }

    /// Re-raise the last signal with its default disposition so the exit status reflects it.
    pub fn exit_process(&self) -> ! {
        let signal = self.last_signal().unwrap_or(Signal::SIGTERM);
        let action = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
        // SAFETY: installs the default disposition, no handler code is involved.
        if unsafe { nix_signal::sigaction(signal, &action) }.is_ok() {
            let _ = nix_signal::kill(unistd::getpid(), signal);
        }
        std::process::exit(128 + signal as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_signal_recorded_initially() {
        let shutdown = Shutdown::new(CancellationToken::new());
        assert!(shutdown.last_signal().is_none());
        assert!(!shutdown.is_cancelled());
    }

    #[test]
    fn shares_the_given_token() {
        let token = CancellationToken::new();
        let shutdown = Shutdown::new(token.clone());
        token.cancel();
        assert!(shutdown.is_cancelled());
    }
}
