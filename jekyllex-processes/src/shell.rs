//! A long-lived `/bin/sh` that runs commands one after another.
//!
//! Each command is written to the shell's stdin followed by an `echo` of a
//! unique marker carrying the command id and its exit status. The marker is
//! never logged; seeing it on stdout completes the command. Because the
//! command's stderr is folded into stdout, every output line of a command is
//! in the log before its completion fires.

use jekyllex_core::{Command, Environment};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::completion::{CommandOutcome, Completion};
use crate::log_buffer::LogBuffer;
use crate::session::{LineHandler, Session, SessionError, SessionSpec, Stream};

pub(crate) struct ShellMarkers {
    prefix: String,
    pending: Mutex<HashMap<u64, oneshot::Sender<CommandOutcome>>>,
}

impl ShellMarkers {
    fn new() -> Self {
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        Self {
            prefix: format!("__JEKYLLEX_{nonce}_DONE_"),
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<CommandOutcome>>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn register(&self, id: u64) -> Completion {
        let (tx, completion) = Completion::channel();
        self.pending().insert(id, tx);
        completion
    }

    fn complete(&self, id: u64, outcome: CommandOutcome) {
        match self.pending().remove(&id) {
            Some(tx) => {
                let _ = tx.send(outcome);
            }
            None => debug!("Completion for abandoned command {}", id),
        }
    }

    fn cancel(&self, id: u64) -> bool {
        self.pending().remove(&id).is_some()
    }

    fn is_pending(&self, id: u64) -> bool {
        self.pending().contains_key(&id)
    }

    fn fail_all(&self, reason: &str) {
        for (id, tx) in self.pending().drain() {
            debug!("Failing command {}: {}", id, reason);
            let _ = tx.send(CommandOutcome::Failed(reason.to_string()));
        }
    }

    /// The line written to the shell for command `id`.
    fn script(&self, id: u64, command: &Command, cwd: &Path) -> String {
        let dir = shell_escape::escape(cwd.to_string_lossy());
        format!(
            "{{ cd {dir} && {}; }} < /dev/null 2>&1; echo '{}{id}_'$?'__'",
            command.to_shell_line(),
            self.prefix,
        )
    }

    /// Split `line` into the output preceding a marker and the marker's id and code.
    fn parse<'a>(&self, line: &'a str) -> Option<(&'a str, u64, i32)> {
        let start = line.find(&self.prefix)?;
        let rest = line[start + self.prefix.len()..].strip_suffix("__")?;
        let (id, code) = rest.split_once('_')?;
        Some((&line[..start], id.parse().ok()?, code.parse().ok()?))
    }
}

impl LineHandler for ShellMarkers {
    fn handle(&self, stream: Stream, line: String, log: &LogBuffer) {
        if stream == Stream::Stdout
            && let Some((output, id, code)) = self.parse(&line)
        {
            // Output without a trailing newline ends up in front of the marker.
            if !output.is_empty() {
                log.push(output);
            }
            self.complete(id, CommandOutcome::Exited(code));
            return;
        }
        log.push(line);
    }
}

/// The persistent shell session every non-server command runs on.
pub struct PersistentShell {
    session: Session,
    markers: Arc<ShellMarkers>,
}

impl std::fmt::Debug for PersistentShell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentShell")
            .field("session", &self.session)
            .finish()
    }
}

impl PersistentShell {
    pub fn spawn(
        shell: PathBuf,
        cwd: PathBuf,
        env: Environment,
        log: LogBuffer,
    ) -> Result<Self, SessionError> {
        let markers = Arc::new(ShellMarkers::new());
        let session = Session::spawn(
            SessionSpec {
                program: shell,
                args: Vec::new(),
                cwd,
                env,
            },
            log,
            markers.clone(),
        )?;
        info!("Started shell (pid {:?})", session.pid());

        let exit = session.exit_watcher();
        let watched = markers.clone();
        tokio::spawn(async move {
            let outcome = exit.await;
            debug!("Shell {}", outcome);
            watched.fail_all(&format!("shell {outcome}"));
        });

        Ok(Self { session, markers })
    }

    /// Queue `command` behind everything already submitted.
    pub async fn submit(
        &self,
        id: u64,
        command: &Command,
        cwd: &Path,
    ) -> Result<Completion, SessionError> {
        let completion = self.markers.register(id);
        let script = self.markers.script(id, command, cwd);
        if let Err(e) = self.session.write_line(&script).await {
            self.markers.cancel(id);
            return Err(e);
        }
        Ok(completion)
    }

    /// Forget about command `id`; its completion resolves as failed.
    pub fn cancel(&self, id: u64) -> bool {
        self.markers.cancel(id)
    }

    pub fn is_pending(&self, id: u64) -> bool {
        self.markers.is_pending(id)
    }

    pub fn is_running(&self) -> bool {
        self.session.is_running()
    }

    pub fn pid(&self) -> Option<u32> {
        self.session.pid()
    }

    /// Kill the shell and whatever it is running.
    pub async fn terminate(&self, grace: Duration) -> CommandOutcome {
        let outcome = self.session.terminate(grace).await;
        self.markers.fail_all("shell was stopped");
        outcome
    }

    /// Let the shell finish its queue and exit on end of input, killing it after `grace`.
    pub async fn close(&self, grace: Duration) -> CommandOutcome {
        self.session.close_stdin().await;
        match tokio::time::timeout(grace, self.session.wait()).await {
            Ok(outcome) => outcome,
            Err(_) => self.terminate(grace).await,
        }
    }
}
