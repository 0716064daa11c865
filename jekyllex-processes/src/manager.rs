use jekyllex_core::{Command, EnvError, EnvironmentBuilder, Layout, Settings};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::sync::{Mutex, broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::completion::{CommandOutcome, Completion};
use crate::log_buffer::{LogBuffer, LogEvent};
use crate::server_state::{ServerEvent, ServerState};
use crate::session::{AppendToLog, Session, SessionError, SessionSpec};
use crate::shell::PersistentShell;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("cannot run an empty command")]
    EmptyCommand,
    #[error("process manager is stopped")]
    Stopped,
    #[error(transparent)]
    Env(#[from] EnvError),
    #[error(transparent)]
    Session(#[from] SessionError),
}

struct ServerSlot {
    generation: u64,
    session: Session,
}

struct Inner {
    settings: Settings,
    env: EnvironmentBuilder,
    log: LogBuffer,
    shell: Mutex<Option<PersistentShell>>,
    server: Mutex<Option<ServerSlot>>,
    state: watch::Sender<ServerState>,
    next_id: AtomicU64,
    stop: CancellationToken,
}

/// Runs every command of the editor: one persistent shell for ordinary
/// commands and at most one Jekyll preview server, all writing into one log.
///
/// Cloning yields another handle to the same manager. The processes are
/// stopped by [`ProcessManager::stop`], by cancelling [`ProcessManager::stop_token`]
/// or when the last handle is dropped.
#[derive(Clone)]
pub struct ProcessManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ProcessManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessManager")
            .field("prefix", &self.inner.settings.prefix)
            .field("server", &*self.inner.state.borrow())
            .finish()
    }
}

impl ProcessManager {
    /// Start the persistent shell in `HOME_DIR`. Must be called within a tokio runtime.
    pub fn start(settings: Settings) -> Result<Self, ManagerError> {
        let env = EnvironmentBuilder::new(settings.layout()).with_extra(settings.env.clone());
        let log = LogBuffer::new(settings.log_capacity);
        let shell = spawn_shell(&settings, &env, &log)?;
        let inner = Arc::new(Inner {
            env,
            log,
            shell: Mutex::new(Some(shell)),
            server: Mutex::new(None),
            state: watch::channel(ServerState::new()).0,
            next_id: AtomicU64::new(1),
            stop: CancellationToken::new(),
            settings,
        });

        let weak = Arc::downgrade(&inner);
        let token = inner.stop.clone();
        tokio::spawn(async move {
            token.cancelled().await;
            if let Some(inner) = weak.upgrade() {
                inner.shutdown().await;
            }
        });

        info!("Process manager started in {}", inner.env.layout().prefix().display());
        Ok(Self { inner })
    }

    /// Dispatch `command`: Jekyll `serve` replaces the preview server,
    /// everything else is queued on the persistent shell.
    ///
    /// The returned completion resolves once every output line of a shell
    /// command is in the log, or when the server process exits.
    pub async fn exec(&self, command: Command) -> Result<Completion, ManagerError> {
        if self.inner.stop.is_cancelled() {
            return Err(ManagerError::Stopped);
        }
        if command.is_empty() {
            return Err(ManagerError::EmptyCommand);
        }
        let echo = self
            .inner
            .settings
            .echo_commands
            .then(|| format!("$ {command}"));

        if command.is_server() {
            self.inner.start_server(command, echo).await
        } else {
            self.inner.run_in_shell(command, echo).await
        }
    }

    /// Stop the preview server. Returns false when no server was running.
    pub async fn kill_process(&self) -> bool {
        self.inner.kill_server().await
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.borrow().is_running()
    }

    pub fn server_state(&self) -> ServerState {
        self.inner.state.borrow().clone()
    }

    pub fn watch_server_state(&self) -> watch::Receiver<ServerState> {
        self.inner.state.subscribe()
    }

    pub fn logs(&self) -> Vec<String> {
        self.inner.log.snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.inner.log.subscribe()
    }

    pub fn append_log(&self, line: impl Into<String>) {
        self.inner.log.push(line);
    }

    pub fn clear_logs(&self) {
        self.inner.log.clear();
    }

    pub fn layout(&self) -> &Layout {
        self.inner.env.layout()
    }

    /// Cancelling this token stops the manager like [`ProcessManager::stop`].
    pub fn stop_token(&self) -> CancellationToken {
        self.inner.stop.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stop.is_cancelled()
    }

    /// Terminate the server and the shell. Pending commands resolve as failed.
    pub async fn stop(&self) {
        self.inner.shutdown().await;
    }
}

impl Inner {
    fn grace(&self) -> std::time::Duration {
        self.settings.kill_grace()
    }

    fn working_dir(&self, command: &Command) -> PathBuf {
        command
            .cwd()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.env.layout().home_dir())
    }

    fn transition(&self, event: ServerEvent) {
        let mut result = Ok(());
        self.state.send_modify(|state| result = state.on_event(event));
        if let Err(e) = result {
            warn!("{}", e);
        }
    }

    async fn submit_locked(
        &self,
        slot: &mut Option<PersistentShell>,
        id: u64,
        command: &Command,
        cwd: &Path,
    ) -> Result<Completion, ManagerError> {
        if self.stop.is_cancelled() {
            return Err(ManagerError::Stopped);
        }
        let needs_spawn = slot.as_ref().is_none_or(|shell| !shell.is_running());
        if needs_spawn {
            if let Some(old) = slot.take() {
                debug!("Shell (pid {:?}) is gone, starting a new one", old.pid());
                old.terminate(self.grace()).await;
            }
            match spawn_shell(&self.settings, &self.env, &self.log) {
                Ok(shell) => *slot = Some(shell),
                Err(e) => {
                    self.log.push(format!(
                        "Failed to start shell {}: {e}",
                        self.settings.shell.display()
                    ));
                    return Err(e);
                }
            }
        }
        let shell = slot.as_ref().ok_or(ManagerError::Stopped)?;
        Ok(shell.submit(id, command, cwd).await?)
    }

    async fn run_in_shell(
        self: &Arc<Self>,
        command: Command,
        echo: Option<String>,
    ) -> Result<Completion, ManagerError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let cwd = self.working_dir(&command);

        let completion = {
            let mut slot = self.shell.lock().await;
            // Echo lines follow the order in which commands reach the shell.
            if let Some(echo) = echo {
                self.log.push(echo);
            }
            match self.submit_locked(&mut slot, id, &command, &cwd).await {
                Ok(completion) => completion,
                Err(ManagerError::Session(e)) if !matches!(e, SessionError::Spawn { .. }) => {
                    // The shell died between the liveness check and the write.
                    debug!("Retrying `{}` on a fresh shell: {}", command, e);
                    if let Some(old) = slot.take() {
                        old.terminate(self.grace()).await;
                    }
                    self.submit_locked(&mut slot, id, &command, &cwd).await?
                }
                Err(e) => return Err(e),
            }
        };

        let Some(timeout) = self.settings.command_timeout() else {
            return Ok(completion);
        };

        let (tx, guarded) = Completion::channel();
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let outcome = match tokio::time::timeout(timeout, completion).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    abandon_shell_command(weak, id, timeout).await;
                    CommandOutcome::TimedOut
                }
            };
            let _ = tx.send(outcome);
        });
        Ok(guarded)
    }

    async fn start_server(
        self: &Arc<Self>,
        command: Command,
        echo: Option<String>,
    ) -> Result<Completion, ManagerError> {
        let mut slot = self.server.lock().await;
        if self.stop.is_cancelled() {
            return Err(ManagerError::Stopped);
        }
        if let Some(echo) = echo {
            self.log.push(echo);
        }

        if let Some(old) = slot.take() {
            info!(
                "Stopping server (pid {:?}) in {}",
                old.session.pid(),
                old.session.cwd().display()
            );
            old.session.terminate(self.grace()).await;
            self.transition(ServerEvent::Killed);
        }

        self.transition(ServerEvent::Start);
        let generation = self.state.borrow().generation();
        let cwd = self.working_dir(&command);

        let spawned = self
            .env
            .build(&cwd)
            .map_err(ManagerError::from)
            .and_then(|env| {
                let program = self
                    .env
                    .layout()
                    .resolve_program(command.program().unwrap_or_default());
                let spec = SessionSpec {
                    program,
                    args: command.args().to_vec(),
                    cwd: cwd.clone(),
                    env,
                };
                Ok(Session::spawn(spec, self.log.clone(), Arc::new(AppendToLog))?)
            });

        let session = match spawned {
            Ok(session) => session,
            Err(e) => {
                self.log.push(format!("Failed to start {command}: {e}"));
                self.transition(ServerEvent::SpawnFailed(e.to_string()));
                return Err(e);
            }
        };

        info!("Server started (pid {:?}) in {}", session.pid(), cwd.display());
        self.transition(ServerEvent::Spawned {
            pid: session.pid(),
            cwd,
        });

        let (tx, completion) = Completion::channel();
        let exit = session.exit_watcher();
        *slot = Some(ServerSlot {
            generation,
            session,
        });

        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let outcome = exit.await;
            if let Some(inner) = weak.upgrade() {
                inner.server_exited(generation, &outcome).await;
            }
            let _ = tx.send(outcome);
        });

        Ok(completion)
    }

    async fn server_exited(&self, generation: u64, outcome: &CommandOutcome) {
        let mut slot = self.server.lock().await;
        // Killed or replaced servers were already accounted for by whoever stopped them.
        if slot.as_ref().is_some_and(|s| s.generation == generation) {
            info!("Server {}", outcome);
            slot.take();
            self.transition(ServerEvent::Exited(outcome.clone()));
        }
    }

    async fn kill_server(&self) -> bool {
        let mut slot = self.server.lock().await;
        let Some(server) = slot.take() else {
            debug!("No server to kill");
            return false;
        };
        info!("Killing server (pid {:?})", server.session.pid());
        server.session.terminate(self.grace()).await;
        self.transition(ServerEvent::Killed);
        true
    }

    async fn shutdown(&self) {
        self.stop.cancel();

        if self.kill_server().await {
            debug!("Server stopped on shutdown");
        }
        let shell = self.shell.lock().await.take();
        if let Some(shell) = shell {
            shell.close(self.grace()).await;
            info!("Process manager stopped");
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

fn spawn_shell(
    settings: &Settings,
    env: &EnvironmentBuilder,
    log: &LogBuffer,
) -> Result<PersistentShell, ManagerError> {
    let home = env.layout().home_dir();
    let vars = env.build(&home)?;
    Ok(PersistentShell::spawn(
        settings.shell.clone(),
        home,
        vars,
        log.clone(),
    )?)
}

async fn abandon_shell_command(inner: Weak<Inner>, id: u64, timeout: std::time::Duration) {
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let mut slot = inner.shell.lock().await;
    let Some(shell) = slot.as_ref() else {
        return;
    };
    if !shell.cancel(id) {
        return;
    }
    warn!("Command {} timed out after {:?}, restarting shell", id, timeout);
    inner
        .log
        .push(format!("Command timed out after {}s", timeout.as_secs()));
    if let Some(shell) = slot.take() {
        shell.terminate(inner.grace()).await;
    }
}
