//! One supervised OS process with its output continuously drained into a log.

use jekyllex_core::Environment;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::completion::CommandOutcome;
use crate::log_buffer::LogBuffer;

/// How long output readers may outlive the process before they are aborted.
///
/// A grandchild that inherited the pipes can keep them open after the
/// direct child is gone.
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("process input is closed")]
    StdinClosed,
    #[error("failed to write to process input: {0}")]
    Write(#[source] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Receives every complete line read from a session's output.
pub trait LineHandler: Send + Sync + 'static {
    fn handle(&self, stream: Stream, line: String, log: &LogBuffer);
}

/// Appends every line to the log unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct AppendToLog;

impl LineHandler for AppendToLog {
    fn handle(&self, _stream: Stream, line: String, log: &LogBuffer) {
        log.push(line);
    }
}

/// Everything needed to start a session's process.
#[derive(Debug, Clone)]
pub struct SessionSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Environment,
}

/// A live OS process whose stdout and stderr are read concurrently into a log.
///
/// The process runs in its own process group so that `kill` also reaches
/// whatever it spawned. Dropping a session kills it.
pub struct Session {
    pid: Option<u32>,
    program: String,
    cwd: PathBuf,
    running: Arc<AtomicBool>,
    killed: Arc<AtomicBool>,
    stdin: Mutex<Option<ChildStdin>>,
    exit: watch::Receiver<Option<CommandOutcome>>,
    log: LogBuffer,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("pid", &self.pid)
            .field("program", &self.program)
            .field("cwd", &self.cwd)
            .field("running", &self.is_running())
            .finish()
    }
}

impl Session {
    /// Start the process and its output readers. Must be called within a tokio runtime.
    pub fn spawn(
        spec: SessionSpec,
        log: LogBuffer,
        handler: Arc<dyn LineHandler>,
    ) -> Result<Self, SessionError> {
        let program = spec.program.display().to_string();
        debug!("Spawning {} {:?} in {}", program, spec.args, spec.cwd.display());

        let mut command = tokio::process::Command::new(&spec.program);
        command
            .args(&spec.args)
            .env_clear()
            .envs(spec.env.iter())
            .current_dir(&spec.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| SessionError::Spawn {
            program: program.clone(),
            source,
        })?;

        let pid = child.id();
        let stdin = child.stdin.take();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, Stream::Stdout, log.clone(), handler.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, Stream::Stderr, log.clone(), handler));
        }

        let running = Arc::new(AtomicBool::new(true));
        let killed = Arc::new(AtomicBool::new(false));
        let (exit_tx, exit) = watch::channel(None);
        tokio::spawn(wait_for_exit(
            child,
            readers,
            running.clone(),
            killed.clone(),
            exit_tx,
        ));

        Ok(Self {
            pid,
            program,
            cwd: spec.cwd,
            running,
            killed,
            stdin: Mutex::new(stdin),
            exit,
            log,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Copy of the log this session writes to.
    pub fn logs(&self) -> Vec<String> {
        self.log.snapshot()
    }

    /// Ask the process group to terminate. Safe to call any number of times.
    pub fn kill(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.killed.store(true, Ordering::SeqCst);
        if let Some(pid) = self.pid {
            signal_group(pid, Signal::SIGTERM);
        }
    }

    /// Kill the process and wait until it is gone and its output is drained.
    ///
    /// Escalates to SIGKILL when the process is still alive after `grace`.
    pub async fn terminate(&self, grace: Duration) -> CommandOutcome {
        self.kill();
        let mut exit = self.exit.clone();
        match tokio::time::timeout(grace, wait_exit(&mut exit)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    "{} (pid {:?}) still running {:?} after SIGTERM, sending SIGKILL",
                    self.program, self.pid, grace
                );
                if let Some(pid) = self.pid {
                    signal_group(pid, Signal::SIGKILL);
                }
                wait_exit(&mut exit).await
            }
        }
    }

    /// Wait for the process to exit and its output to be drained.
    pub async fn wait(&self) -> CommandOutcome {
        let mut exit = self.exit.clone();
        wait_exit(&mut exit).await
    }

    /// Like [`Session::wait`], but independent of the session's lifetime.
    pub fn exit_watcher(&self) -> impl Future<Output = CommandOutcome> + Send + 'static {
        let mut exit = self.exit.clone();
        async move { wait_exit(&mut exit).await }
    }

    /// Write one line to the process's stdin, adding the trailing newline if missing.
    pub async fn write_line(&self, line: &str) -> Result<(), SessionError> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(SessionError::StdinClosed)?;
        if let Err(e) = write_all_line(stdin, line).await {
            debug!("Write to {} failed: {}", self.program, e);
            *guard = None;
            return Err(SessionError::Write(e));
        }
        Ok(())
    }

    /// Close stdin so the process sees end of input.
    pub async fn close_stdin(&self) {
        self.stdin.lock().await.take();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.kill();
    }
}

async fn write_all_line(stdin: &mut ChildStdin, line: &str) -> io::Result<()> {
    stdin.write_all(line.as_bytes()).await?;
    if !line.ends_with('\n') {
        stdin.write_all(b"\n").await?;
    }
    stdin.flush().await
}

fn signal_group(pid: u32, sig: Signal) {
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    match signal::killpg(Pid::from_raw(raw), sig) {
        Ok(()) => debug!("Sent {} to process group {}", sig, pid),
        Err(nix::errno::Errno::ESRCH) => debug!("Process group {} already gone", pid),
        Err(e) => warn!("Failed to send {} to process group {}: {}", sig, pid, e),
    }
}

async fn wait_exit(exit: &mut watch::Receiver<Option<CommandOutcome>>) -> CommandOutcome {
    match exit.wait_for(Option::is_some).await {
        Ok(outcome) => (*outcome)
            .clone()
            .unwrap_or_else(|| CommandOutcome::Failed("no exit status".to_string())),
        Err(_) => CommandOutcome::Failed("process waiter went away".to_string()),
    }
}

fn spawn_reader<R>(
    reader: R,
    stream: Stream,
    log: LogBuffer,
    handler: Arc<dyn LineHandler>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\n', '\r']).to_string();
                    handler.handle(stream, line, &log);
                }
                Err(e) => {
                    debug!("Error reading {:?}: {}", stream, e);
                    break;
                }
            }
        }
    })
}

async fn wait_for_exit(
    mut child: Child,
    readers: Vec<JoinHandle<()>>,
    running: Arc<AtomicBool>,
    killed: Arc<AtomicBool>,
    exit_tx: watch::Sender<Option<CommandOutcome>>,
) {
    let status = child.wait().await;
    running.store(false, Ordering::SeqCst);

    for reader in readers {
        let abort = reader.abort_handle();
        if tokio::time::timeout(READER_DRAIN_TIMEOUT, reader).await.is_err() {
            debug!("Output still open {:?} after exit, abandoning", READER_DRAIN_TIMEOUT);
            abort.abort();
        }
    }

    let outcome = match status {
        Ok(_) if killed.load(Ordering::SeqCst) => CommandOutcome::Killed,
        Ok(status) => CommandOutcome::from_status(status),
        Err(e) => CommandOutcome::Failed(format!("failed to wait for process: {e}")),
    };
    debug!("Process {:?} finished: {}", child.id(), outcome);
    let _ = exit_tx.send(Some(outcome));
}
