use std::path::PathBuf;
use thiserror::Error;

use crate::completion::CommandOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerPhase {
    /// No server process.
    Idle,
    /// A start was requested and the process is being spawned.
    Starting,
    /// The server process is alive.
    Running,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    Start,
    Spawned { pid: Option<u32>, cwd: PathBuf },
    SpawnFailed(String),
    /// The process ended on its own.
    Exited(CommandOutcome),
    /// The process was stopped by `kill_process`, a replacement or shutdown.
    Killed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub pid: Option<u32>,
    pub cwd: PathBuf,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid server transition: {event:?} while {phase:?}")]
pub struct TransitionError {
    pub phase: ServerPhase,
    pub event: ServerEvent,
}

/// Pure state machine for the single preview server slot.
///
/// No I/O, no handles. The manager feeds it what happened to the server
/// process and publishes the result to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerState {
    phase: ServerPhase,
    generation: u64,
    current: Option<ServerInfo>,
    last_exit: Option<CommandOutcome>,
    last_error: Option<String>,
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerState {
    pub fn new() -> Self {
        Self {
            phase: ServerPhase::Idle,
            generation: 0,
            current: None,
            last_exit: None,
            last_error: None,
        }
    }

    pub fn phase(&self) -> ServerPhase {
        self.phase
    }

    /// Incremented on every start; tells a stale exit apart from the current server's.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn current(&self) -> Option<&ServerInfo> {
        self.current.as_ref()
    }

    pub fn last_exit(&self) -> Option<&CommandOutcome> {
        self.last_exit.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.phase, ServerPhase::Starting | ServerPhase::Running)
    }

    pub fn on_event(&mut self, event: ServerEvent) -> Result<(), TransitionError> {
        match (self.phase, event) {
            (ServerPhase::Idle, ServerEvent::Start) => {
                self.generation += 1;
                self.last_error = None;
                self.phase = ServerPhase::Starting;
            }
            (ServerPhase::Starting, ServerEvent::Spawned { pid, cwd }) => {
                self.current = Some(ServerInfo { pid, cwd });
                self.phase = ServerPhase::Running;
            }
            (ServerPhase::Starting, ServerEvent::SpawnFailed(reason)) => {
                self.last_error = Some(reason);
                self.phase = ServerPhase::Idle;
            }
            (ServerPhase::Running, ServerEvent::Exited(outcome)) => {
                self.current = None;
                self.last_exit = Some(outcome);
                self.phase = ServerPhase::Idle;
            }
            (ServerPhase::Running, ServerEvent::Killed) => {
                self.current = None;
                self.last_exit = Some(CommandOutcome::Killed);
                self.phase = ServerPhase::Idle;
            }
            (phase, event) => return Err(TransitionError { phase, event }),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running(cwd: &str) -> ServerState {
        let mut state = ServerState::new();
        state.on_event(ServerEvent::Start).unwrap();
        state
            .on_event(ServerEvent::Spawned {
                pid: Some(42),
                cwd: PathBuf::from(cwd),
            })
            .unwrap();
        state
    }

    #[test]
    fn starts_idle() {
        let state = ServerState::new();
        assert_eq!(state.phase(), ServerPhase::Idle);
        assert_eq!(state.generation(), 0);
        assert!(!state.is_running());
        assert!(state.current().is_none());
    }

    #[test]
    fn start_then_spawned_is_running() {
        let state = running("/site");
        assert_eq!(state.phase(), ServerPhase::Running);
        assert_eq!(state.generation(), 1);
        assert!(state.is_running());
        assert_eq!(
            state.current(),
            Some(&ServerInfo {
                pid: Some(42),
                cwd: PathBuf::from("/site"),
            })
        );
    }

    #[test]
    fn starting_counts_as_running() {
        let mut state = ServerState::new();
        state.on_event(ServerEvent::Start).unwrap();
        assert_eq!(state.phase(), ServerPhase::Starting);
        assert!(state.is_running());
    }

    #[test]
    fn spawn_failure_returns_to_idle() {
        let mut state = ServerState::new();
        state.on_event(ServerEvent::Start).unwrap();
        state
            .on_event(ServerEvent::SpawnFailed("no such file".into()))
            .unwrap();
        assert_eq!(state.phase(), ServerPhase::Idle);
        assert_eq!(state.last_error(), Some("no such file"));
        assert!(state.last_exit().is_none());
    }

    #[test]
    fn exit_records_outcome() {
        let mut state = running("/site");
        state
            .on_event(ServerEvent::Exited(CommandOutcome::Exited(1)))
            .unwrap();
        assert_eq!(state.phase(), ServerPhase::Idle);
        assert!(state.current().is_none());
        assert_eq!(state.last_exit(), Some(&CommandOutcome::Exited(1)));
    }

    #[test]
    fn kill_records_killed() {
        let mut state = running("/site");
        state.on_event(ServerEvent::Killed).unwrap();
        assert_eq!(state.phase(), ServerPhase::Idle);
        assert_eq!(state.last_exit(), Some(&CommandOutcome::Killed));
    }

    #[test]
    fn restart_bumps_generation() {
        let mut state = running("/a");
        state.on_event(ServerEvent::Killed).unwrap();
        state.on_event(ServerEvent::Start).unwrap();
        state
            .on_event(ServerEvent::Spawned {
                pid: Some(43),
                cwd: PathBuf::from("/b"),
            })
            .unwrap();
        assert_eq!(state.generation(), 2);
        assert_eq!(state.current().map(|s| s.cwd.clone()), Some(PathBuf::from("/b")));
    }

    #[test]
    fn kill_while_idle_is_rejected() {
        let mut state = ServerState::new();
        let err = state.on_event(ServerEvent::Killed).unwrap_err();
        assert_eq!(err.phase, ServerPhase::Idle);
        assert_eq!(state, ServerState::new());
    }

    #[test]
    fn double_start_is_rejected() {
        let mut state = running("/site");
        assert!(state.on_event(ServerEvent::Start).is_err());
        assert_eq!(state.phase(), ServerPhase::Running);
        assert_eq!(state.generation(), 1);
    }

    #[test]
    fn exit_while_starting_is_rejected() {
        let mut state = ServerState::new();
        state.on_event(ServerEvent::Start).unwrap();
        assert!(
            state
                .on_event(ServerEvent::Exited(CommandOutcome::Exited(0)))
                .is_err()
        );
        assert_eq!(state.phase(), ServerPhase::Starting);
    }
}
