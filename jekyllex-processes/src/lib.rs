//! Process supervision for jekyllex.
//!
//! A [`ProcessManager`] owns two kinds of processes: one persistent shell that
//! runs ordinary commands in order, and at most one Jekyll preview server.
//! The output of both is drained into a bounded, observable [`LogBuffer`].

pub mod completion;
pub mod log_buffer;
pub mod manager;
pub mod server_state;
pub mod session;
pub mod shell;

pub use completion::{CommandOutcome, Completion};
pub use log_buffer::{LogBuffer, LogEvent};
pub use manager::{ManagerError, ProcessManager};
pub use server_state::{ServerEvent, ServerInfo, ServerPhase, ServerState, TransitionError};
pub use session::{AppendToLog, LineHandler, Session, SessionError, SessionSpec, Stream};
pub use shell::PersistentShell;
