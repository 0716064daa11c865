//! Toolchain plumbing for jekyllex.
//!
//! Describes where the bundled Ruby/Jekyll toolchain lives, which environment
//! processes get, how argument vectors for the external tools are assembled
//! and whether the toolchain is usable at all. Nothing in this crate keeps a
//! process alive; see `jekyllex-processes` for that.

pub mod binaries;
pub mod command;
pub mod commands;
pub mod env;
pub mod layout;
pub mod settings;

pub use binaries::{BinaryResolver, BootstrapInstaller, ToolchainError};
pub use command::Command;
pub use env::{EnvError, Environment, EnvironmentBuilder};
pub use layout::Layout;
pub use settings::{CONFIG_FILE, REQUIRED_BINARIES, Settings, SettingsError};
