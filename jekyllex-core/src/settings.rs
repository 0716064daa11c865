//! Runtime settings, read from `jekyllex.yaml`.
//!
//! Every key is optional; missing keys take the defaults below.
//!
//! ```yaml
//! prefix: /data/data/xyz.jekyllex
//! shell: /system/bin/sh
//! logCapacity: 10000
//! killGraceMs: 3000
//! commandTimeoutSecs: 600
//! env:
//!   LANG: C.UTF-8
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::layout::Layout;

pub const CONFIG_FILE: &str = "jekyllex.yaml";

/// Binaries the toolchain must provide before any command is run.
pub const REQUIRED_BINARIES: [&str; 4] = ["ruby", "gem", "bundler", "jekyll"];

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid settings in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct Settings {
    /// Sandbox root; `files/home` and `files/usr` live below it.
    pub prefix: PathBuf,
    /// Shell used for the persistent session.
    pub shell: PathBuf,
    /// Maximum number of lines kept in the log before the oldest are dropped.
    pub log_capacity: usize,
    /// Time a terminated process gets before it is killed with SIGKILL.
    pub kill_grace_ms: u64,
    /// Shell commands running longer than this are cancelled and the shell restarted.
    pub command_timeout_secs: Option<u64>,
    pub probe_timeout_secs: u64,
    /// Append `$ <command>` to the log for every dispatched command.
    pub echo_commands: bool,
    pub required_binaries: Vec<String>,
    /// Extra variables exported to every spawned process.
    pub env: BTreeMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            prefix: PathBuf::from("."),
            shell: PathBuf::from("/bin/sh"),
            log_capacity: 10_000,
            kill_grace_ms: 3_000,
            command_timeout_secs: None,
            probe_timeout_secs: 30,
            echo_commands: true,
            required_binaries: REQUIRED_BINARIES.iter().map(|s| s.to_string()).collect(),
            env: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Load settings from a YAML file.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let contents = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&contents).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load settings if the file exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self, SettingsError> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!("No settings at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn from_yaml(contents: &str) -> Result<Self, serde_yaml::Error> {
        // An empty document deserializes to unit, not to a mapping.
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(contents)
    }

    pub fn layout(&self) -> Layout {
        Layout::new(&self.prefix)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}
