use std::collections::HashSet;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::env::EnvironmentBuilder;
use crate::layout::Layout;

#[derive(Debug, Error)]
pub enum ToolchainError {
    #[error("bootstrap installation failed: {0}")]
    Install(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("toolchain is incomplete, unusable binaries: {}", missing.join(", "))]
    Unusable { missing: Vec<String> },
}

/// One-shot materialization of the toolchain into `USR_DIR`.
///
/// Implemented outside this crate (unpacking the bootstrap and creating its
/// symlinks); the resolver only decides when it has to run.
pub trait BootstrapInstaller {
    fn install(&self, layout: &Layout) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Checks whether toolchain binaries exist in `BIN_DIR` and actually run.
///
/// Positive results are cached; call [`BinaryResolver::invalidate`] after the
/// toolchain changed.
#[derive(Debug)]
pub struct BinaryResolver {
    env: EnvironmentBuilder,
    probe_timeout: Duration,
    usable: Mutex<HashSet<String>>,
}

impl BinaryResolver {
    pub fn new(env: EnvironmentBuilder, probe_timeout: Duration) -> Self {
        Self {
            env,
            probe_timeout,
            usable: Mutex::new(HashSet::new()),
        }
    }

    pub fn layout(&self) -> &Layout {
        self.env.layout()
    }

    fn cached(&self, name: &str) -> bool {
        self.usable
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(name)
    }

    pub fn invalidate(&self) {
        self.usable
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// True iff `BIN_DIR/<name>` exists and `<name> --version` exits successfully.
    pub async fn is_usable(&self, name: &str) -> bool {
        if self.cached(name) {
            return true;
        }

        let path = self.layout().binary(name);
        if !path.exists() {
            debug!("{} not found at {}", name, path.display());
            return false;
        }

        let home = self.layout().home_dir();
        let env = match self.env.build(&home) {
            Ok(env) => env,
            Err(e) => {
                debug!("Cannot probe {}: {}", name, e);
                return false;
            }
        };

        let mut probe = tokio::process::Command::new(&path);
        probe
            .arg("--version")
            .env_clear()
            .envs(env.iter())
            .current_dir(&home)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        match tokio::time::timeout(self.probe_timeout, probe.status()).await {
            Ok(Ok(status)) if status.success() => {
                self.usable
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(name.to_string());
                true
            }
            Ok(Ok(status)) => {
                debug!("{} --version exited with {}", name, status);
                false
            }
            Ok(Err(e)) => {
                debug!("Failed to run {} --version: {}", name, e);
                false
            }
            Err(_) => {
                debug!(
                    "{} --version did not finish within {:?}",
                    name, self.probe_timeout
                );
                false
            }
        }
    }

    /// True iff every binary is usable. Stops at the first unusable one.
    pub async fn are_usable<S: AsRef<str>>(&self, names: &[S]) -> bool {
        for name in names {
            if !self.is_usable(name.as_ref()).await {
                return false;
            }
        }
        true
    }

    /// The subset of `names` that is not usable, in input order.
    pub async fn missing<S: AsRef<str>>(&self, names: &[S]) -> Vec<String> {
        let mut missing = Vec::new();
        for name in names {
            if !self.is_usable(name.as_ref()).await {
                missing.push(name.as_ref().to_string());
            }
        }
        missing
    }

    /// Run the installer once if any of `names` is unusable, then check again.
    pub async fn ensure_toolchain<S: AsRef<str>>(
        &self,
        installer: &dyn BootstrapInstaller,
        names: &[S],
    ) -> Result<(), ToolchainError> {
        if self.are_usable(names).await {
            return Ok(());
        }

        info!("Toolchain incomplete, installing bootstrap");
        installer
            .install(self.layout())
            .map_err(ToolchainError::Install)?;
        self.invalidate();

        let missing = self.missing(names).await;
        if missing.is_empty() {
            Ok(())
        } else {
            warn!("Toolchain still unusable after install: {:?}", missing);
            Err(ToolchainError::Unusable { missing })
        }
    }
}
