//! Shared test utilities for jekyllex-processes integration tests.

// Each test file compiles separately, so not all helpers are used in each binary
#![allow(dead_code)]

use jekyllex_core::{Layout, Settings};
use jekyllex_processes::ProcessManager;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::fs;

pub const TEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Stand-in for `jekyll`: `serve` prints its working directory and keeps running.
pub const JEKYLL_SERVE_STUB: &str = r#"#!/bin/sh
echo "serving from $(pwd)"
while true; do sleep 1; done
"#;

/// Test context with its own toolchain prefix.
pub struct TestContext {
    pub temp_dir: TempDir,
    pub settings: Settings,
}

impl TestContext {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let settings = Settings {
            prefix: temp_dir.path().to_path_buf(),
            kill_grace_ms: 500,
            echo_commands: false,
            ..Settings::default()
        };
        let ctx = Self { temp_dir, settings };
        std::fs::create_dir_all(ctx.layout().bin_dir()).expect("Failed to create bin dir");
        ctx
    }

    pub fn layout(&self) -> Layout {
        self.settings.layout()
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Create a site directory below the temp directory
    pub fn create_site(&self, name: &str) -> PathBuf {
        let path = self.temp_dir.path().join("sites").join(name);
        std::fs::create_dir_all(&path).expect("Failed to create site dir");
        path
    }

    /// Create an executable in the toolchain's bin directory
    pub async fn create_binary(&self, name: &str, content: &str) -> PathBuf {
        let path = self.layout().binary(name);
        fs::write(&path, content)
            .await
            .expect("Failed to write script");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
                .await
                .expect("Failed to set permissions");
        }
        path
    }

    pub fn create_manager(&self) -> ProcessManager {
        ProcessManager::start(self.settings.clone()).expect("Failed to start manager")
    }
}

/// Poll `check` with exponential backoff until it holds or `timeout` passes.
pub async fn wait_for_condition<F, Fut>(mut check: F, timeout: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    let mut delay = Duration::from_millis(10);
    let max_delay = Duration::from_millis(500);

    while Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(max_delay);
    }
    false
}

/// Wait until the manager's log holds a line equal to `line`.
pub async fn wait_for_log_line(manager: &ProcessManager, line: &str, timeout: Duration) -> bool {
    wait_for_condition(
        || async { manager.logs().iter().any(|l| l == line) },
        timeout,
    )
    .await
}

/// Whether a process with this pid still exists.
pub fn process_exists(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), None).is_ok()
}
