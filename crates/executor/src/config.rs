use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{ExecutorError, Result};
use crate::request::DEFAULT_TIMEOUT;

/// Engine-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Timeout for requests that do not set one
    pub default_timeout_ms: u64,
    /// How long to wait for a killed child before giving up on reaping it
    pub kill_wait_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64,
            kill_wait_ms: 2_000,
        }
    }
}

impl ExecutorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `CMDEXEC_DEFAULT_TIMEOUT_MS` (1s..24h) and
    /// `CMDEXEC_KILL_WAIT_MS` (10ms..60s).
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(timeout) = common::env::duration_ms(
            "DEFAULT_TIMEOUT_MS",
            Duration::from_secs(1),
            Duration::from_secs(24 * 60 * 60),
        ) {
            cfg.default_timeout_ms = timeout.as_millis() as u64;
        }

        if let Some(wait) = common::env::duration_ms(
            "KILL_WAIT_MS",
            Duration::from_millis(10),
            Duration::from_secs(60),
        ) {
            cfg.kill_wait_ms = wait.as_millis() as u64;
        }

        cfg
    }

    /// Load a JSON config file; missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ExecutorError::FileNotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => {
                ExecutorError::PermissionDenied(path.to_path_buf())
            }
            _ => ExecutorError::invalid(format!("{}: {e}", path.display())),
        })?;
        serde_json::from_str(&data)
            .map_err(|e| ExecutorError::invalid(format!("{}: {e}", path.display())))
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_kill_wait(mut self, wait: Duration) -> Self {
        self.kill_wait_ms = wait.as_millis() as u64;
        self
    }

    pub fn default_timeout(&self) -> Duration {
        match self.default_timeout_ms {
            0 => DEFAULT_TIMEOUT,
            ms => Duration::from_millis(ms),
        }
    }

    pub fn kill_wait(&self) -> Duration {
        Duration::from_millis(self.kill_wait_ms)
    }
}
