use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ExecutorError, Result};

/// Timeout applied when a request does not carry a usable one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Exit code reported until the process exit status is known.
pub const EXIT_CODE_UNKNOWN: i32 = -1;

/// What the `command` field of a request refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecuteKind {
    /// An executable name or path, run with `args` as-is
    Command,
    /// A script file, run through the platform interpreter
    Batch,
}

impl ExecuteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Batch => "batch",
        }
    }
}

impl fmt::Display for ExecuteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecuteKind {
    type Err = ExecutorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "command" => Ok(Self::Command),
            "batch" => Ok(Self::Batch),
            other => Err(ExecutorError::invalid(format!(
                "invalid command type: {other}"
            ))),
        }
    }
}

/// Intent to run one command or script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    #[serde(rename = "type")]
    pub kind: ExecuteKind,
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<PathBuf>,
    /// Merged over the inherited environment, overriding same-named entries
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    #[serde(
        default,
        rename = "timeout_ms",
        with = "duration_ms_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub capture_output: bool,
    #[serde(default)]
    pub stream_output: bool,
}

impl ExecuteRequest {
    pub fn new(kind: ExecuteKind, command: impl Into<String>) -> Self {
        Self {
            kind,
            command: command.into(),
            args: Vec::new(),
            work_dir: None,
            env: HashMap::new(),
            timeout: None,
            capture_output: false,
            stream_output: false,
        }
    }

    pub fn command(command: impl Into<String>) -> Self {
        Self::new(ExecuteKind::Command, command)
    }

    pub fn batch(script: impl Into<String>) -> Self {
        Self::new(ExecuteKind::Batch, script)
    }

    /// Parse a request from JSON. Unknown kinds and `null` are invalid requests.
    pub fn from_json(json: &str) -> Result<Self> {
        let value: Option<Self> = serde_json::from_str(json)
            .map_err(|e| ExecutorError::invalid(e.to_string()))?;
        value.ok_or_else(|| ExecutorError::invalid("request cannot be null"))
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn capture(mut self, enable: bool) -> Self {
        self.capture_output = enable;
        self
    }

    pub fn stream(mut self, enable: bool) -> Self {
        self.stream_output = enable;
        self
    }

    /// Timeout after validation; falls back to [`DEFAULT_TIMEOUT`] if unset.
    pub fn effective_timeout(&self) -> Duration {
        self.timeout
            .filter(|t| !t.is_zero())
            .unwrap_or(DEFAULT_TIMEOUT)
    }
}

/// Lifecycle state of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    /// Forward-only transitions: `pending -> running -> terminal`.
    /// A pending execution may also fail or be canceled before it spawns.
    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        match (self, next) {
            (Self::Pending, Self::Running) => true,
            (Self::Pending, Self::Failed | Self::Canceled) => true,
            (Self::Running, n) => n.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of an execution's outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteResponse {
    pub id: String,
    pub status: ExecutionStatus,
    pub exit_code: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stdout: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stderr: String,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(rename = "duration_ms", with = "duration_ms")]
    pub duration: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl ExecuteResponse {
    pub(crate) fn pending(id: String) -> Self {
        Self {
            id,
            status: ExecutionStatus::Pending,
            exit_code: EXIT_CODE_UNKNOWN,
            stdout: String::new(),
            stderr: String::new(),
            start_time: Utc::now(),
            end_time: None,
            duration: Duration::ZERO,
            pid: None,
            error: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

mod duration_ms_opt {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        // Negative values are treated like an absent timeout
        let raw: Option<i64> = Option::deserialize(d)?;
        Ok(raw
            .filter(|ms| *ms > 0)
            .map(|ms| Duration::from_millis(ms as u64)))
    }
}
