//! Command and batch-script execution engine.
//!
//! Runs external programs as tracked executions: synchronous or background
//! submission, per-line output streaming, output capture, cancellation and
//! deadline enforcement.
//!
//! ```no_run
//! use executor::{ExecuteOptions, Executor};
//!
//! # async fn demo() -> executor::Result<()> {
//! let engine = Executor::new();
//! let resp = engine
//!     .execute_command("echo", ["hello world"], ExecuteOptions::new())
//!     .await?;
//! assert!(resp.stdout.contains("hello world"));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod output;
pub mod record;
pub mod registry;
pub mod request;
pub mod resolver;
mod runner;
pub mod validator;

pub use config::ExecutorConfig;
pub use engine::{ExecuteOptions, Executor};
pub use error::{ErrorKind, ExecutorError, Result};
pub use lifecycle::CancelOutcome;
pub use output::{
    ChannelHandler, Collected, CollectingHandler, LogHandler, OutputEvent, OutputHandler,
    StreamOrigin,
};
pub use record::ExecutionRecord;
pub use registry::ExecutionRegistry;
pub use request::{
    ExecuteKind, ExecuteRequest, ExecuteResponse, ExecutionStatus, DEFAULT_TIMEOUT,
    EXIT_CODE_UNKNOWN,
};
pub use resolver::{resolve, shell_command, Invocation, Platform};
