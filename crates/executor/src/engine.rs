use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ExecutorConfig;
use crate::error::{ExecutorError, Result};
use crate::lifecycle::CancelOutcome;
use crate::output::OutputHandler;
use crate::record::{ExecutionRecord, Outcome};
use crate::registry::ExecutionRegistry;
use crate::request::{ExecuteKind, ExecuteRequest, ExecuteResponse};
use crate::resolver::{self, Platform};
use crate::runner::{self, RunContext};
use crate::validator;

/// Per-call options for [`Executor::execute`].
#[derive(Clone, Default)]
pub struct ExecuteOptions {
    /// Cancellation scope; canceling it cancels the execution
    pub cancel: Option<CancellationToken>,
    /// Deadline that wins over the request timeout when it is earlier
    pub deadline: Option<Instant>,
    pub handler: Option<Arc<dyn OutputHandler>>,
    /// Return the pending record immediately and run in the background
    pub async_mode: bool,
}

impl ExecuteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn asynchronous(mut self) -> Self {
        self.async_mode = true;
        self
    }

    pub fn with_handler(mut self, handler: Arc<dyn OutputHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

impl std::fmt::Debug for ExecuteOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecuteOptions")
            .field("cancel", &self.cancel.is_some())
            .field("deadline", &self.deadline)
            .field("handler", &self.handler.is_some())
            .field("async_mode", &self.async_mode)
            .finish()
    }
}

struct Inner {
    config: ExecutorConfig,
    platform: Platform,
    registry: ExecutionRegistry,
    /// Woken whenever an execution reaches a terminal status
    finished: Notify,
    closed: AtomicBool,
}

/// Command execution engine.
///
/// Cheap to clone; clones share the same registry. Independent engines can
/// live side by side in one process.
#[derive(Clone)]
pub struct Executor {
    inner: Arc<Inner>,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor {
    pub fn new() -> Self {
        Self::with_config(ExecutorConfig::default())
    }

    pub fn with_config(config: ExecutorConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                platform: Platform::current(),
                registry: ExecutionRegistry::new(),
                finished: Notify::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &ExecutionRegistry {
        &self.inner.registry
    }

    /// Validate `request` in place, normalizing its timeout.
    pub fn validate(&self, request: &mut ExecuteRequest) -> Result<()> {
        validator::validate(request, self.inner.config.default_timeout())
    }

    /// Submit a request.
    ///
    /// Synchronous submissions resolve once the execution is terminal: `Ok`
    /// when it completed, otherwise the error recorded on it. Asynchronous
    /// submissions return the pending snapshot right away and report the
    /// outcome through the handler's `on_complete`/`on_error`.
    pub async fn execute(
        &self,
        mut request: ExecuteRequest,
        options: ExecuteOptions,
    ) -> Result<ExecuteResponse> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(ExecutorError::ShuttingDown);
        }
        self.validate(&mut request)?;

        let invocation = resolver::resolve(&request, self.inner.platform);
        let timeout = request.effective_timeout();
        let record = self.inner.registry.create(request, options.cancel.as_ref());

        info!(
            execution_id = %record.id(),
            kind = %record.request().kind,
            command = %record.request().command,
            async_mode = options.async_mode,
            timeout_ms = timeout.as_millis() as u64,
            "Execution submitted"
        );

        let ctx = RunContext {
            record: record.clone(),
            invocation,
            handler: options.handler.clone(),
            timeout,
            deadline: options.deadline,
            kill_wait: self.inner.config.kill_wait(),
        };

        if options.async_mode {
            let pending = record.snapshot();
            let inner = self.inner.clone();
            let handler = options.handler;

            tokio::spawn(async move {
                let result = drive(ctx).await;
                inner.finished.notify_waiters();

                if let Some(handler) = handler {
                    match &result {
                        Ok(response) => handler.on_complete(response),
                        Err(err) => handler.on_error(err),
                    }
                }
            });

            return Ok(pending);
        }

        let result = drive(ctx).await;
        self.inner.finished.notify_waiters();
        result
    }

    /// Run `command` with captured output and the default timeout.
    pub async fn execute_command<I, S>(
        &self,
        command: &str,
        args: I,
        options: ExecuteOptions,
    ) -> Result<ExecuteResponse>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.execute(self.convenience(ExecuteKind::Command, command, args), options)
            .await
    }

    /// Run a script through the platform interpreter, output captured.
    pub async fn execute_batch<I, S>(
        &self,
        script: &str,
        args: I,
        options: ExecuteOptions,
    ) -> Result<ExecuteResponse>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.execute(self.convenience(ExecuteKind::Batch, script, args), options)
            .await
    }

    fn convenience<I, S>(&self, kind: ExecuteKind, command: &str, args: I) -> ExecuteRequest
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ExecuteRequest::new(kind, command)
            .with_args(args)
            .with_timeout(self.inner.config.default_timeout())
            .capture(true)
    }

    pub fn get_execution(&self, id: &str) -> Result<Arc<ExecutionRecord>> {
        self.inner.registry.get(id)
    }

    pub fn list_executions(&self) -> Vec<Arc<ExecutionRecord>> {
        self.inner.registry.list()
    }

    /// Cancel an execution. Canceling a finished execution is a no-op.
    pub fn cancel_execution(&self, id: &str) -> Result<()> {
        if self.inner.registry.cancel(id)? == CancelOutcome::Canceled {
            self.inner.finished.notify_waiters();
        }
        Ok(())
    }

    /// Evict a finished execution from the registry.
    pub fn remove_execution(&self, id: &str) -> Result<Arc<ExecutionRecord>> {
        self.inner.registry.remove(id)
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Stop accepting submissions, wait up to `grace` for running executions
    /// and cancel whatever is still active afterwards.
    ///
    /// Returns the number of executions that had to be canceled.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        self.inner.closed.store(true, Ordering::Release);
        let deadline = Instant::now() + grace;

        loop {
            let notified = self.inner.finished.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let active = self.inner.registry.active_count();
            if active == 0 {
                info!("Executor drained");
                return 0;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                break;
            }
        }

        let canceled = self.inner.registry.cancel_all();
        if canceled > 0 {
            warn!(canceled, "Canceled executions still running at shutdown");
        }
        self.inner.finished.notify_waiters();
        canceled
    }
}

/// Run the runner in a task of its own. Dropping the caller's future or a
/// panic inside the runner still leaves the record terminal.
async fn drive(ctx: RunContext) -> Result<ExecuteResponse> {
    let record = ctx.record.clone();
    match tokio::spawn(runner::run(ctx)).await {
        Ok(result) => result,
        Err(join_err) => {
            warn!(execution_id = %record.id(), error = %join_err, "Runner task failed");
            record.finish(Outcome::WaitFailed(format!("runner task failed: {join_err}")))
        }
    }
}
