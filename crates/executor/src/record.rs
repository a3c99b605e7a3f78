use chrono::Utc;
use parking_lot::{Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{ExecutorError, Result};
use crate::request::{ExecuteRequest, ExecuteResponse, ExecutionStatus, EXIT_CODE_UNKNOWN};

/// How a run ended, as observed by whoever finalizes the record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// Process exited; `None` when it was terminated by a signal
    Exited(Option<i32>),
    SpawnFailed(String),
    WaitFailed(String),
    TimedOut(Duration),
    Canceled,
}

/// Mutable part of a record, guarded by the per-record lock.
pub(crate) struct RecordState {
    pub(crate) response: ExecuteResponse,
    failure: Option<ExecutorError>,
    /// The child exited on its own; only output draining is left
    exited: bool,
}

impl RecordState {
    /// Whether a cancel may still decide the outcome.
    pub(crate) fn is_cancelable(&self) -> bool {
        !self.response.status.is_terminal() && !self.exited
    }

    /// Apply a terminal outcome. Returns `false` and leaves the state alone
    /// when the record already reached a terminal status.
    pub(crate) fn finalize(&mut self, outcome: Outcome) -> bool {
        let id = self.response.id.clone();
        let (status, exit_code, failure) = match outcome {
            Outcome::Exited(Some(0)) => (ExecutionStatus::Completed, 0, None),
            Outcome::Exited(Some(code)) => (
                ExecutionStatus::Failed,
                code,
                Some(ExecutorError::NonZeroExit { id, code }),
            ),
            Outcome::Exited(None) => (
                ExecutionStatus::Failed,
                EXIT_CODE_UNKNOWN,
                Some(ExecutorError::Execution {
                    id,
                    message: "process terminated by signal".to_string(),
                }),
            ),
            Outcome::SpawnFailed(message) => (
                ExecutionStatus::Failed,
                EXIT_CODE_UNKNOWN,
                Some(ExecutorError::SpawnFailure { id, message }),
            ),
            Outcome::WaitFailed(message) => (
                ExecutionStatus::Failed,
                EXIT_CODE_UNKNOWN,
                Some(ExecutorError::Execution { id, message }),
            ),
            Outcome::TimedOut(timeout) => (
                ExecutionStatus::Canceled,
                EXIT_CODE_UNKNOWN,
                Some(ExecutorError::ExecutionTimeout { id, timeout }),
            ),
            Outcome::Canceled => (
                ExecutionStatus::Canceled,
                EXIT_CODE_UNKNOWN,
                Some(ExecutorError::ExecutionCanceled { id }),
            ),
        };

        if !self.response.status.can_transition_to(status) {
            debug!(
                execution_id = %self.response.id,
                current = %self.response.status,
                ignored = %status,
                "Execution already finalized"
            );
            return false;
        }

        let now = Utc::now();
        let resp = &mut self.response;
        resp.status = status;
        resp.exit_code = exit_code;
        resp.error = failure.as_ref().map(ToString::to_string).unwrap_or_default();
        resp.end_time = Some(now);
        resp.duration = (now - resp.start_time).to_std().unwrap_or_default();
        self.failure = failure;

        info!(
            execution_id = %resp.id,
            status = %resp.status,
            exit_code = resp.exit_code,
            duration_ms = resp.duration.as_millis() as u64,
            "Execution finished"
        );
        true
    }

    /// `Ok` for a completed run, otherwise the error recorded on it.
    pub(crate) fn result(&self) -> Result<ExecuteResponse> {
        match (&self.response.status, &self.failure) {
            (ExecutionStatus::Completed, _) => Ok(self.response.clone()),
            (_, Some(err)) => Err(err.clone()),
            (status, None) => Err(ExecutorError::Execution {
                id: self.response.id.clone(),
                message: format!("execution is still {status}"),
            }),
        }
    }
}

/// Engine-owned state of one submitted run.
///
/// Every status change goes through the single lock in `state`, so the
/// runner and the lifecycle controller can never both finalize a record.
pub struct ExecutionRecord {
    id: String,
    request: ExecuteRequest,
    cancel: CancellationToken,
    state: Mutex<RecordState>,
}

impl ExecutionRecord {
    pub(crate) fn new(id: String, request: ExecuteRequest, cancel: CancellationToken) -> Self {
        let response = ExecuteResponse::pending(id.clone());
        Self {
            id,
            request,
            cancel,
            state: Mutex::new(RecordState {
                response,
                failure: None,
                exited: false,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn request(&self) -> &ExecuteRequest {
        &self.request
    }

    /// Copy of the current response.
    pub fn snapshot(&self) -> ExecuteResponse {
        self.state.lock().response.clone()
    }

    pub fn status(&self) -> ExecutionStatus {
        self.state.lock().response.status
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// Terminal result: `Ok` for completed runs, the recorded error otherwise.
    pub fn result(&self) -> Result<ExecuteResponse> {
        self.state.lock().result()
    }

    pub(crate) fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, RecordState> {
        self.state.lock()
    }

    /// `pending -> running`. Fails if the record was canceled before start.
    pub(crate) fn mark_running(&self) -> bool {
        let mut state = self.state.lock();
        if !state.response.status.can_transition_to(ExecutionStatus::Running) {
            return false;
        }
        state.response.status = ExecutionStatus::Running;
        true
    }

    /// The child exited by itself. Its status is final from here on even
    /// though output may still be draining.
    pub(crate) fn mark_exited(&self, code: Option<i32>) {
        let mut state = self.state.lock();
        if state.response.status == ExecutionStatus::Running {
            state.exited = true;
            if let Some(code) = code {
                state.response.exit_code = code;
            }
        }
    }

    pub(crate) fn attach_pid(&self, pid: Option<u32>) {
        self.state.lock().response.pid = pid;
    }

    pub(crate) fn attach_output(&self, stdout: String, stderr: String) {
        let mut state = self.state.lock();
        state.response.stdout = stdout;
        state.response.stderr = stderr;
    }

    /// Finalize with `outcome` unless already terminal; returns the record's
    /// actual terminal result either way.
    pub(crate) fn finish(&self, outcome: Outcome) -> Result<ExecuteResponse> {
        let mut state = self.state.lock();
        state.finalize(outcome);
        state.result()
    }
}

impl std::fmt::Debug for ExecutionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionRecord")
            .field("id", &self.id)
            .field("kind", &self.request.kind)
            .field("command", &self.request.command)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn record() -> ExecutionRecord {
        ExecutionRecord::new(
            "exec_1_1".to_string(),
            ExecuteRequest::command("true"),
            CancellationToken::new(),
        )
    }

    #[test]
    fn test_completed_run() {
        let rec = record();
        assert!(rec.mark_running());

        let resp = rec.finish(Outcome::Exited(Some(0))).unwrap();
        assert_eq!(resp.status, ExecutionStatus::Completed);
        assert_eq!(resp.exit_code, 0);
        assert!(resp.error.is_empty());

        let end = resp.end_time.unwrap();
        assert_eq!(resp.duration, (end - resp.start_time).to_std().unwrap());
    }

    #[test]
    fn test_non_zero_exit_fails() {
        let rec = record();
        rec.mark_running();

        let err = rec.finish(Outcome::Exited(Some(2))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NonZeroExit);

        let snap = rec.snapshot();
        assert_eq!(snap.status, ExecutionStatus::Failed);
        assert_eq!(snap.exit_code, 2);
        assert!(!snap.error.is_empty());
    }

    #[test]
    fn test_terminal_state_is_never_rewritten() {
        let rec = record();
        rec.mark_running();
        rec.finish(Outcome::Canceled).unwrap_err();
        let first = rec.snapshot();

        let err = rec.finish(Outcome::Exited(Some(0))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExecutionCanceled);

        let second = rec.snapshot();
        assert_eq!(second.status, ExecutionStatus::Canceled);
        assert_eq!(second.end_time, first.end_time);
        assert!(!rec.mark_running());
    }

    #[test]
    fn test_timeout_is_canceled_with_timeout_error() {
        let rec = record();
        rec.mark_running();

        let err = rec
            .finish(Outcome::TimedOut(Duration::from_secs(1)))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExecutionTimeout);
        assert_eq!(rec.status(), ExecutionStatus::Canceled);
        assert_eq!(rec.snapshot().exit_code, EXIT_CODE_UNKNOWN);
    }

    #[test]
    fn test_exited_record_is_no_longer_cancelable() {
        let rec = record();
        rec.mark_running();
        assert!(rec.lock_state().is_cancelable());

        rec.mark_exited(Some(0));
        assert!(!rec.lock_state().is_cancelable());
        assert_eq!(rec.status(), ExecutionStatus::Running);
        assert_eq!(rec.snapshot().exit_code, 0);
    }

    #[test]
    fn test_output_attached_after_finalize() {
        let rec = record();
        rec.mark_running();
        rec.finish(Outcome::TimedOut(Duration::from_secs(1)))
            .unwrap_err();
        let end = rec.snapshot().end_time;

        rec.attach_output("partial\n".to_string(), String::new());
        let snap = rec.snapshot();
        assert_eq!(snap.stdout, "partial\n");
        assert_eq!(snap.end_time, end);
        assert_eq!(snap.status, ExecutionStatus::Canceled);
    }

    #[test]
    fn test_pending_result_is_error() {
        let rec = record();
        assert_eq!(rec.result().unwrap_err().kind(), ErrorKind::Execution);
    }
}
