//! Drives one execution record through spawn, wait and finalization.

use parking_lot::Mutex;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::output::{spawn_pump, CaptureBuffer, OutputHandler, PumpSinks, StreamOrigin};
use crate::record::{ExecutionRecord, Outcome};
use crate::request::ExecuteResponse;
use crate::resolver::Invocation;

/// Everything the runner needs for one execution.
pub(crate) struct RunContext {
    pub record: Arc<ExecutionRecord>,
    pub invocation: Invocation,
    /// Receives streamed lines when the request asks for streaming
    pub handler: Option<Arc<dyn OutputHandler>>,
    pub timeout: Duration,
    /// Caller deadline; the earlier of this and `timeout` wins
    pub deadline: Option<Instant>,
    /// How long to wait for a killed child to be reaped
    pub kill_wait: Duration,
}

pub(crate) async fn run(ctx: RunContext) -> Result<ExecuteResponse> {
    let record = ctx.record.clone();
    let id = record.id().to_string();
    let req = record.request();

    if !record.mark_running() {
        debug!(execution_id = %id, "Execution canceled before start");
        return record.result();
    }

    let capture = req.capture_output;
    let stream_to = if req.stream_output {
        ctx.handler.clone()
    } else {
        None
    };
    let piped = capture || stream_to.is_some();

    let mut command = Command::new(&ctx.invocation.program);
    command
        .args(&ctx.invocation.args)
        .envs(&req.env)
        .stdin(Stdio::null())
        .stdout(if piped { Stdio::piped() } else { Stdio::null() })
        .stderr(if piped { Stdio::piped() } else { Stdio::null() })
        .kill_on_drop(true);
    if let Some(dir) = &req.work_dir {
        command.current_dir(dir);
    }

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            warn!(
                execution_id = %id,
                command = %ctx.invocation.display(),
                error = %e,
                "Failed to spawn process"
            );
            return record.finish(Outcome::SpawnFailed(e.to_string()));
        }
    };

    let spawned_at = Instant::now();
    let armed = arm(spawned_at, ctx.timeout);
    let deadline = ctx.deadline.map_or(armed, |d| d.min(armed));

    record.attach_pid(child.id());
    info!(
        execution_id = %id,
        pid = ?child.id(),
        command = %ctx.invocation.display(),
        "Process spawned"
    );

    let stdout_buf: Option<CaptureBuffer> = capture.then(CaptureBuffer::default);
    let stderr_buf: Option<CaptureBuffer> = capture.then(CaptureBuffer::default);

    let mut pumps = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        pumps.push(spawn_pump(
            stdout,
            StreamOrigin::Stdout,
            PumpSinks {
                capture: stdout_buf.clone(),
                handler: stream_to.clone(),
            },
        ));
    }
    if let Some(stderr) = child.stderr.take() {
        pumps.push(spawn_pump(
            stderr,
            StreamOrigin::Stderr,
            PumpSinks {
                capture: stderr_buf.clone(),
                handler: stream_to,
            },
        ));
    }

    let token = record.cancellation_token().clone();
    let outcome = tokio::select! {
        status = child.wait() => match status {
            Ok(status) => Outcome::Exited(status.code()),
            Err(e) => Outcome::WaitFailed(e.to_string()),
        },
        _ = token.cancelled() => Outcome::Canceled,
        _ = tokio::time::sleep_until(deadline) => {
            let allowed = deadline.saturating_duration_since(spawned_at);
            warn!(execution_id = %id, timeout_ms = allowed.as_millis() as u64, "Execution timed out");
            Outcome::TimedOut(allowed)
        }
    };

    match outcome {
        Outcome::Exited(code) => {
            record.mark_exited(code);
            // grandchildren may hold the pipes open past the deadline; a
            // cancel from here on only stops waiting for them
            let until = deadline.max(Instant::now() + ctx.kill_wait);
            tokio::select! {
                _ = drain(&mut pumps, until) => {}
                _ = token.cancelled() => {
                    debug!(execution_id = %id, "Output drain cut short by cancel");
                }
            }
            abort(&pumps);
            collect_output(&record, stdout_buf, stderr_buf);
            record.finish(outcome)
        }
        _ => {
            // end_time is stamped when the decision is made, not after the kill
            let _ = record.finish(outcome);
            kill(&mut child, &id, ctx.kill_wait).await;
            settle(&record, pumps, stdout_buf, stderr_buf, ctx.kill_wait).await
        }
    }
}

/// Deadline `timeout` after `from`; a timeout too large to represent never
/// fires.
fn arm(from: Instant, timeout: Duration) -> Instant {
    from.checked_add(timeout).unwrap_or(from + FAR_FUTURE)
}

/// Roughly thirty years.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Drain what a killed process left in the pipes, attach it to the already
/// finalized record and return the record's result.
async fn settle(
    record: &ExecutionRecord,
    mut pumps: Vec<JoinHandle<()>>,
    stdout_buf: Option<CaptureBuffer>,
    stderr_buf: Option<CaptureBuffer>,
    kill_wait: Duration,
) -> Result<ExecuteResponse> {
    drain(&mut pumps, Instant::now() + kill_wait).await;
    abort(&pumps);
    collect_output(record, stdout_buf, stderr_buf);
    record.result()
}

fn collect_output(
    record: &ExecutionRecord,
    stdout_buf: Option<CaptureBuffer>,
    stderr_buf: Option<CaptureBuffer>,
) {
    if let (Some(out), Some(err)) = (stdout_buf, stderr_buf) {
        record.attach_output(take(&out), take(&err));
    }
}

/// Hard kill; no grace period is given to the child.
async fn kill(child: &mut Child, id: &str, wait: Duration) {
    if let Err(e) = child.start_kill() {
        debug!(execution_id = %id, error = %e, "Process already gone");
    }

    match tokio::time::timeout(wait, child.wait()).await {
        Ok(Ok(status)) => debug!(execution_id = %id, ?status, "Killed process reaped"),
        Ok(Err(e)) => warn!(execution_id = %id, error = %e, "Failed to reap killed process"),
        Err(_) => warn!(execution_id = %id, "Killed process did not exit in time"),
    }
}

/// Wait for the pumps to reach EOF, giving up at `until`.
async fn drain(pumps: &mut [JoinHandle<()>], until: Instant) {
    for pump in pumps.iter_mut() {
        if tokio::time::timeout_at(until, pump).await.is_err() {
            debug!("Output reader still open at drain deadline");
            return;
        }
    }
}

/// Abandon readers that have not finished; finished ones are unaffected.
fn abort(pumps: &[JoinHandle<()>]) {
    for pump in pumps {
        pump.abort();
    }
}

fn take(buf: &Mutex<String>) -> String {
    std::mem::take(&mut *buf.lock())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arm_saturates_huge_timeouts() {
        let now = Instant::now();
        assert_eq!(arm(now, Duration::from_secs(5)), now + Duration::from_secs(5));
        assert_eq!(arm(now, Duration::MAX), now + FAR_FUTURE);
    }

    #[tokio::test]
    async fn test_abort_leaves_finished_pumps_alone() {
        let done = tokio::spawn(async {});
        let stuck = tokio::spawn(std::future::pending::<()>());
        let mut pumps = vec![done, stuck];

        let until = Instant::now() + Duration::from_millis(50);
        drain(&mut pumps, until).await;
        abort(&pumps);

        let stuck = pumps.pop().unwrap();
        assert!(stuck.await.unwrap_err().is_cancelled());
        assert!(pumps.pop().unwrap().await.is_ok());
    }
}
