//! Output handlers and the per-pipe pumps feeding them.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ExecutorError;
use crate::request::ExecuteResponse;

/// Receives streamed output and the final notification of an execution.
///
/// `on_output` may be called from two tasks at once (one per stream).
/// For asynchronous executions exactly one of `on_complete`/`on_error` is
/// called, after the record has been finalized.
pub trait OutputHandler: Send + Sync {
    fn on_output(&self, line: &str, is_stderr: bool);
    fn on_complete(&self, response: &ExecuteResponse);
    fn on_error(&self, error: &ExecutorError);
}

/// Which pipe a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOrigin {
    Stdout,
    Stderr,
}

impl StreamOrigin {
    pub fn is_stderr(&self) -> bool {
        matches!(self, Self::Stderr)
    }
}

/// Writes everything to the tracing log.
#[derive(Debug, Clone)]
pub struct LogHandler {
    label: String,
}

impl LogHandler {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl OutputHandler for LogHandler {
    fn on_output(&self, line: &str, is_stderr: bool) {
        if is_stderr {
            warn!(label = %self.label, "{}", line);
        } else {
            info!(label = %self.label, "{}", line);
        }
    }

    fn on_complete(&self, response: &ExecuteResponse) {
        info!(
            label = %self.label,
            execution_id = %response.id,
            exit_code = response.exit_code,
            "Execution completed"
        );
    }

    fn on_error(&self, error: &ExecutorError) {
        warn!(label = %self.label, error = %error, "Execution failed");
    }
}

/// Everything a [`CollectingHandler`] has received so far.
#[derive(Debug, Default, Clone)]
pub struct Collected {
    pub lines: Vec<(StreamOrigin, String)>,
    pub completed: Vec<ExecuteResponse>,
    pub errors: Vec<ExecutorError>,
}

/// Buffers every callback in memory.
#[derive(Debug, Default)]
pub struct CollectingHandler {
    inner: Mutex<Collected>,
}

impl CollectingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Collected {
        self.inner.lock().clone()
    }

    pub fn stdout_lines(&self) -> Vec<String> {
        self.lines_from(StreamOrigin::Stdout)
    }

    pub fn stderr_lines(&self) -> Vec<String> {
        self.lines_from(StreamOrigin::Stderr)
    }

    fn lines_from(&self, origin: StreamOrigin) -> Vec<String> {
        self.inner
            .lock()
            .lines
            .iter()
            .filter(|(o, _)| *o == origin)
            .map(|(_, line)| line.clone())
            .collect()
    }

    /// Number of final notifications received so far.
    pub fn notifications(&self) -> usize {
        let inner = self.inner.lock();
        inner.completed.len() + inner.errors.len()
    }
}

impl OutputHandler for CollectingHandler {
    fn on_output(&self, line: &str, is_stderr: bool) {
        let origin = if is_stderr {
            StreamOrigin::Stderr
        } else {
            StreamOrigin::Stdout
        };
        self.inner.lock().lines.push((origin, line.to_string()));
    }

    fn on_complete(&self, response: &ExecuteResponse) {
        self.inner.lock().completed.push(response.clone());
    }

    fn on_error(&self, error: &ExecutorError) {
        self.inner.lock().errors.push(error.clone());
    }
}

/// Event forwarded by [`ChannelHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEvent {
    Line { line: String, origin: StreamOrigin },
    Completed(ExecuteResponse),
    Failed(ExecutorError),
}

impl OutputEvent {
    pub fn is_final(&self) -> bool {
        !matches!(self, Self::Line { .. })
    }
}

/// Forwards every callback as an [`OutputEvent`] over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelHandler {
    tx: mpsc::UnboundedSender<OutputEvent>,
}

impl ChannelHandler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutputEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: OutputEvent) {
        // receiver gone: nobody is listening anymore
        let _ = self.tx.send(event);
    }
}

impl OutputHandler for ChannelHandler {
    fn on_output(&self, line: &str, is_stderr: bool) {
        let origin = if is_stderr {
            StreamOrigin::Stderr
        } else {
            StreamOrigin::Stdout
        };
        self.send(OutputEvent::Line {
            line: line.to_string(),
            origin,
        });
    }

    fn on_complete(&self, response: &ExecuteResponse) {
        self.send(OutputEvent::Completed(response.clone()));
    }

    fn on_error(&self, error: &ExecutorError) {
        self.send(OutputEvent::Failed(error.clone()));
    }
}

/// Shared capture buffer for one stream.
pub(crate) type CaptureBuffer = Arc<Mutex<String>>;

/// Destinations a pump fans each line out to. Either may be absent.
pub(crate) struct PumpSinks {
    pub capture: Option<CaptureBuffer>,
    pub handler: Option<Arc<dyn OutputHandler>>,
}

/// Read `reader` to EOF, handing every line to each sink.
///
/// One pump owns each pipe, so capture and streaming see the same bytes
/// without competing for the pipe. Captured text keeps its line endings;
/// streamed lines have them stripped.
pub(crate) fn spawn_pump<R>(reader: R, origin: StreamOrigin, sinks: PumpSinks) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::with_capacity(1024);

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let chunk = String::from_utf8_lossy(&buf);
                    if let Some(capture) = &sinks.capture {
                        capture.lock().push_str(&chunk);
                    }
                    if let Some(handler) = &sinks.handler {
                        let line = chunk.trim_end_matches(['\n', '\r']);
                        handler.on_output(line, origin.is_stderr());
                    }
                }
                Err(e) => {
                    warn!(?origin, error = %e, "Failed to read process output");
                    break;
                }
            }
        }
        debug!(?origin, "Output stream drained");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pump_fans_out_to_both_sinks() {
        let capture: CaptureBuffer = Arc::new(Mutex::new(String::new()));
        let handler = Arc::new(CollectingHandler::new());

        let input: &[u8] = b"first\r\nsecond\nlast-no-newline";
        let pump = spawn_pump(
            input,
            StreamOrigin::Stdout,
            PumpSinks {
                capture: Some(capture.clone()),
                handler: Some(handler.clone()),
            },
        );
        pump.await.unwrap();

        assert_eq!(&*capture.lock(), "first\r\nsecond\nlast-no-newline");
        assert_eq!(
            handler.stdout_lines(),
            vec!["first", "second", "last-no-newline"]
        );
        assert!(handler.stderr_lines().is_empty());
    }

    #[tokio::test]
    async fn test_pump_tags_stderr() {
        let handler = Arc::new(CollectingHandler::new());
        let input: &[u8] = b"oops\n";
        spawn_pump(
            input,
            StreamOrigin::Stderr,
            PumpSinks {
                capture: None,
                handler: Some(handler.clone()),
            },
        )
        .await
        .unwrap();

        assert_eq!(handler.stderr_lines(), vec!["oops"]);
    }

    #[tokio::test]
    async fn test_pump_replaces_invalid_utf8() {
        let capture: CaptureBuffer = Arc::new(Mutex::new(String::new()));
        let input: &[u8] = b"ok \xff\n";
        spawn_pump(
            input,
            StreamOrigin::Stdout,
            PumpSinks {
                capture: Some(capture.clone()),
                handler: None,
            },
        )
        .await
        .unwrap();

        assert_eq!(&*capture.lock(), "ok \u{fffd}\n");
    }

    #[tokio::test]
    async fn test_log_handler_accepts_every_callback() {
        let handler: Arc<dyn OutputHandler> = Arc::new(LogHandler::new("unit"));
        spawn_pump(
            &b"to the log\n"[..],
            StreamOrigin::Stderr,
            PumpSinks {
                capture: None,
                handler: Some(handler.clone()),
            },
        )
        .await
        .unwrap();

        handler.on_error(&ExecutorError::ExecutionCanceled { id: "x".into() });
    }

    #[test]
    fn test_channel_handler_forwards_events() {
        let (handler, mut rx) = ChannelHandler::new();
        handler.on_output("hello", false);
        handler.on_error(&ExecutorError::ExecutionCanceled { id: "x".into() });

        let first = rx.try_recv().unwrap();
        assert_eq!(
            first,
            OutputEvent::Line {
                line: "hello".to_string(),
                origin: StreamOrigin::Stdout
            }
        );
        assert!(!first.is_final());
        assert!(rx.try_recv().unwrap().is_final());
    }
}
