#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_test::{assert_err, assert_ok};

use executor::{
    ChannelHandler, CollectingHandler, ErrorKind, ExecuteOptions, ExecuteRequest,
    ExecutionStatus, Executor, OutputEvent, StreamOrigin,
};

/// Drain the channel until every sender is gone.
async fn collect_events(mut rx: UnboundedReceiver<OutputEvent>) -> Vec<OutputEvent> {
    let mut events = Vec::new();
    loop {
        match tokio::time::timeout(Duration::from_secs(10), rx.recv()).await {
            Ok(Some(event)) => events.push(event),
            Ok(None) => return events,
            Err(_) => panic!("handler was never released; got {events:?}"),
        }
    }
}

fn lines(events: &[OutputEvent], wanted: StreamOrigin) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            OutputEvent::Line { line, origin } if *origin == wanted => Some(line.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_async_streaming_with_capture() {
    let engine = Executor::new();
    let (handler, rx) = ChannelHandler::new();

    let req = ExecuteRequest::command("sh")
        .with_args(["-c", "echo one; echo two >&2; echo three"])
        .capture(true)
        .stream(true);
    let pending = assert_ok!(
        engine
            .execute(
                req,
                ExecuteOptions::new()
                    .asynchronous()
                    .with_handler(Arc::new(handler)),
            )
            .await
    );
    assert_eq!(pending.status, ExecutionStatus::Pending);

    let events = collect_events(rx).await;

    assert_eq!(lines(&events, StreamOrigin::Stdout), vec!["one", "three"]);
    assert_eq!(lines(&events, StreamOrigin::Stderr), vec!["two"]);

    // exactly one final notification, delivered last
    assert_eq!(events.iter().filter(|e| e.is_final()).count(), 1);
    match events.last() {
        Some(OutputEvent::Completed(resp)) => {
            assert_eq!(resp.id, pending.id);
            assert_eq!(resp.status, ExecutionStatus::Completed);
            assert_eq!(resp.stdout, "one\nthree\n");
            assert_eq!(resp.stderr, "two\n");
        }
        other => panic!("unexpected final event: {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_async_failure_reports_error_once() {
    let engine = Executor::new();
    let (handler, rx) = ChannelHandler::new();

    let req = ExecuteRequest::command("sh").with_args(["-c", "exit 4"]);
    assert_ok!(
        engine
            .execute(
                req,
                ExecuteOptions::new()
                    .asynchronous()
                    .with_handler(Arc::new(handler)),
            )
            .await
    );

    let events = collect_events(rx).await;
    assert_eq!(events.len(), 1);
    match &events[0] {
        OutputEvent::Failed(err) => {
            assert_eq!(err.kind(), ErrorKind::NonZeroExit);
            let snap = engine
                .get_execution(err.execution_id().unwrap())
                .unwrap()
                .snapshot();
            assert_eq!(snap.exit_code, 4);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_async_timeout_reports_error() {
    let engine = Executor::new();
    let (handler, rx) = ChannelHandler::new();

    let req = ExecuteRequest::command("sleep")
        .with_args(["10"])
        .with_timeout(Duration::from_millis(300));
    assert_ok!(
        engine
            .execute(
                req,
                ExecuteOptions::new()
                    .asynchronous()
                    .with_handler(Arc::new(handler)),
            )
            .await
    );

    let events = collect_events(rx).await;
    assert!(matches!(
        events.as_slice(),
        [OutputEvent::Failed(err)] if err.kind() == ErrorKind::ExecutionTimeout
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sync_streaming_without_final_callbacks() {
    let engine = Executor::new();
    let handler = Arc::new(CollectingHandler::new());

    let req = ExecuteRequest::command("sh")
        .with_args(["-c", "for i in 1 2 3; do echo line-$i; done"])
        .stream(true);
    let resp = assert_ok!(
        engine
            .execute(req, ExecuteOptions::new().with_handler(handler.clone()))
            .await
    );

    assert_eq!(resp.status, ExecutionStatus::Completed);
    // streamed but not captured
    assert!(resp.stdout.is_empty());
    assert_eq!(handler.stdout_lines(), vec!["line-1", "line-2", "line-3"]);
    assert_eq!(handler.notifications(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_handler_ignored_without_stream_flag() {
    let engine = Executor::new();
    let handler = Arc::new(CollectingHandler::new());

    let req = ExecuteRequest::command("echo")
        .with_args(["captured only"])
        .capture(true);
    let resp = assert_ok!(
        engine
            .execute(req, ExecuteOptions::new().with_handler(handler.clone()))
            .await
    );

    assert_eq!(resp.stdout.trim(), "captured only");
    assert!(handler.snapshot().lines.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stream_flag_without_handler() {
    let engine = Executor::new();

    let req = ExecuteRequest::command("echo").with_args(["nobody listens"]).stream(true);
    let resp = assert_ok!(engine.execute(req, ExecuteOptions::new()).await);
    assert_eq!(resp.status, ExecutionStatus::Completed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sync_stream_of_failed_run() {
    let engine = Executor::new();
    let handler = Arc::new(CollectingHandler::new());

    let req = ExecuteRequest::command("sh")
        .with_args(["-c", "echo about to fail >&2; exit 1"])
        .stream(true)
        .capture(true);
    let err = assert_err!(
        engine
            .execute(req, ExecuteOptions::new().with_handler(handler.clone()))
            .await
    );

    assert_eq!(err.kind(), ErrorKind::NonZeroExit);
    assert_eq!(handler.stderr_lines(), vec!["about to fail"]);
    assert_eq!(handler.notifications(), 0);
}
