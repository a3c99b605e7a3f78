//! Terminal rendering for execution results.

use console::style;
use executor::{ExecuteResponse, ExecutionStatus, ExecutorError, OutputHandler};
use std::io::Write;

/// Streams child output straight to the terminal as it arrives.
pub struct TerminalHandler;

impl OutputHandler for TerminalHandler {
    fn on_output(&self, line: &str, is_stderr: bool) {
        if is_stderr {
            eprintln!("{}", style(line).red());
        } else {
            println!("{line}");
            let _ = std::io::stdout().flush();
        }
    }

    // synchronous runs report through the returned result instead
    fn on_complete(&self, _response: &ExecuteResponse) {}

    fn on_error(&self, _error: &ExecutorError) {}
}

fn status_label(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Completed => style("completed").green().bold().to_string(),
        ExecutionStatus::Failed => style("failed").red().bold().to_string(),
        ExecutionStatus::Canceled => style("canceled").yellow().bold().to_string(),
        other => style(other.as_str()).dim().to_string(),
    }
}

/// Human-readable summary; captured output is echoed unless it was
/// already streamed.
pub fn print_response(resp: &ExecuteResponse, streamed: bool) {
    if !streamed {
        print!("{}", resp.stdout);
        eprint!("{}", resp.stderr);
    }

    let mut summary = format!(
        "{} {} in {}ms",
        style(&resp.id).dim(),
        status_label(resp.status),
        resp.duration.as_millis()
    );
    if resp.exit_code >= 0 {
        summary.push_str(&format!(" (exit {})", resp.exit_code));
    }
    eprintln!("{summary}");

    if !resp.error.is_empty() {
        eprintln!("{} {}", style("error:").red().bold(), resp.error);
    }
}

/// Reported when no record exists for the failure, e.g. a rejected request.
pub fn print_rejection(err: &ExecutorError, json: bool) {
    if json {
        let body = serde_json::json!({
            "error": err.to_string(),
            "kind": format!("{:?}", err.kind()),
        });
        println!("{body}");
    } else {
        eprintln!("{} {}", style("rejected:").red().bold(), err);
    }
}
