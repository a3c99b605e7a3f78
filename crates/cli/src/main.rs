use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use common::{init_structured_logging, LoggingConfig, OperationTimer};
use executor::{
    ExecuteOptions, ExecuteRequest, ExecuteResponse, Executor, ExecutorConfig, Invocation,
    LogHandler, Platform,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

mod terminal;
use terminal::{print_rejection, print_response, TerminalHandler};

#[derive(Parser)]
#[command(name = "cmdexec")]
#[command(about = "Run commands and batch scripts under a managed executor")]
#[command(version)]
struct Cli {
    /// JSON engine config; defaults come from CMDEXEC_* variables otherwise
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print the final response as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct RunOpts {
    /// Kill the process after this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Working directory for the process
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Extra environment variable, KEY=VALUE (repeatable)
    #[arg(long = "env", value_parser = parse_env_pair)]
    env: Vec<(String, String)>,

    /// Print output line by line while the process runs
    #[arg(long)]
    stream: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program directly
    Run {
        program: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
        #[command(flatten)]
        opts: RunOpts,
    },
    /// Run a batch or shell script through the platform interpreter
    Batch {
        script: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
        #[command(flatten)]
        opts: RunOpts,
    },
    /// Run a whole command line through `sh -c` (or `cmd /C`)
    Shell {
        line: String,
        #[command(flatten)]
        opts: RunOpts,
    },
    /// Submit a JSON-encoded request read from a file, `-` for stdin
    Request { file: PathBuf },
}

fn parse_env_pair(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

impl RunOpts {
    fn apply(self, mut req: ExecuteRequest) -> ExecuteRequest {
        if let Some(secs) = self.timeout_secs {
            req = req.with_timeout(Duration::from_secs(secs));
        }
        if let Some(dir) = self.cwd {
            req = req.with_work_dir(dir);
        }
        for (key, value) in self.env {
            req = req.with_env(key, value);
        }
        // capture is always on so --json has something to report
        req.capture(true).stream(self.stream)
    }
}

fn build_request(command: Commands) -> Result<ExecuteRequest> {
    let req = match command {
        Commands::Run {
            program,
            args,
            opts,
        } => opts.apply(ExecuteRequest::command(program).with_args(args)),
        Commands::Batch { script, args, opts } => {
            opts.apply(ExecuteRequest::batch(script).with_args(args))
        }
        Commands::Shell { line, opts } => {
            let invocation = Invocation::shell_line(Platform::current(), line);
            opts.apply(ExecuteRequest::command(invocation.program).with_args(invocation.args))
        }
        Commands::Request { file } => {
            let raw = if file.as_os_str() == "-" {
                std::io::read_to_string(std::io::stdin()).context("reading request from stdin")?
            } else {
                std::fs::read_to_string(&file)
                    .with_context(|| format!("reading request {}", file.display()))?
            };
            ExecuteRequest::from_json(&raw)?
        }
    };
    Ok(req)
}

fn load_config(path: Option<&PathBuf>) -> Result<ExecutorConfig> {
    match path {
        Some(path) => Ok(ExecutorConfig::from_file(path)?),
        None => Ok(ExecutorConfig::from_env()),
    }
}

fn exit_code_for(resp: &ExecuteResponse) -> ExitCode {
    match resp.exit_code {
        0 if resp.is_success() => ExitCode::SUCCESS,
        code @ 1..=255 => ExitCode::from(code as u8),
        _ => ExitCode::FAILURE,
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_structured_logging(LoggingConfig::from_env())?;

    let engine = Executor::with_config(load_config(cli.config.as_ref())?);
    let request = build_request(cli.command)?;
    let streamed = request.stream_output;

    let interrupt = CancellationToken::new();
    let on_ctrl_c = interrupt.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, canceling execution");
            on_ctrl_c.cancel();
        }
    });

    let mut options = ExecuteOptions::new().with_cancel(interrupt);
    if streamed {
        // stdout carries the JSON document, so lines go to the log instead
        options = if cli.json {
            options.with_handler(Arc::new(LogHandler::new("cmdexec")))
        } else {
            options.with_handler(Arc::new(TerminalHandler))
        };
    }

    let mut timer = OperationTimer::new("cmdexec.execute");
    timer.add_field("command", &request.command);
    timer.add_field("kind", request.kind.as_str());

    let result = engine.execute(request, options).await;
    timer.finish_with_result(&result);

    let resp = match result {
        Ok(resp) => resp,
        Err(err) => match err.execution_id() {
            Some(id) => engine.get_execution(id)?.snapshot(),
            None => {
                print_rejection(&err, cli.json);
                return Ok(ExitCode::FAILURE);
            }
        },
    };
    debug!(execution_id = %resp.id, status = %resp.status, "Execution reported");

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&resp)?);
    } else {
        print_response(&resp, streamed);
    }

    Ok(exit_code_for(&resp))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_pair() {
        assert_eq!(
            parse_env_pair("A=b=c").unwrap(),
            ("A".to_string(), "b=c".to_string())
        );
        assert_eq!(parse_env_pair("EMPTY=").unwrap().1, "");
        assert!(parse_env_pair("novalue").is_err());
        assert!(parse_env_pair("=x").is_err());
    }

    #[test]
    fn test_shell_subcommand_builds_interpreter_call() {
        let cli = Cli::try_parse_from(["cmdexec", "shell", "echo hi | wc -c", "--timeout-secs", "5"])
            .unwrap();
        let req = build_request(cli.command).unwrap();

        let (program, _) = executor::shell_command(Platform::current());
        assert_eq!(req.command, program);
        assert_eq!(req.args.last().map(String::as_str), Some("echo hi | wc -c"));
        assert_eq!(req.timeout, Some(Duration::from_secs(5)));
        assert!(req.capture_output);
    }

    #[test]
    fn test_run_keeps_hyphenated_args() {
        let cli = Cli::try_parse_from(["cmdexec", "--json", "run", "ls", "-la", "/tmp"]).unwrap();
        assert!(cli.json);
        let req = build_request(cli.command).unwrap();
        assert_eq!(req.command, "ls");
        assert_eq!(req.args, vec!["-la", "/tmp"]);
    }
}
