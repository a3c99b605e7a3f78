//! Maps a request onto a concrete program and argument vector.
//!
//! Nothing in here touches the filesystem or spawns processes, so every
//! platform's dispatch can be unit tested from any host.

use std::path::Path;

use crate::request::{ExecuteKind, ExecuteRequest};

/// Host platform family, as far as script dispatch is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    Linux,
    MacOs,
    /// Any other POSIX-like target
    Unix,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else if cfg!(target_os = "macos") {
            Self::MacOs
        } else if cfg!(target_os = "linux") {
            Self::Linux
        } else {
            Self::Unix
        }
    }

    pub fn is_windows(&self) -> bool {
        matches!(self, Self::Windows)
    }
}

/// A fully resolved program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Run a whole command line through the platform interpreter.
    pub fn shell_line(platform: Platform, line: impl Into<String>) -> Self {
        let (program, mut args) = shell_command(platform);
        args.push(line.into());
        Self::new(program, args)
    }

    /// `program arg1 arg2`, for logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Interpreter and "run this string" flag for `platform`.
pub fn shell_command(platform: Platform) -> (&'static str, Vec<String>) {
    if platform.is_windows() {
        ("cmd", vec!["/C".to_string()])
    } else {
        ("sh", vec!["-c".to_string()])
    }
}

/// Resolve `req` for `platform`.
pub fn resolve(req: &ExecuteRequest, platform: Platform) -> Invocation {
    match req.kind {
        ExecuteKind::Command => Invocation::new(req.command.clone(), req.args.clone()),
        ExecuteKind::Batch => resolve_batch(&req.command, &req.args, platform),
    }
}

fn resolve_batch(script: &str, args: &[String], platform: Platform) -> Invocation {
    if platform.is_windows() {
        let mut argv = Vec::with_capacity(args.len() + 2);
        argv.push("/C".to_string());
        argv.push(script.to_string());
        argv.extend(args.iter().cloned());
        return Invocation::new("cmd", argv);
    }

    if is_shell_script(script) {
        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push(script.to_string());
        argv.extend(args.iter().cloned());
        Invocation::new("sh", argv)
    } else {
        // exec bit / shebang decides
        Invocation::new(script, args.to_vec())
    }
}

fn is_shell_script(script: &str) -> bool {
    Path::new(script)
        .extension()
        .map_or(false, |ext| ext == "sh")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_command_is_passed_through() {
        let req = ExecuteRequest::command("echo").with_args(["hello world", "x"]);
        for platform in [Platform::Windows, Platform::Linux, Platform::MacOs] {
            let inv = resolve(&req, platform);
            assert_eq!(inv.program, "echo");
            assert_eq!(inv.args, args(&["hello world", "x"]));
        }
    }

    #[test]
    fn test_windows_batch_uses_cmd() {
        let req = ExecuteRequest::batch("C:\\jobs\\build.bat").with_args(["a", "b"]);
        let inv = resolve(&req, Platform::Windows);
        assert_eq!(inv.program, "cmd");
        assert_eq!(inv.args, args(&["/C", "C:\\jobs\\build.bat", "a", "b"]));
    }

    #[test]
    fn test_posix_shell_script_uses_sh() {
        let req = ExecuteRequest::batch("/tmp/run.sh").with_args(["1"]);
        for platform in [Platform::Linux, Platform::MacOs, Platform::Unix] {
            let inv = resolve(&req, platform);
            assert_eq!(inv.program, "sh");
            assert_eq!(inv.args, args(&["/tmp/run.sh", "1"]));
        }
    }

    #[test]
    fn test_posix_other_script_runs_directly() {
        let req = ExecuteRequest::batch("/opt/tools/deploy.py").with_args(["--dry"]);
        let inv = resolve(&req, Platform::Linux);
        assert_eq!(inv.program, "/opt/tools/deploy.py");
        assert_eq!(inv.args, args(&["--dry"]));

        let req = ExecuteRequest::batch("/opt/tools/noext");
        assert_eq!(resolve(&req, Platform::MacOs).program, "/opt/tools/noext");
    }

    #[test]
    fn test_shell_command_per_platform() {
        assert_eq!(shell_command(Platform::Windows), ("cmd", args(&["/C"])));
        assert_eq!(shell_command(Platform::Linux), ("sh", args(&["-c"])));

        let inv = Invocation::shell_line(Platform::Linux, "echo $((10+20))");
        assert_eq!(inv.display(), "sh -c echo $((10+20))");
    }

    #[test]
    fn test_current_platform() {
        assert_eq!(Platform::current().is_windows(), cfg!(windows));
    }
}
