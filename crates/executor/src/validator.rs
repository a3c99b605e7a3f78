use std::fs::File;
use std::io::ErrorKind as IoErrorKind;
use std::path::Path;
use std::time::Duration;

use crate::error::{ExecutorError, Result};
use crate::request::{ExecuteKind, ExecuteRequest};

/// Check a request before any record is allocated for it.
///
/// An unset or zero timeout is replaced with `default_timeout`; nothing else
/// about the request is modified.
pub fn validate(req: &mut ExecuteRequest, default_timeout: Duration) -> Result<()> {
    if req.command.trim().is_empty() {
        return Err(ExecutorError::invalid("invalid command"));
    }

    if req.kind == ExecuteKind::Batch {
        validate_batch_file(Path::new(&req.command))?;
    }

    if req.timeout.map_or(true, |t| t.is_zero()) {
        req.timeout = Some(default_timeout);
    }

    Ok(())
}

/// Best-effort check that a script exists, is a file and can be opened.
///
/// The file may still disappear between this check and the spawn.
pub fn validate_batch_file(path: &Path) -> Result<()> {
    let meta = match std::fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == IoErrorKind::NotFound => {
            return Err(ExecutorError::FileNotFound(path.to_path_buf()))
        }
        Err(e) if e.kind() == IoErrorKind::PermissionDenied => {
            return Err(ExecutorError::PermissionDenied(path.to_path_buf()))
        }
        Err(e) => return Err(ExecutorError::invalid(format!("{}: {e}", path.display()))),
    };

    if meta.is_dir() {
        return Err(ExecutorError::invalid(format!(
            "path is a directory, not a file: {}",
            path.display()
        )));
    }

    File::open(path).map_err(|_| ExecutorError::PermissionDenied(path.to_path_buf()))?;

    Ok(())
}
