//! Helpers for reading `CMDEXEC_*` environment overrides.
//!
//! Helpers take the key without its prefix (`"LOG_JSON"` reads
//! `CMDEXEC_LOG_JSON`). Each returns `None` when the variable is unset or
//! unparsable, so callers keep their defaults instead of failing at startup.

use std::time::Duration;

/// Prefix shared by every environment override of this workspace.
pub const ENV_PREFIX: &str = "CMDEXEC_";

/// Full variable name for `key`.
pub fn var_name(key: &str) -> String {
    format!("{ENV_PREFIX}{key}")
}

fn lookup(key: &str) -> Option<String> {
    std::env::var(var_name(key)).ok()
}

/// Interpret a variable as a boolean flag (`1`, `true`, `yes`, `on`).
pub fn flag(key: &str) -> Option<bool> {
    let raw = lookup(key)?;
    let val = raw.trim().to_lowercase();
    match val.as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Read a millisecond value and clamp it into `[min, max]`.
pub fn duration_ms(key: &str, min: Duration, max: Duration) -> Option<Duration> {
    let raw = lookup(key)?;
    let ms = raw.trim().parse::<u64>().ok()?;
    Some(Duration::from_millis(ms).clamp(min, max))
}

/// Read a trimmed, non-empty string value.
pub fn string(key: &str) -> Option<String> {
    lookup(key)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
