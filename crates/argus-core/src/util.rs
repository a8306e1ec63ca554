//! Small shared utilities: home/registry path resolution, duration
//! parsing, backoff schedules, wall-clock helpers.

use std::path::PathBuf;

use chrono::Utc;

/// Root directory for registry and defaults: `$ARGUS_HOME`, falling back
/// to `~/.argus`.
pub fn argus_home() -> PathBuf {
    if let Ok(dir) = std::env::var("ARGUS_HOME")
        && !dir.is_empty()
    {
        return PathBuf::from(dir);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_owned());
    PathBuf::from(home).join(".argus")
}

/// Registry file path: `$ARGUS_REGISTRY_PATH` override, else
/// `<argus_home>/registry.json`.
pub fn registry_path() -> PathBuf {
    if let Ok(path) = std::env::var("ARGUS_REGISTRY_PATH")
        && !path.is_empty()
    {
        return PathBuf::from(path);
    }
    argus_home().join("registry.json")
}

/// Epoch milliseconds now.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Parse a human duration into milliseconds: bare numbers are
/// milliseconds; supported suffixes are `ms`, `s`, `m`, `h`.
pub fn parse_duration_ms(input: &str) -> Option<u64> {
    let s = input.trim();
    if s.is_empty() {
        return None;
    }
    let (digits, multiplier) = if let Some(rest) = s.strip_suffix("ms") {
        (rest, 1)
    } else if let Some(rest) = s.strip_suffix('s') {
        (rest, 1_000)
    } else if let Some(rest) = s.strip_suffix('m') {
        (rest, 60_000)
    } else if let Some(rest) = s.strip_suffix('h') {
        (rest, 3_600_000)
    } else {
        (s, 1)
    };
    let value: u64 = digits.trim().parse().ok()?;
    value.checked_mul(multiplier)
}

/// Exponential backoff delay for the given zero-based attempt:
/// `base << attempt`, capped.
pub fn backoff_delay_ms(attempt: u32, base_ms: u64, cap_ms: u64) -> u64 {
    base_ms
        .checked_shl(attempt.min(16))
        .unwrap_or(cap_ms)
        .min(cap_ms)
}
