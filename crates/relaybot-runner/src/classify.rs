use relaybot_types::ExecutionError;

/// Maximum number of stderr characters kept in an `Exit` error.
pub const STDERR_LIMIT: usize = 200;

/// Classify a non-zero exit from the external process.
///
/// Checks are case-insensitive and the first match wins.
pub fn classify_failure(stderr: &str, code: Option<i32>) -> ExecutionError {
    let lower = stderr.to_lowercase();
    if lower.contains("auth") || lower.contains("unauthorized") {
        ExecutionError::Auth
    } else if lower.contains("rate") || lower.contains("throttl") {
        ExecutionError::RateLimit
    } else if lower.contains("timeout") {
        ExecutionError::Timeout
    } else {
        ExecutionError::Exit {
            code,
            stderr: stderr.chars().take(STDERR_LIMIT).collect(),
        }
    }
}
