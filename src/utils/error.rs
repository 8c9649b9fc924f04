//! Error handling helpers for non-critical failures
//!
//! The companion daemon keeps serving when one module misbehaves; these
//! helpers log the failure and carry on.

use tracing::warn;

/// Run `operation`, logging a failure under `context` instead of returning it
///
/// # Example
/// ```rust
/// use zygisk_module::utils::log_error;
///
/// let len = log_error(|| std::fs::metadata("/nonexistent").map(|m| m.len()), "stat failed");
/// assert!(len.is_none());
/// ```
pub fn log_error<F, T, E>(operation: F, context: &str) -> Option<T>
where
    F: FnOnce() -> Result<T, E>,
    E: std::fmt::Display,
{
    match operation() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("{}: {}", context, e);
            None
        }
    }
}

/// Run `primary`, or log why it failed and use `fallback()`
pub fn with_fallback<F1, F2, T, E>(primary: F1, fallback: F2, context: &str) -> T
where
    F1: FnOnce() -> Result<T, E>,
    F2: FnOnce() -> T,
    E: std::fmt::Display,
{
    match primary() {
        Ok(value) => value,
        Err(e) => {
            warn!("{}: {}", context, e);
            fallback()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_error() {
        assert_eq!(log_error(|| Ok::<_, String>(3), "ctx"), Some(3));
        assert_eq!(log_error(|| Err::<i32, _>("boom"), "ctx"), None);
    }

    #[test]
    fn test_with_fallback() {
        assert_eq!(with_fallback(|| Err::<i32, _>("boom"), || 7, "ctx"), 7);
        assert_eq!(with_fallback(|| Ok::<_, String>(1), || 7, "ctx"), 1);
    }
}
