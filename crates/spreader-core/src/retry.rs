use crate::config::RetryPolicy;
use crate::diagnostics::RunLog;
use std::fmt::Display;
use std::thread;
use std::time::Duration;

/// Delay before retry number `attempt` (1-based count of failures so far):
/// `base * 2^(attempt-1)`, capped at the policy's maximum backoff.
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(63);
    let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
    let delay_ms = policy.base_delay_ms.saturating_mul(factor);
    Duration::from_millis(delay_ms.min(policy.max_backoff_ms))
}

/// Run `operation` until it succeeds or the policy's attempts are used up.
///
/// Each retry is logged as a warning; giving up is logged as an error and the
/// last failure is handed back to the caller.
pub fn execute<T, E, F>(
    policy: &RetryPolicy,
    log: &RunLog,
    description: &str,
    mut operation: F,
) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Result<T, E>,
{
    let mut attempt: u32 = 1;
    loop {
        match operation() {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !policy.is_unlimited() && attempt >= policy.max_attempts {
                    log.error(format!(
                        "Failed to {} after {} attempt(s): {}",
                        description, attempt, err
                    ));
                    return Err(err);
                }

                let delay = backoff_delay(policy, attempt);
                attempt = attempt.saturating_add(1);
                log.warn(format!(
                    "Retrying {} (attempt {}) in {}ms: {}",
                    description,
                    attempt,
                    delay.as_millis(),
                    err
                ));
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_backoff_doubles_until_cap() {
        let policy = RetryPolicy {
            base_delay_ms: 100,
            max_attempts: 10,
            max_backoff_ms: 1_000,
        };
        assert_eq!(backoff_delay(&policy, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(&policy, 2), Duration::from_millis(200));
        assert_eq!(backoff_delay(&policy, 4), Duration::from_millis(800));
        assert_eq!(backoff_delay(&policy, 5), Duration::from_millis(1_000));
        assert_eq!(backoff_delay(&policy, 200), Duration::from_millis(1_000));
    }

    #[test]
    fn test_succeeds_after_transient_failures() {
        let log = RunLog::new();
        let mut calls = 0;
        let result: Result<u32, io::Error> =
            execute(&RetryPolicy::immediate(5), &log, "copy a.txt", || {
                calls += 1;
                if calls < 3 {
                    Err(io::Error::new(io::ErrorKind::PermissionDenied, "locked"))
                } else {
                    Ok(calls)
                }
            });

        assert_eq!(result.unwrap(), 3);
        // Two retries, each one a warning, no error
        assert_eq!(log.counts().warnings, 2);
        assert_eq!(log.counts().errors, 0);
    }

    #[test]
    fn test_gives_up_and_returns_last_error() {
        let log = RunLog::new();
        let mut calls = 0;
        let result: Result<(), String> =
            execute(&RetryPolicy::immediate(3), &log, "delete b.txt", || {
                calls += 1;
                Err(format!("failure {}", calls))
            });

        assert_eq!(result.unwrap_err(), "failure 3");
        assert_eq!(calls, 3);
        assert_eq!(log.counts().warnings, 2);
        assert_eq!(log.counts().errors, 1);
    }

    #[test]
    fn test_unlimited_attempts_keep_going() {
        let log = RunLog::new();
        let mut calls = 0;
        let result: Result<(), &str> =
            execute(&RetryPolicy::immediate(0), &log, "lock state", || {
                calls += 1;
                if calls < 25 {
                    Err("busy")
                } else {
                    Ok(())
                }
            });

        assert!(result.is_ok());
        assert_eq!(calls, 25);
        assert_eq!(log.counts().errors, 0);
    }
}
