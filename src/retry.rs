//! Retry with exponential backoff for transient failures.
//!
//! Only outcomes whose every error is `Transport` are retried. A transport
//! failure leaves the observed state at its pre-call value, so running the
//! same pass again is safe.

use reconcile::{ReconcileError, ReconciliationResult};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Delay before the attempt following `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }

    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

/// Outcome that can say whether running again might help.
pub trait Retryable {
    fn should_retry(&self) -> bool;

    /// Short description for the retry log line.
    fn describe(&self) -> String;
}

impl Retryable for Result<ReconciliationResult, ReconcileError> {
    fn should_retry(&self) -> bool {
        match self {
            Ok(result) => result.is_retryable(),
            Err(err) => err.is_retryable(),
        }
    }

    fn describe(&self) -> String {
        match self {
            Ok(result) => result
                .errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; "),
            Err(err) => err.to_string(),
        }
    }
}

/// Run `operation` until it succeeds, fails for good, or attempts run out.
/// The last outcome is returned either way.
pub fn with_retry<T, F>(config: &RetryConfig, label: &str, mut operation: F) -> T
where
    T: Retryable,
    F: FnMut() -> T,
{
    let mut attempt = 0;
    loop {
        let outcome = operation();
        if !outcome.should_retry() || attempt + 1 >= config.max_attempts {
            return outcome;
        }

        let delay = config.delay_for_attempt(attempt);
        log::warn!(
            "{label}: attempt {}/{} failed: {}. Retrying in {:.1}s",
            attempt + 1,
            config.max_attempts,
            outcome.describe(),
            delay.as_secs_f64()
        );
        thread::sleep(delay);
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconcile::{Action, ErrorKind, ObservedState};
    use std::cell::Cell;

    fn fast() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            backoff_factor: 1.0,
            max_delay: Duration::from_millis(10),
        }
    }

    fn outcome(kind: Option<ErrorKind>) -> Result<ReconciliationResult, ReconcileError> {
        let mut result = ReconciliationResult {
            action: Action::NoOp,
            observed: ObservedState::absent("maintainer"),
            drift: reconcile::DriftReport::default(),
            errors: Vec::new(),
        };
        if let Some(kind) = kind {
            result
                .errors
                .push(ReconcileError::new(kind, "maintainer", Some("1"), "boom"));
        }
        Ok(result)
    }

    #[test]
    fn test_success_first_try() {
        let attempts = Cell::new(0);
        let result = with_retry(&fast(), "acme", || {
            attempts.set(attempts.get() + 1);
            outcome(None)
        });
        assert!(result.unwrap().is_ok());
        assert_eq!(attempts.get(), 1);
    }

    #[test]
    fn test_non_transport_error_is_not_retried() {
        let attempts = Cell::new(0);
        let result = with_retry(&fast(), "acme", || {
            attempts.set(attempts.get() + 1);
            outcome(Some(ErrorKind::Conflict))
        });
        assert!(!result.unwrap().is_ok());
        assert_eq!(attempts.get(), 1);
    }

    #[test]
    fn test_transport_error_is_retried_until_success() {
        let attempts = Cell::new(0);
        let result = with_retry(&fast(), "acme", || {
            attempts.set(attempts.get() + 1);
            if attempts.get() < 3 {
                outcome(Some(ErrorKind::Transport))
            } else {
                outcome(None)
            }
        });
        assert!(result.unwrap().is_ok());
        assert_eq!(attempts.get(), 3);
    }

    #[test]
    fn test_attempts_are_bounded() {
        let attempts = Cell::new(0);
        let result = with_retry(&fast(), "acme", || {
            attempts.set(attempts.get() + 1);
            outcome(Some(ErrorKind::Transport))
        });
        assert!(result.unwrap().is_retryable());
        assert_eq!(attempts.get(), 3);
    }

    #[test]
    fn test_delay_backoff_is_capped() {
        let config = RetryConfig {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(5),
        };
        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(5));
        assert_eq!(RetryConfig::no_retry().max_attempts, 1);
    }
}
