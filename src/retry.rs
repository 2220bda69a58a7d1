//! Retry policy for transient browser errors.
//!
//! Some replies only mean "not yet": a node id went stale after a DOM
//! rebuild, or a script ran while the frame swapped documents. The policy
//! maps each [`ErrorKind`] to how often and how patiently an operation is
//! repeated; kinds without a rule fail immediately.
//!
//! | Kind | Attempts | Backoff |
//! |------|----------|---------|
//! | `NodeNotFound` | 6 | 100 ms |
//! | `NoExecutionContext` | 6 | 100 ms |

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::time::Duration;

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::error::{ErrorKind, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default attempts for transient kinds.
pub const DEFAULT_ATTEMPTS: u32 = 6;

/// Default pause between attempts.
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(100);

// ============================================================================
// RetryRule
// ============================================================================

/// How a single error kind is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryRule {
    /// Total attempts, including the first one.
    pub attempts: u32,
    /// Pause between attempts.
    pub backoff: Duration,
}

impl RetryRule {
    /// Creates a rule.
    #[inline]
    #[must_use]
    pub const fn new(attempts: u32, backoff: Duration) -> Self {
        Self { attempts, backoff }
    }
}

// ============================================================================
// RetryPolicy
// ============================================================================

/// Table of retry rules keyed by error kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    rules: FxHashMap<ErrorKind, RetryRule>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        let rule = RetryRule::new(DEFAULT_ATTEMPTS, DEFAULT_BACKOFF);
        Self::none()
            .with(ErrorKind::NodeNotFound, rule)
            .with(ErrorKind::NoExecutionContext, rule)
    }
}

impl RetryPolicy {
    /// Creates a policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            rules: FxHashMap::default(),
        }
    }

    /// Sets the rule for `kind`.
    #[must_use]
    pub fn with(mut self, kind: ErrorKind, rule: RetryRule) -> Self {
        self.rules.insert(kind, rule);
        self
    }

    /// Returns the rule for `kind`.
    #[inline]
    #[must_use]
    pub fn rule_for(&self, kind: ErrorKind) -> Option<RetryRule> {
        self.rules.get(&kind).copied()
    }
}

// ============================================================================
// with_retry
// ============================================================================

/// Runs `operation` until it succeeds or its error has no attempts left.
///
/// # Errors
///
/// Returns the last error of `operation`.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;

    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let Some(rule) = policy.rule_for(err.kind()) else {
            return Err(err);
        };
        if attempt >= rule.attempts {
            return Err(err);
        }

        debug!(attempt, kind = ?err.kind(), error = %err, "Retrying operation");
        attempt += 1;
        tokio::time::sleep(rule.backoff).await;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::error::Error;

    #[test]
    fn test_default_table() {
        let policy = RetryPolicy::default();

        assert_eq!(
            policy.rule_for(ErrorKind::NodeNotFound),
            Some(RetryRule::new(6, Duration::from_millis(100)))
        );
        assert!(policy.rule_for(ErrorKind::NoExecutionContext).is_some());
        assert!(policy.rule_for(ErrorKind::Timeout).is_none());
        assert!(RetryPolicy::none().rule_for(ErrorKind::NodeNotFound).is_none());
    }

    #[tokio::test]
    async fn test_transient_error_is_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let value = with_retry(&RetryPolicy::default(), || async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Error::no_execution_context("navigating"))
            } else {
                Ok(42)
            }
        })
        .await
        .expect("third attempt succeeds");

        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let err = with_retry(&RetryPolicy::default(), || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(Error::NodeNotFound {
                message: "stale".to_string(),
            })
        })
        .await
        .expect_err("gives up");

        assert_eq!(err.kind(), ErrorKind::NodeNotFound);
        assert_eq!(calls.load(Ordering::SeqCst), DEFAULT_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_other_errors_fail_fast() {
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result = with_retry(&RetryPolicy::default(), || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(Error::script("TypeError", "x is undefined"))
        })
        .await;

        tokio_test::assert_err!(result);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
