//! Page settlement signal.
//!
//! The frame tracker calls [`IdleSignal::reset`] whenever a frame starts
//! loading and [`IdleSignal::set`] once nothing is loading any more. Waiters
//! observe it through a `watch` channel, so a transition between a check
//! and the subsequent sleep is never lost.
//!
//! Every reset bumps an iteration counter. Navigation commands record the
//! counter before they are sent and later ask whether a reset happened
//! since, which tells a navigation that never started loading apart from
//! one that already finished.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, timeout_at};

// ============================================================================
// IdleState
// ============================================================================

/// Snapshot of the signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleState {
    /// No frame is loading.
    pub idle: bool,
    /// Number of resets so far.
    pub iteration: u64,
}

// ============================================================================
// IdleSignal
// ============================================================================

/// Reusable idle/not-idle wait primitive.
#[derive(Debug, Clone)]
pub struct IdleSignal {
    tx: Arc<watch::Sender<IdleState>>,
}

impl Default for IdleSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl IdleSignal {
    /// Creates a signal in the idle state.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(IdleState {
            idle: true,
            iteration: 0,
        });
        Self { tx: Arc::new(tx) }
    }

    /// Marks the page as not idle and starts a new iteration.
    pub fn reset(&self) {
        self.tx.send_modify(|state| {
            state.idle = false;
            state.iteration += 1;
        });
    }

    /// Marks the page as idle.
    pub fn set(&self) {
        self.tx.send_if_modified(|state| {
            let changed = !state.idle;
            state.idle = true;
            changed
        });
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> IdleState {
        *self.tx.borrow()
    }

    /// Returns `true` if the page is idle right now.
    #[inline]
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.tx.borrow().idle
    }

    /// Returns the current iteration.
    #[inline]
    #[must_use]
    pub fn iteration(&self) -> u64 {
        self.tx.borrow().iteration
    }

    /// Waits until idle holds for `quiet` without interruption.
    ///
    /// Every reset re-arms the quiet window. Returns `false` if `ceiling`
    /// elapses first.
    pub async fn wait_settled(&self, quiet: Duration, ceiling: Duration) -> bool {
        let deadline = Instant::now() + ceiling;
        let mut rx = self.tx.subscribe();

        loop {
            let idle = rx.borrow_and_update().idle;

            if idle {
                let quiet_end = Instant::now() + quiet;
                let wake = quiet_end.min(deadline);

                match timeout_at(wake, rx.changed()).await {
                    Ok(Ok(())) => continue,
                    Ok(Err(_)) => return true,
                    Err(_) => return quiet_end <= deadline,
                }
            }

            match timeout_at(deadline, rx.changed()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) | Err(_) => return false,
            }
        }
    }

    /// Waits up to `within` for a reset after `iteration`.
    ///
    /// Returns `true` as soon as one is observed.
    pub async fn wait_changed_since(&self, iteration: u64, within: Duration) -> bool {
        let deadline = Instant::now() + within;
        let mut rx = self.tx.subscribe();

        loop {
            if rx.borrow_and_update().iteration > iteration {
                return true;
            }

            match timeout_at(deadline, rx.changed()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) | Err(_) => return false,
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::time::sleep;

    const QUIET: Duration = Duration::from_millis(100);

    #[test]
    fn test_reset_and_set() {
        let signal = IdleSignal::new();
        assert!(signal.is_idle());
        assert_eq!(signal.iteration(), 0);

        signal.reset();
        assert_eq!(
            signal.state(),
            IdleState {
                idle: false,
                iteration: 1
            }
        );

        signal.set();
        assert!(signal.is_idle());
        assert_eq!(signal.iteration(), 1);
    }

    #[tokio::test]
    async fn test_settles_after_quiet_window() {
        let signal = IdleSignal::new();
        let start = Instant::now();

        assert!(signal.wait_settled(QUIET, Duration::from_secs(1)).await);
        assert!(start.elapsed() >= QUIET);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_reset_rearms_quiet_window() {
        let signal = IdleSignal::new();
        let start = Instant::now();

        let background = signal.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(50)).await;
            background.reset();
            sleep(Duration::from_millis(50)).await;
            background.set();
        });

        assert!(signal.wait_settled(QUIET, Duration::from_secs(1)).await);
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_ceiling_while_loading() {
        let signal = IdleSignal::new();
        signal.reset();

        assert!(!signal.wait_settled(QUIET, Duration::from_millis(150)).await);
    }

    #[tokio::test]
    async fn test_ceiling_shorter_than_quiet_window() {
        let signal = IdleSignal::new();
        assert!(!signal.wait_settled(QUIET, Duration::from_millis(20)).await);
    }

    #[tokio::test]
    async fn test_wait_changed_since() {
        let signal = IdleSignal::new();
        let iteration = signal.iteration();

        assert!(!signal.wait_changed_since(iteration, Duration::from_millis(30)).await);

        let background = signal.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(20)).await;
            background.reset();
        });

        assert!(signal.wait_changed_since(iteration, Duration::from_secs(1)).await);
        assert!(signal.wait_changed_since(iteration, Duration::ZERO).await);
    }
}
