//! Page navigation methods.
//!
//! Navigation commands return once the browser accepted them. Whether a
//! document load followed is read from the idle signal: a reset within a
//! short window after the command means loading started, and the call then
//! waits for the page to settle.

use std::time::Duration;

use serde_json::{Value, json};
use tokio::time::Instant;
use tracing::debug;

use crate::error::{Error, Result};

use super::Page;

// ============================================================================
// Constants
// ============================================================================

/// How long a navigation may take to start loading.
const NAVIGATION_START_WINDOW: Duration = Duration::from_millis(100);

/// Navigation error text that does not fail a navigation.
const ABORTED: &str = "net::ERR_ABORTED";

// ============================================================================
// Page - Navigation
// ============================================================================

impl Page {
    /// Navigates the main frame to `url` and waits for the page to settle.
    ///
    /// # Errors
    ///
    /// - [`Error::Status`] if the browser reports a navigation error
    /// - [`Error::PendingConnections`] if the page did not settle while
    ///   requests were still open and pending-connection errors are enabled
    /// - [`Error::Timeout`] if the page did not settle in time
    pub async fn go_to(&self, url: &str) -> Result<()> {
        debug!(url, target_id = %self.inner.target_id, "Navigating");

        let iteration = self.inner.frames.idle().iteration();
        let reply = self.command("Page.navigate", json!({ "url": url })).await?;

        if let Some(error_text) = reply.get("errorText").and_then(Value::as_str)
            && error_text != ABORTED
        {
            return Err(Error::status(url, error_text));
        }

        match self.wait_for_navigation("navigation", iteration).await {
            Err(e) if e.is_timeout() && self.inner.options.pending_connection_errors => {
                let pending = self.inner.network.pending_urls();
                if pending.is_empty() {
                    Err(e)
                } else {
                    Err(Error::PendingConnections {
                        url: url.to_string(),
                        pending,
                    })
                }
            }
            other => other,
        }
    }

    /// Reloads the page and waits for it to settle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if the page did not settle in time.
    pub async fn reload(&self) -> Result<()> {
        debug!(target_id = %self.inner.target_id, "Reloading");

        let iteration = self.inner.frames.idle().iteration();
        self.command("Page.reload", json!({})).await?;
        self.wait_for_navigation("reload", iteration).await
    }

    /// Goes back in history. Does nothing at the first entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if the page did not settle in time.
    pub async fn back(&self) -> Result<()> {
        self.traverse_history(-1).await
    }

    /// Goes forward in history. Does nothing at the last entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if the page did not settle in time.
    pub async fn forward(&self) -> Result<()> {
        self.traverse_history(1).await
    }

    /// Stops loading.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn stop(&self) -> Result<()> {
        self.command("Page.stopLoading", json!({})).await?;
        Ok(())
    }

    /// Waits for a load started by the page itself, then for it to settle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if no load starts or the page does not
    /// settle within `timeout`.
    pub async fn wait_for_reload(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        let idle = self.inner.frames.idle();
        let iteration = idle.iteration();

        if !idle.wait_changed_since(iteration, timeout).await {
            return Err(Error::timeout("waiting for reload", timeout_ms));
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if self.wait_idle(remaining).await {
            Ok(())
        } else {
            Err(Error::timeout("waiting for reload", timeout_ms))
        }
    }

    /// Returns the url of the top-level document.
    ///
    /// # Errors
    ///
    /// Returns an error if the evaluation fails.
    pub async fn current_url(&self) -> Result<String> {
        let value = self.evaluate("window.top.location.href").await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    /// Returns the document title.
    ///
    /// # Errors
    ///
    /// Returns an error if the evaluation fails.
    pub async fn title(&self) -> Result<String> {
        let value = self.evaluate("document.title").await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }
}

// ============================================================================
// Page - Internal
// ============================================================================

impl Page {
    async fn traverse_history(&self, delta: i64) -> Result<()> {
        let history = self.command("Page.getNavigationHistory", json!({})).await?;

        let current = history
            .get("currentIndex")
            .and_then(Value::as_i64)
            .unwrap_or_default();
        let entry_id = usize::try_from(current + delta)
            .ok()
            .and_then(|index| history.get("entries")?.get(index))
            .and_then(|entry| entry.get("id"))
            .and_then(Value::as_i64);

        let Some(entry_id) = entry_id else {
            debug!(delta, "No history entry to traverse to");
            return Ok(());
        };

        let iteration = self.inner.frames.idle().iteration();
        self.command("Page.navigateToHistoryEntry", json!({ "entryId": entry_id }))
            .await?;
        self.wait_for_navigation("history navigation", iteration).await
    }

    /// Waits for a navigation issued after `iteration` to settle.
    async fn wait_for_navigation(&self, operation: &str, iteration: u64) -> Result<()> {
        let idle = self.inner.frames.idle();
        if !idle.wait_changed_since(iteration, NAVIGATION_START_WINDOW).await {
            return Ok(());
        }

        let timeout = self.inner.options.timeout;
        if self.wait_idle(timeout).await {
            Ok(())
        } else {
            Err(Error::timeout(
                operation,
                u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            ))
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
