//! Core Page struct, options and protocol access.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::try_join_all;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::Result;
use crate::identifiers::{ExecutionContextId, FrameId, TargetId};
use crate::retry::RetryPolicy;
use crate::transport::{Delivery, Session};

use super::frames::{Frame, Frames};
use super::idle::IdleSignal;
use super::intercept::AuthCredentials;
use super::network::Network;

// ============================================================================
// Constants
// ============================================================================

/// Default timeout for page operations.
pub const DEFAULT_PAGE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default time idle must hold before a page counts as settled.
pub const DEFAULT_QUIET_WINDOW: Duration = Duration::from_millis(100);

/// Domains enabled on attach, after the trackers subscribed.
const DOMAINS: &[&str] = &[
    "Page.enable",
    "DOM.enable",
    "Runtime.enable",
    "Log.enable",
    "Network.enable",
];

// ============================================================================
// PageOptions
// ============================================================================

/// Page behavior settings.
#[derive(Debug, Clone)]
pub struct PageOptions {
    /// Timeout for navigation and execution-context waits.
    pub timeout: Duration,
    /// Time idle must hold before the page counts as settled.
    pub quiet_window: Duration,
    /// Report pending traffic when a navigation times out.
    pub pending_connection_errors: bool,
    /// Retries of script evaluation.
    pub retry: RetryPolicy,
}

impl Default for PageOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_PAGE_TIMEOUT,
            quiet_window: DEFAULT_QUIET_WINDOW,
            pending_connection_errors: true,
            retry: RetryPolicy::default(),
        }
    }
}

// ============================================================================
// Page
// ============================================================================

/// Internal shared state for a page.
pub(crate) struct PageInner {
    pub target_id: TargetId,
    pub session: Session,
    pub frames: Frames,
    pub network: Network,
    pub options: PageOptions,
    pub auth: Arc<AuthCredentials>,
}

/// An attached page target.
///
/// Cloning is cheap; clones share trackers and session.
#[derive(Clone)]
pub struct Page {
    pub(crate) inner: Arc<PageInner>,
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("target_id", &self.inner.target_id)
            .field("session_id", &self.inner.session.id())
            .finish_non_exhaustive()
    }
}

impl Page {
    /// Starts the trackers on `session` and enables the page domains.
    ///
    /// # Errors
    ///
    /// Returns an error if a domain cannot be enabled.
    pub async fn attach(session: Session, target_id: TargetId, options: PageOptions) -> Result<Self> {
        let frames = Frames::new(session.clone(), target_id.clone(), IdleSignal::new());
        let network = Network::new(session.clone(), frames.clone());

        try_join_all(
            DOMAINS
                .iter()
                .map(|method| session.command(method, json!({}))),
        )
        .await?;

        debug!(%target_id, session_id = ?session.id(), "Page attached");

        Ok(Self {
            inner: Arc::new(PageInner {
                target_id,
                session,
                frames,
                network,
                options,
                auth: Arc::default(),
            }),
        })
    }
}

// ============================================================================
// Page - Accessors
// ============================================================================

impl Page {
    /// Returns the target id.
    #[inline]
    #[must_use]
    pub fn target_id(&self) -> &TargetId {
        &self.inner.target_id
    }

    /// Returns the page session.
    #[inline]
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    /// Returns the frame tracker.
    #[inline]
    #[must_use]
    pub fn frames(&self) -> &Frames {
        &self.inner.frames
    }

    /// Returns the network correlator.
    #[inline]
    #[must_use]
    pub fn network(&self) -> &Network {
        &self.inner.network
    }

    /// Returns the page options.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &PageOptions {
        &self.inner.options
    }

    /// Returns the main frame, once confirmed.
    #[must_use]
    pub fn main_frame(&self) -> Option<Frame> {
        self.inner.frames.main_frame()
    }

    /// Returns `true` once the page session is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.session.is_closed()
    }
}

// ============================================================================
// Page - Protocol
// ============================================================================

impl Page {
    /// Sends a command on the page session.
    ///
    /// # Errors
    ///
    /// See [`Connection::send`](crate::transport::Connection::send).
    pub async fn command(&self, method: &str, params: Value) -> Result<Value> {
        self.inner.session.command(method, params).await
    }

    /// Registers a listener for page events.
    pub fn on<F>(&self, method: impl Into<String>, listener: F)
    where
        F: Fn(&Value, Delivery) -> Result<()> + Send + Sync + 'static,
    {
        self.inner.session.on(method, listener);
    }

    /// Waits until the page stays idle for the quiet window.
    ///
    /// Returns `false` if `timeout` elapses first.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        self.inner
            .frames
            .idle()
            .wait_settled(self.inner.options.quiet_window, timeout)
            .await
    }

    /// Waits for the execution handle of a frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FrameNotFound`](crate::Error::FrameNotFound) if the
    /// frame is not tracked, or
    /// [`Error::NoExecutionContext`](crate::Error::NoExecutionContext) after
    /// the page timeout.
    pub async fn frame_execution_handle(&self, frame_id: &FrameId) -> Result<ExecutionContextId> {
        self.inner
            .frames
            .frame_execution_handle(frame_id, self.inner.options.timeout)
            .await
    }

    /// Waits for the execution handle of the main frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoExecutionContext`](crate::Error::NoExecutionContext)
    /// after the page timeout.
    pub async fn main_frame_execution_handle(&self) -> Result<ExecutionContextId> {
        self.inner
            .frames
            .main_frame_execution_handle(self.inner.options.timeout)
            .await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::identifiers::SessionId;
    use crate::transport::memory;
    use crate::transport::{Connection, ConnectionOptions};

    #[test]
    fn test_page_is_clone_and_debug() {
        fn assert_traits<T: Clone + fmt::Debug + Send + Sync>() {}
        assert_traits::<Page>();
    }

    #[test]
    fn test_default_options() {
        let options = PageOptions::default();
        assert_eq!(options.timeout, Duration::from_secs(5));
        assert_eq!(options.quiet_window, Duration::from_millis(100));
        assert!(options.pending_connection_errors);
    }

    #[tokio::test]
    async fn test_attach_enables_domains_after_subscribing() {
        let (writer, reader, mut browser) = memory::pair();
        let connection = Connection::new(writer, reader, ConnectionOptions::default()).expect("connection");
        let session = Session::attached(connection.clone(), SessionId::new("S1"));

        let attach = tokio::spawn(Page::attach(
            session.clone(),
            TargetId::new("T1"),
            PageOptions::default(),
        ));

        let mut enabled = Vec::new();
        for _ in DOMAINS {
            let command = browser.next_command().await.expect("command");
            assert!(
                connection
                    .subscriber()
                    .listener_count("Runtime.executionContextCreated", session.id())
                    > 0
            );
            enabled.push(command.method.clone());
            browser.reply(command.id, json!({}));
        }

        let page = attach.await.expect("join").expect("attached");
        enabled.sort();
        assert_eq!(
            enabled,
            ["DOM.enable", "Log.enable", "Network.enable", "Page.enable", "Runtime.enable"]
        );
        assert_eq!(page.target_id().as_str(), "T1");
        assert!(!page.is_closed());
    }
}
