//! Browser contexts.
//!
//! A [`Context`] is an isolated browsing profile (cookies, cache, storage)
//! holding the targets opened in it. The registry feeds it target events;
//! [`Context::create_target`] waits for the announcement of the target it
//! asked for, which may arrive before or after the command's reply.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::debug;

use crate::error::{Error, Result};
use crate::identifiers::{BrowserContextId, SessionId, TargetId};
use crate::protocol::event::TargetInfo;
use crate::transport::{Connection, Session};

use super::contexts::{Contexts, ContextsInner};
use super::page::{Page, PageOptions};
use super::target::Target;

// ============================================================================
// Types
// ============================================================================

#[derive(Default)]
struct ContextState {
    targets: FxHashMap<TargetId, Target>,
    waiters: FxHashMap<TargetId, Vec<oneshot::Sender<()>>>,
}

struct ContextInner {
    id: BrowserContextId,
    connection: Connection,
    page_options: PageOptions,
    target_timeout: Duration,
    state: Mutex<ContextState>,
    registry: Weak<ContextsInner>,
}

// ============================================================================
// Context
// ============================================================================

/// An isolated browser context.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.inner.id)
            .field("targets", &self.inner.state.lock().targets.len())
            .finish_non_exhaustive()
    }
}

impl Context {
    pub(crate) fn new(
        id: BrowserContextId,
        connection: Connection,
        page_options: PageOptions,
        target_timeout: Duration,
        registry: Weak<ContextsInner>,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                id,
                connection,
                page_options,
                target_timeout,
                state: Mutex::new(ContextState::default()),
                registry,
            }),
        }
    }

    /// Returns the context id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &BrowserContextId {
        &self.inner.id
    }

    /// Returns options used for pages of this context.
    #[inline]
    #[must_use]
    pub fn page_options(&self) -> &PageOptions {
        &self.inner.page_options
    }

    // ========================================================================
    // Targets
    // ========================================================================

    /// Opens a blank target and waits until the browser announces it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSuchTarget`] if the target is not announced in
    /// time.
    pub async fn create_target(&self) -> Result<Target> {
        let reply = Session::browser(self.inner.connection.clone())
            .command(
                "Target.createTarget",
                json!({ "browserContextId": self.inner.id, "url": "about:blank" }),
            )
            .await?;

        let target_id = reply
            .get("targetId")
            .and_then(Value::as_str)
            .map(TargetId::new)
            .ok_or_else(|| Error::protocol("Target.createTarget reply without targetId"))?;

        debug!(context_id = %self.inner.id, %target_id, "Target created");
        self.wait_for_target(&target_id).await
    }

    /// Opens a blank page.
    ///
    /// # Errors
    ///
    /// Returns an error if the target cannot be created or attached.
    pub async fn create_page(&self) -> Result<Page> {
        self.create_target().await?.page().await
    }

    /// Returns pages of every page target, attaching where needed.
    ///
    /// # Errors
    ///
    /// Returns an error if a target cannot be attached.
    pub async fn pages(&self) -> Result<Vec<Page>> {
        let mut pages = Vec::new();
        for target in self.targets().into_iter().filter(Target::is_page) {
            pages.push(target.page().await?);
        }
        Ok(pages)
    }

    /// Returns every tracked target.
    #[must_use]
    pub fn targets(&self) -> Vec<Target> {
        self.inner.state.lock().targets.values().cloned().collect()
    }

    /// Returns targets opened by another target.
    #[must_use]
    pub fn windows(&self) -> Vec<Target> {
        self.inner
            .state
            .lock()
            .targets
            .values()
            .filter(|target| target.is_window())
            .cloned()
            .collect()
    }

    /// Returns a target by id.
    #[must_use]
    pub fn target(&self, target_id: &TargetId) -> Option<Target> {
        self.inner.state.lock().targets.get(target_id).cloned()
    }

    /// Returns `true` if the target belongs to this context.
    #[must_use]
    pub fn has_target(&self, target_id: &TargetId) -> bool {
        self.inner.state.lock().targets.contains_key(target_id)
    }

    /// Disposes the context and every target in it.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn dispose(&self) -> Result<()> {
        match self.inner.registry.upgrade() {
            Some(registry) => Contexts::from_inner(registry).dispose(&self.inner.id).await,
            None => self.dispose_remote().await,
        }
    }

    // ========================================================================
    // Registry Hooks
    // ========================================================================

    /// Registers a target and wakes its waiters.
    pub(crate) fn add_target(&self, target: Target) {
        let waiters = {
            let mut state = self.inner.state.lock();
            let waiters = state.waiters.remove(target.id());
            state.targets.insert(target.id().clone(), target);
            waiters
        };

        for waiter in waiters.into_iter().flatten() {
            let _ = waiter.send(());
        }
    }

    /// Builds a target in this context.
    pub(crate) fn build_target(&self, info: TargetInfo) -> Target {
        Target::new(info, self.inner.connection.clone(), self.inner.page_options.clone())
    }

    /// Removes a target and closes its session.
    pub(crate) fn remove_target(&self, target_id: &TargetId) -> Option<Target> {
        let target = self.inner.state.lock().targets.remove(target_id)?;
        target.detach();
        Some(target)
    }

    /// Returns the target attached with `session_id`.
    pub(crate) fn target_by_session(&self, session_id: &SessionId) -> Option<Target> {
        self.inner
            .state
            .lock()
            .targets
            .values()
            .find(|target| target.has_session(session_id))
            .cloned()
    }

    /// Detaches every target.
    pub(crate) fn detach_all(&self) {
        let targets: Vec<Target> = {
            let mut state = self.inner.state.lock();
            state.waiters.clear();
            state.targets.drain().map(|(_, target)| target).collect()
        };

        for target in targets {
            target.detach();
        }
    }

    /// Sends `Target.disposeBrowserContext`.
    pub(crate) async fn dispose_remote(&self) -> Result<()> {
        self.detach_all();

        Session::browser(self.inner.connection.clone())
            .command(
                "Target.disposeBrowserContext",
                json!({ "browserContextId": self.inner.id }),
            )
            .await?;

        debug!(context_id = %self.inner.id, "Context disposed");
        Ok(())
    }

    async fn wait_for_target(&self, target_id: &TargetId) -> Result<Target> {
        let rx = {
            let mut state = self.inner.state.lock();
            if let Some(target) = state.targets.get(target_id) {
                return Ok(target.clone());
            }

            let (tx, rx) = oneshot::channel();
            state.waiters.entry(target_id.clone()).or_default().push(tx);
            rx
        };

        let timeout_ms = self.inner.target_timeout.as_millis();
        match timeout(self.inner.target_timeout, rx).await {
            Ok(Ok(())) => self.target(target_id).ok_or_else(|| {
                Error::no_such_target(format!("Target {target_id} closed before it was used"))
            }),
            Ok(Err(_)) | Err(_) => {
                self.inner.state.lock().waiters.remove(target_id);
                Err(Error::no_such_target(format!(
                    "Target {target_id} was not announced within {timeout_ms}ms"
                )))
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

    use crate::transport::ConnectionOptions;
    use crate::transport::memory;

    fn info(id: &str) -> TargetInfo {
        serde_json::from_value(json!({
            "targetId": id,
            "type": "page",
            "browserContextId": "C1"
        }))
        .expect("target info")
    }

    fn context(connection: Connection, target_timeout: Duration) -> Context {
        Context::new(
            BrowserContextId::new("C1"),
            connection,
            PageOptions::default(),
            target_timeout,
            Weak::new(),
        )
    }

    #[tokio::test]
    async fn test_create_target_waits_for_announcement() {
        let (writer, reader, mut browser) = memory::pair();
        let connection = Connection::new(writer, reader, ConnectionOptions::default()).expect("connection");
        let context = context(connection, Duration::from_secs(1));

        let create = tokio::spawn({
            let context = context.clone();
            async move { context.create_target().await }
        });

        let command = browser.next_command().await.expect("createTarget");
        assert_eq!(command.method, "Target.createTarget");
        assert_eq!(command.params["browserContextId"], "C1");
        browser.reply(command.id, json!({ "targetId": "T1" }));

        tokio::time::sleep(Duration::from_millis(20)).await;
        context.add_target(context.build_target(info("T1")));

        let target = create.await.expect("join").expect("target");
        assert_eq!(target.id().as_str(), "T1");
        assert!(context.has_target(target.id()));
    }

    #[tokio::test]
    async fn test_announcement_before_reply() {
        let (writer, reader, browser) = memory::pair();
        let connection = Connection::new(writer, reader, ConnectionOptions::default()).expect("connection");
        let context = context(connection, Duration::from_secs(1));

        let early = context.clone();
        browser.serve(move |command, _| {
            early.add_target(early.build_target(info("T2")));
            assert_eq!(command.method, "Target.createTarget");
            Some(Ok(json!({ "targetId": "T2" })))
        });

        let target = context.create_target().await.expect("target");
        assert_eq!(target.id().as_str(), "T2");
    }

    #[tokio::test]
    async fn test_unannounced_target_times_out() {
        let (writer, reader, browser) = memory::pair();
        let connection = Connection::new(writer, reader, ConnectionOptions::default()).expect("connection");
        let context = context(connection, Duration::from_millis(50));
        browser.serve(|_, _| Some(Ok(json!({ "targetId": "T3" }))));

        let err = context.create_target().await.expect_err("not announced");
        assert!(matches!(err, Error::NoSuchTarget { .. }));
        assert!(context.inner.state.lock().waiters.is_empty());
    }

    #[tokio::test]
    async fn test_remove_target_detaches_session() {
        let (writer, reader, _browser) = memory::pair();
        let connection = Connection::new(writer, reader, ConnectionOptions::default()).expect("connection");
        let context = context(connection.clone(), Duration::from_secs(1));

        let target = context.build_target(info("T4"));
        target.adopt_session(SessionId::new("S4"));
        context.add_target(target);
        assert!(context.target_by_session(&SessionId::new("S4")).is_some());

        assert!(context.remove_target(&TargetId::new("T4")).is_some());
        assert!(!context.has_target(&TargetId::new("T4")));
        assert!(connection.is_detached(&SessionId::new("S4")));
    }
}
