//! Browser targets.
//!
//! A [`Target`] is an addressable browsing surface. Its [`Page`] is built on
//! first use: the target is attached with a flattened session and the page
//! trackers start on that session.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::{Value, json};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::{Error, Result};
use crate::identifiers::{BrowserContextId, SessionId, TargetId};
use crate::protocol::event::TargetInfo;
use crate::transport::{Connection, Session};

use super::page::{Page, PageOptions};

// ============================================================================
// Target
// ============================================================================

struct TargetInner {
    id: TargetId,
    info: RwLock<TargetInfo>,
    connection: Connection,
    page_options: PageOptions,
    session: Mutex<Option<Session>>,
    page: OnceCell<Page>,
}

/// A page, popup or other attachable surface.
#[derive(Clone)]
pub struct Target {
    inner: Arc<TargetInner>,
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let info = self.inner.info.read();
        f.debug_struct("Target")
            .field("id", &self.inner.id)
            .field("type", &info.target_type)
            .field("url", &info.url)
            .finish_non_exhaustive()
    }
}

impl Target {
    pub(crate) fn new(info: TargetInfo, connection: Connection, page_options: PageOptions) -> Self {
        Self {
            inner: Arc::new(TargetInner {
                id: info.target_id.clone(),
                info: RwLock::new(info),
                connection,
                page_options,
                session: Mutex::new(None),
                page: OnceCell::new(),
            }),
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Returns the target id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &TargetId {
        &self.inner.id
    }

    /// Returns the latest target info.
    #[must_use]
    pub fn info(&self) -> TargetInfo {
        self.inner.info.read().clone()
    }

    /// Returns the containing browser context.
    #[must_use]
    pub fn context_id(&self) -> Option<BrowserContextId> {
        self.inner.info.read().browser_context_id.clone()
    }

    /// Returns the target that opened this one.
    #[must_use]
    pub fn opener_id(&self) -> Option<TargetId> {
        self.inner.info.read().opener_id.clone()
    }

    /// Returns the cached title.
    #[must_use]
    pub fn title(&self) -> String {
        self.inner.info.read().title.clone()
    }

    /// Returns the cached url.
    #[must_use]
    pub fn url(&self) -> String {
        self.inner.info.read().url.clone()
    }

    /// Returns `true` for page targets.
    #[must_use]
    pub fn is_page(&self) -> bool {
        self.inner.info.read().is_page()
    }

    /// Returns `true` for windows opened by another target.
    #[must_use]
    pub fn is_window(&self) -> bool {
        self.inner.info.read().opener_id.is_some()
    }

    /// Returns the attached session, if any.
    #[must_use]
    pub fn session(&self) -> Option<Session> {
        self.inner.session.lock().clone()
    }

    /// Returns the page if it was already built.
    #[must_use]
    pub fn attached_page(&self) -> Option<Page> {
        self.inner.page.get().cloned()
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Returns the page of this target, attaching on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the target cannot be attached.
    pub async fn page(&self) -> Result<Page> {
        self.inner
            .page
            .get_or_try_init(|| async {
                let session = match self.session() {
                    Some(session) => session,
                    None => self.attach().await?,
                };
                Page::attach(session, self.inner.id.clone(), self.inner.page_options.clone()).await
            })
            .await
            .cloned()
    }

    /// Closes the target.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn close(&self) -> Result<()> {
        debug!(target_id = %self.inner.id, "Closing target");

        Session::browser(self.inner.connection.clone())
            .command("Target.closeTarget", json!({ "targetId": self.inner.id }))
            .await?;
        Ok(())
    }

    // ========================================================================
    // Registry Hooks
    // ========================================================================

    /// Replaces the cached info.
    pub(crate) fn update(&self, info: TargetInfo) {
        *self.inner.info.write() = info;
    }

    /// Adopts a session the browser attached on its own.
    pub(crate) fn adopt_session(&self, session_id: SessionId) {
        let mut session = self.inner.session.lock();
        if session.is_none() {
            *session = Some(Session::attached(self.inner.connection.clone(), session_id));
        }
    }

    /// Returns `true` if `session_id` is this target's session.
    pub(crate) fn has_session(&self, session_id: &SessionId) -> bool {
        self.inner
            .session
            .lock()
            .as_ref()
            .and_then(Session::id)
            .is_some_and(|id| id == session_id)
    }

    /// Closes the attached session.
    pub(crate) fn detach(&self) {
        if let Some(session) = self.inner.session.lock().take() {
            session.close();
            debug!(target_id = %self.inner.id, session_id = ?session.id(), "Target detached");
        }
    }

    async fn attach(&self) -> Result<Session> {
        let reply = Session::browser(self.inner.connection.clone())
            .command(
                "Target.attachToTarget",
                json!({ "targetId": self.inner.id, "flatten": true }),
            )
            .await?;

        let session_id = reply
            .get("sessionId")
            .and_then(Value::as_str)
            .map(SessionId::new)
            .ok_or_else(|| Error::protocol("Target.attachToTarget reply without sessionId"))?;

        let session = Session::attached(self.inner.connection.clone(), session_id);
        *self.inner.session.lock() = Some(session.clone());
        Ok(session)
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

    fn info(id: &str, opener: Option<&str>) -> TargetInfo {
        serde_json::from_value(json!({
            "targetId": id,
            "type": "page",
            "title": "about:blank",
            "url": "about:blank",
            "attached": false,
            "openerId": opener,
            "browserContextId": "C1"
        }))
        .expect("target info")
    }

    #[tokio::test]
    async fn test_page_attaches_once() {
        let (writer, reader, mut browser) = memory::pair();
        let connection = Connection::new(writer, reader, ConnectionOptions::default()).expect("connection");
        let target = Target::new(info("T1", None), connection, PageOptions::default());

        let first = tokio::spawn({
            let target = target.clone();
            async move { target.page().await }
        });

        let attach = browser.next_command().await.expect("attach");
        assert_eq!(attach.method, "Target.attachToTarget");
        assert_eq!(attach.params["flatten"], true);
        assert!(attach.session_id.is_none());
        browser.reply(attach.id, json!({ "sessionId": "S1" }));

        for _ in 0..5 {
            let enable = browser.next_command().await.expect("enable");
            assert_eq!(enable.session_id, Some(SessionId::new("S1")));
            browser.reply(enable.id, json!({}));
        }

        let page = first.await.expect("join").expect("page");
        let again = target.page().await.expect("cached");
        assert_eq!(page.session().id(), again.session().id());
        assert!(target.has_session(&SessionId::new("S1")));
    }

    #[tokio::test]
    async fn test_detach_closes_session() {
        let (writer, reader, _browser) = memory::pair();
        let connection = Connection::new(writer, reader, ConnectionOptions::default()).expect("connection");
        let target = Target::new(info("T1", Some("T0")), connection.clone(), PageOptions::default());

        target.adopt_session(SessionId::new("S9"));
        assert!(target.is_window());
        assert!(target.has_session(&SessionId::new("S9")));

        target.detach();
        assert!(target.session().is_none());
        assert!(connection.is_detached(&SessionId::new("S9")));
    }
}
