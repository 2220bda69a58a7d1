//! Browser context registry.
//!
//! [`Contexts`] owns every [`Context`] created on a connection and routes
//! browser-level target events to the context the target belongs to.
//! Targets opened outside a tracked context are ignored.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::{Value, json};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{BrowserContextId, SessionId, TargetId};
use crate::protocol::event::TargetInfo;
use crate::protocol::{Event, ParsedEvent, methods};
use crate::transport::{Connection, Session};

use super::context::Context;
use super::page::PageOptions;
use super::target::Target;

// ============================================================================
// Constants
// ============================================================================

/// Target events routed by the registry.
const TARGET_EVENTS: &[&str] = &[
    methods::TARGET_CREATED,
    methods::TARGET_INFO_CHANGED,
    methods::TARGET_DESTROYED,
    methods::TARGET_CRASHED,
    methods::ATTACHED_TO_TARGET,
    methods::DETACHED_FROM_TARGET,
];

// ============================================================================
// Types
// ============================================================================

pub(crate) struct ContextsInner {
    session: Session,
    page_options: PageOptions,
    target_timeout: Duration,
    contexts: RwLock<FxHashMap<BrowserContextId, Context>>,
    default: tokio::sync::Mutex<Option<Context>>,
}

// ============================================================================
// Contexts
// ============================================================================

/// Registry of browser contexts on one connection.
#[derive(Clone)]
pub struct Contexts {
    inner: Arc<ContextsInner>,
}

impl fmt::Debug for Contexts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Contexts")
            .field("count", &self.inner.contexts.read().len())
            .finish_non_exhaustive()
    }
}

impl Contexts {
    /// Subscribes to target events and enables target discovery.
    ///
    /// `target_timeout` bounds how long [`Context::create_target`] waits for
    /// the browser to announce a new target.
    ///
    /// # Errors
    ///
    /// Returns an error if `Target.setDiscoverTargets` fails.
    pub async fn new(
        connection: Connection,
        page_options: PageOptions,
        target_timeout: Duration,
    ) -> Result<Self> {
        let inner = Arc::new(ContextsInner {
            session: Session::browser(connection),
            page_options,
            target_timeout,
            contexts: RwLock::new(FxHashMap::default()),
            default: tokio::sync::Mutex::new(None),
        });

        for method in TARGET_EVENTS {
            let weak = Arc::downgrade(&inner);
            inner.session.on(*method, move |params, _| {
                if let Some(inner) = weak.upgrade() {
                    let event = Event::new(*method, params.clone(), None);
                    handle_target_event(&inner, event.parse());
                }
                Ok(())
            });
        }

        inner
            .session
            .command("Target.setDiscoverTargets", json!({ "discover": true }))
            .await?;

        debug!("Target discovery enabled");
        Ok(Self { inner })
    }

    pub(crate) fn from_inner(inner: Arc<ContextsInner>) -> Self {
        Self { inner }
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Creates a fresh browser context.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn create(&self) -> Result<Context> {
        let reply = self
            .inner
            .session
            .command("Target.createBrowserContext", json!({}))
            .await?;

        let id = reply
            .get("browserContextId")
            .and_then(Value::as_str)
            .map(BrowserContextId::new)
            .ok_or_else(|| Error::protocol("Target.createBrowserContext reply without browserContextId"))?;

        let context = Context::new(
            id.clone(),
            self.inner.session.connection().clone(),
            self.inner.page_options.clone(),
            self.inner.target_timeout,
            Arc::downgrade(&self.inner),
        );

        self.inner.contexts.write().insert(id.clone(), context.clone());
        debug!(context_id = %id, "Context created");
        Ok(context)
    }

    /// Disposes a context and detaches its targets.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for an unknown context, or an error
    /// if the command fails.
    pub async fn dispose(&self, id: &BrowserContextId) -> Result<()> {
        let context = self
            .inner
            .contexts
            .write()
            .remove(id)
            .ok_or_else(|| Error::InvalidArgument {
                message: format!("Unknown browser context {id}"),
            })?;

        {
            let mut default = self.inner.default.lock().await;
            if default.as_ref().is_some_and(|d| d.id() == id) {
                *default = None;
            }
        }

        context.dispose_remote().await
    }

    /// Returns the default context, creating it on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the context cannot be created.
    pub async fn default_context(&self) -> Result<Context> {
        let mut default = self.inner.default.lock().await;
        if let Some(context) = default.as_ref() {
            return Ok(context.clone());
        }

        let context = self.create().await?;
        *default = Some(context.clone());
        Ok(context)
    }

    /// Returns a context by id.
    #[must_use]
    pub fn get(&self, id: &BrowserContextId) -> Option<Context> {
        self.inner.contexts.read().get(id).cloned()
    }

    /// Returns every tracked context.
    #[must_use]
    pub fn all(&self) -> Vec<Context> {
        self.inner.contexts.read().values().cloned().collect()
    }

    /// Returns the context holding `target_id`.
    #[must_use]
    pub fn find_by_target(&self, target_id: &TargetId) -> Option<Context> {
        self.inner
            .contexts
            .read()
            .values()
            .find(|context| context.has_target(target_id))
            .cloned()
    }

    /// Disposes every context.
    ///
    /// Failures are logged; the registry is empty afterwards.
    pub async fn reset(&self) {
        let contexts: Vec<Context> = self
            .inner
            .contexts
            .write()
            .drain()
            .map(|(_, context)| context)
            .collect();
        *self.inner.default.lock().await = None;

        for context in contexts {
            if let Err(e) = context.dispose_remote().await {
                warn!(context_id = %context.id(), error = %e, "Context dispose failed");
            }
        }
    }
}

// ============================================================================
// Event Routing
// ============================================================================

fn handle_target_event(inner: &ContextsInner, event: ParsedEvent) {
    match event {
        ParsedEvent::TargetCreated { info } => {
            upsert(inner, info);
        }

        ParsedEvent::TargetInfoChanged { info } => {
            if let Some(target) = find_target(inner, &info.target_id) {
                target.update(info);
            }
        }

        ParsedEvent::TargetDestroyed { target_id } | ParsedEvent::TargetCrashed { target_id } => {
            remove(inner, &target_id);
        }

        ParsedEvent::AttachedToTarget { session_id, info, .. } => {
            if let Some(target) = upsert(inner, info) {
                target.adopt_session(session_id);
            }
        }

        ParsedEvent::DetachedFromTarget { session_id, target_id } => {
            let target_id = target_id.or_else(|| {
                find_by_session(inner, &session_id).map(|target| target.id().clone())
            });
            if let Some(target_id) = target_id {
                remove(inner, &target_id);
            }
        }

        other => trace!(?other, "Ignored target event"),
    }
}

/// Adds a page target to its context, or refreshes it if already tracked.
fn upsert(inner: &ContextsInner, info: TargetInfo) -> Option<Target> {
    if let Some(target) = find_target(inner, &info.target_id) {
        target.update(info);
        return Some(target);
    }

    if !info.is_page() {
        return None;
    }

    let context_id = info.browser_context_id.clone()?;
    let Some(context) = inner.contexts.read().get(&context_id).cloned() else {
        trace!(%context_id, target_id = %info.target_id, "Target outside tracked contexts");
        return None;
    };

    let target = context.build_target(info);
    debug!(%context_id, target_id = %target.id(), "Target added");
    context.add_target(target.clone());
    Some(target)
}

fn find_target(inner: &ContextsInner, target_id: &TargetId) -> Option<Target> {
    inner
        .contexts
        .read()
        .values()
        .find_map(|context| context.target(target_id))
}

fn find_by_session(inner: &ContextsInner, session_id: &SessionId) -> Option<Target> {
    inner
        .contexts
        .read()
        .values()
        .find_map(|context| context.target_by_session(session_id))
}

fn remove(inner: &ContextsInner, target_id: &TargetId) {
    let contexts: Vec<Context> = inner.contexts.read().values().cloned().collect();
    for context in contexts {
        if context.remove_target(target_id).is_some() {
            debug!(context_id = %context.id(), %target_id, "Target removed");
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
    use crate::transport::memory::{self, FakeBrowserHandle};

    use parking_lot::Mutex;

    fn target_info(id: &str, context: &str, opener: Option<&str>) -> Value {
        json!({
            "targetId": id,
            "type": "page",
            "title": "",
            "url": "about:blank",
            "attached": false,
            "openerId": opener,
            "browserContextId": context
        })
    }

    async fn registry() -> (Contexts, Connection, FakeBrowserHandle, Arc<Mutex<Vec<String>>>) {
        let (writer, reader, browser) = memory::pair();
        let connection = Connection::new(writer, reader, ConnectionOptions::default()).expect("connection");
        let handle = browser.handle();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let log = Arc::clone(&seen);
        browser.serve(move |command, handle| {
            log.lock().push(command.method.clone());
            match command.method.as_str() {
                "Target.createBrowserContext" => Some(Ok(json!({ "browserContextId": "C1" }))),
                "Target.createTarget" => {
                    let id = format!("T{}", command.id);
                    handle.emit(
                        methods::TARGET_CREATED,
                        json!({ "targetInfo": target_info(&id, "C1", None) }),
                        None,
                    );
                    Some(Ok(json!({ "targetId": id })))
                }
                _ => Some(Ok(json!({}))),
            }
        });

        let contexts = Contexts::new(connection.clone(), PageOptions::default(), Duration::from_secs(1))
            .await
            .expect("registry");
        (contexts, connection, handle, seen)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    #[tokio::test]
    async fn test_discovery_enabled_on_start() {
        let (_contexts, _connection, _handle, seen) = registry().await;
        assert_eq!(seen.lock().first().map(String::as_str), Some("Target.setDiscoverTargets"));
    }

    #[tokio::test]
    async fn test_default_context_created_once() {
        let (contexts, _connection, _handle, seen) = registry().await;

        let first = contexts.default_context().await.expect("default");
        let second = contexts.default_context().await.expect("default");
        assert_eq!(first.id(), second.id());

        let creations = seen
            .lock()
            .iter()
            .filter(|method| *method == "Target.createBrowserContext")
            .count();
        assert_eq!(creations, 1);
    }

    #[tokio::test]
    async fn test_create_target_resolved_by_event() {
        let (contexts, _connection, _handle, _seen) = registry().await;
        let context = contexts.create().await.expect("context");

        let target = context.create_target().await.expect("target");
        assert!(context.has_target(target.id()));
        assert_eq!(
            contexts.find_by_target(target.id()).map(|c| c.id().clone()),
            Some(BrowserContextId::new("C1"))
        );
    }

    #[tokio::test]
    async fn test_destroyed_target_detaches_session() {
        let (contexts, connection, handle, _seen) = registry().await;
        let context = contexts.create().await.expect("context");

        handle.emit(
            methods::ATTACHED_TO_TARGET,
            json!({
                "sessionId": "S1",
                "targetInfo": target_info("T9", "C1", None),
                "waitingForDebugger": false
            }),
            None,
        );
        settle().await;
        assert!(context.target_by_session(&SessionId::new("S1")).is_some());

        handle.emit(methods::TARGET_DESTROYED, json!({ "targetId": "T9" }), None);
        settle().await;

        assert!(!context.has_target(&TargetId::new("T9")));
        assert!(connection.is_detached(&SessionId::new("S1")));
    }

    #[tokio::test]
    async fn test_detached_matched_by_session() {
        let (contexts, connection, handle, _seen) = registry().await;
        let context = contexts.create().await.expect("context");

        handle.emit(
            methods::ATTACHED_TO_TARGET,
            json!({ "sessionId": "S2", "targetInfo": target_info("T2", "C1", None) }),
            None,
        );
        settle().await;

        handle.emit(methods::DETACHED_FROM_TARGET, json!({ "sessionId": "S2" }), None);
        settle().await;

        assert!(context.targets().is_empty());
        assert!(connection.is_detached(&SessionId::new("S2")));
    }

    #[tokio::test]
    async fn test_windows_and_info_changes() {
        let (contexts, _connection, handle, _seen) = registry().await;
        let context = contexts.create().await.expect("context");

        handle.emit(
            methods::TARGET_CREATED,
            json!({ "targetInfo": target_info("T1", "C1", None) }),
            None,
        );
        handle.emit(
            methods::TARGET_CREATED,
            json!({ "targetInfo": target_info("T2", "C1", Some("T1")) }),
            None,
        );
        handle.emit(
            methods::TARGET_CREATED,
            json!({ "targetInfo": target_info("T3", "OTHER", None) }),
            None,
        );
        settle().await;

        assert_eq!(context.targets().len(), 2);
        let windows = context.windows();
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].opener_id(), Some(TargetId::new("T1")));

        let mut changed = target_info("T1", "C1", None);
        changed["title"] = json!("Example");
        handle.emit(methods::TARGET_INFO_CHANGED, json!({ "targetInfo": changed }), None);
        settle().await;

        let target = context.target(&TargetId::new("T1")).expect("tracked");
        assert_eq!(target.title(), "Example");
    }

    #[tokio::test]
    async fn test_dispose_removes_context() {
        let (contexts, _connection, _handle, seen) = registry().await;
        let context = contexts.create().await.expect("context");

        context.dispose().await.expect("dispose");
        assert!(contexts.get(context.id()).is_none());
        assert!(seen.lock().iter().any(|m| m == "Target.disposeBrowserContext"));

        let err = contexts.dispose(context.id()).await.expect_err("already gone");
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }

    #[tokio::test]
    async fn test_reset_clears_registry() {
        let (contexts, _connection, _handle, _seen) = registry().await;
        contexts.default_context().await.expect("default");

        contexts.reset().await;
        assert!(contexts.all().is_empty());
    }
}
