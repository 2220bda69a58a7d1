//! Frame and execution-context tracker.
//!
//! Listeners on the page session forward lifecycle events over a channel to
//! a tracker task, which is the only writer of the frame table. Callers read
//! the table concurrently and wait for execution handles on a versioned
//! `watch` signal.
//!
//! # Frame Lifecycle
//!
//! ```text
//! Attached ──started/scheduled──► Navigating ──stopped──► Loaded
//!                                     ▲                      │
//!                                     └──────────────────────┘
//! ```
//!
//! | Event | Effect |
//! |-------|--------|
//! | `Page.frameAttached` | create frame under its parent |
//! | `Page.frameStartedLoading`, `Page.frameScheduledNavigation` | `Navigating`, page not idle |
//! | `Page.frameNavigated`, `Page.navigatedWithinDocument` | name/url update |
//! | `Page.frameStoppedLoading` | `Loaded`; main frame refreshes the document; idle when nothing loads |
//! | `Page.frameDetached` | frame dropped |
//! | `Runtime.executionContextCreated` | handle recorded if the frame has none |
//! | `Runtime.executionContextDestroyed` | handle cleared |
//! | `Runtime.executionContextsCleared` | child frames dropped, main handle cleared |
//!
//! # Main Frame
//!
//! The main frame is confirmed by a `Page.getFrameTree` query issued when
//! the first default execution context appears. If an unrelated context is
//! created while that query is in flight the confirmation can still race;
//! until confirmed, the frame whose id equals the target id is treated as
//! main.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::identifiers::{ExecutionContextId, FrameId, TargetId};
use crate::protocol::{Event, ParsedEvent, methods};
use crate::transport::Session;

use super::idle::IdleSignal;

// ============================================================================
// Constants
// ============================================================================

/// Events consumed by the tracker.
const TRACKED_EVENTS: &[&str] = &[
    methods::FRAME_ATTACHED,
    methods::FRAME_DETACHED,
    methods::FRAME_STARTED_LOADING,
    methods::FRAME_SCHEDULED_NAVIGATION,
    methods::FRAME_NAVIGATED,
    methods::FRAME_STOPPED_LOADING,
    methods::NAVIGATED_WITHIN_DOCUMENT,
    methods::EXECUTION_CONTEXT_CREATED,
    methods::EXECUTION_CONTEXT_DESTROYED,
    methods::EXECUTION_CONTEXTS_CLEARED,
];

// ============================================================================
// Frame
// ============================================================================

/// Navigation state of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// Known, no navigation seen yet.
    Attached,
    /// Loading a document.
    Navigating,
    /// Document loaded.
    Loaded,
    /// Removed from the page.
    Detached,
}

/// A frame inside a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame id.
    pub id: FrameId,
    /// Parent frame, `None` for the main frame.
    pub parent_id: Option<FrameId>,
    /// `name` attribute.
    pub name: String,
    /// Current url.
    pub url: String,
    /// Navigation state.
    pub state: FrameState,
    /// Current execution handle, absent between documents.
    pub execution_id: Option<ExecutionContextId>,
}

impl Frame {
    fn new(id: FrameId, parent_id: Option<FrameId>) -> Self {
        Self {
            id,
            parent_id,
            name: String::new(),
            url: String::new(),
            state: FrameState::Attached,
            execution_id: None,
        }
    }

    /// Returns `true` while the frame is loading.
    #[inline]
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.state == FrameState::Navigating
    }
}

// ============================================================================
// Types
// ============================================================================

/// Input of the tracker task.
#[derive(Debug)]
enum FrameMessage {
    /// Lifecycle event from the session.
    Event(ParsedEvent),
    /// Result of the frame tree query.
    RootFrame {
        candidate: FrameId,
        root: Option<FrameId>,
    },
    /// Result of the document refresh.
    Document(Option<i64>),
}

struct FramesInner {
    target_id: TargetId,
    session: Session,
    frames: RwLock<FxHashMap<FrameId, Frame>>,
    main_frame_id: RwLock<Option<FrameId>>,
    document_node_id: RwLock<Option<i64>>,
    root_query_in_flight: AtomicBool,
    /// Bumped whenever an execution handle or the main frame changes.
    contexts: watch::Sender<u64>,
    idle: IdleSignal,
    tx: mpsc::UnboundedSender<FrameMessage>,
}

// ============================================================================
// Frames
// ============================================================================

/// Frame tree and execution handles of one page.
#[derive(Clone)]
pub struct Frames {
    inner: Arc<FramesInner>,
}

impl fmt::Debug for Frames {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frames")
            .field("target_id", &self.inner.target_id)
            .field("main_frame_id", &self.main_frame_id())
            .field("frames", &self.inner.frames.read().len())
            .finish_non_exhaustive()
    }
}

impl Frames {
    /// Subscribes to the session's lifecycle events and starts the tracker.
    ///
    /// Must be called within a tokio runtime, before the `Page` and
    /// `Runtime` domains are enabled.
    pub(crate) fn new(session: Session, target_id: TargetId, idle: IdleSignal) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (contexts, _) = watch::channel(0);

        for &method in TRACKED_EVENTS {
            let tx = tx.clone();
            session.on(method, move |params: &Value, _| {
                let event = Event::new(method, params.clone(), None).parse();
                tx.send(FrameMessage::Event(event))
                    .map_err(|_| Error::protocol("frame tracker stopped"))
            });
        }

        let inner = Arc::new(FramesInner {
            target_id,
            session,
            frames: RwLock::new(FxHashMap::default()),
            main_frame_id: RwLock::new(None),
            document_node_id: RwLock::new(None),
            root_query_in_flight: AtomicBool::new(false),
            contexts,
            idle,
            tx,
        });

        tokio::spawn(run_tracker(Arc::downgrade(&inner), rx));

        Self { inner }
    }

    /// Returns the confirmed main frame id.
    #[inline]
    #[must_use]
    pub fn main_frame_id(&self) -> Option<FrameId> {
        self.inner.main_frame_id.read().clone()
    }

    /// Returns the main frame.
    #[must_use]
    pub fn main_frame(&self) -> Option<Frame> {
        let id = self.main_frame_id()?;
        self.frame(&id)
    }

    /// Returns `true` if `frame_id` is the main frame.
    ///
    /// Before confirmation the frame sharing the target id counts as main.
    #[must_use]
    pub fn is_main_frame(&self, frame_id: &FrameId) -> bool {
        match self.inner.main_frame_id.read().as_ref() {
            Some(main) => main == frame_id,
            None => frame_id.as_str() == self.inner.target_id.as_str(),
        }
    }

    /// Returns a frame by id.
    #[must_use]
    pub fn frame(&self, frame_id: &FrameId) -> Option<Frame> {
        self.inner.frames.read().get(frame_id).cloned()
    }

    /// Returns the first frame with the given `name` attribute.
    #[must_use]
    pub fn frame_by_name(&self, name: &str) -> Option<Frame> {
        self.inner
            .frames
            .read()
            .values()
            .find(|frame| frame.name == name)
            .cloned()
    }

    /// Returns every tracked frame.
    #[must_use]
    pub fn frames(&self) -> Vec<Frame> {
        self.inner.frames.read().values().cloned().collect()
    }

    /// Returns the root node id of the main document, if fetched.
    #[inline]
    #[must_use]
    pub fn document_node_id(&self) -> Option<i64> {
        *self.inner.document_node_id.read()
    }

    /// Returns the page settlement signal.
    #[inline]
    #[must_use]
    pub fn idle(&self) -> &IdleSignal {
        &self.inner.idle
    }

    /// Returns `true` if no frame is loading and no reset is pending.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.inner.idle.is_idle() && !self.inner.any_loading()
    }

    /// Waits for the execution handle of a frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FrameNotFound`] if the frame is not tracked or is
    /// detached while waiting, and [`Error::NoExecutionContext`] if the
    /// frame has no handle within `timeout`.
    pub async fn frame_execution_handle(
        &self,
        frame_id: &FrameId,
        timeout: Duration,
    ) -> Result<ExecutionContextId> {
        if self.frame(frame_id).is_none() {
            return Err(Error::frame_not_found(frame_id.clone()));
        }

        let handle = self
            .wait_for_handle(timeout, || {
                self.inner
                    .frames
                    .read()
                    .get(frame_id)
                    .and_then(|frame| frame.execution_id)
            })
            .await;

        match handle {
            Some(id) => Ok(id),
            None if self.frame(frame_id).is_none() => Err(Error::frame_not_found(frame_id.clone())),
            None => Err(Error::no_execution_context(format!(
                "Frame {frame_id} has no execution context after {}ms",
                timeout.as_millis()
            ))),
        }
    }

    /// Waits for the execution handle of the main frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoExecutionContext`] on timeout.
    pub async fn main_frame_execution_handle(&self, timeout: Duration) -> Result<ExecutionContextId> {
        self.wait_for_handle(timeout, || {
            let main = self.main_frame_id()?;
            self.inner
                .frames
                .read()
                .get(&main)
                .and_then(|frame| frame.execution_id)
        })
        .await
        .ok_or_else(|| {
            Error::no_execution_context(format!(
                "Main frame has no execution context after {}ms",
                timeout.as_millis()
            ))
        })
    }

    async fn wait_for_handle<F>(&self, timeout: Duration, lookup: F) -> Option<ExecutionContextId>
    where
        F: Fn() -> Option<ExecutionContextId>,
    {
        let deadline = Instant::now() + timeout;
        let mut rx = self.inner.contexts.subscribe();

        loop {
            rx.borrow_and_update();
            if let Some(id) = lookup() {
                return Some(id);
            }

            match timeout_at(deadline, rx.changed()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) | Err(_) => return None,
            }
        }
    }

    #[cfg(test)]
    fn apply(&self, event: ParsedEvent) {
        self.inner.apply(FrameMessage::Event(event));
    }
}

// ============================================================================
// Tracker
// ============================================================================

async fn run_tracker(frames: Weak<FramesInner>, mut rx: mpsc::UnboundedReceiver<FrameMessage>) {
    while let Some(message) = rx.recv().await {
        let Some(inner) = frames.upgrade() else {
            break;
        };
        inner.apply(message);
    }

    trace!("Frame tracker stopped");
}

impl FramesInner {
    fn apply(&self, message: FrameMessage) {
        match message {
            FrameMessage::Event(event) => self.apply_event(event),
            FrameMessage::RootFrame { candidate, root } => self.confirm_main_frame(candidate, root),
            FrameMessage::Document(node_id) => *self.document_node_id.write() = node_id,
        }
    }

    fn apply_event(&self, event: ParsedEvent) {
        match event {
            ParsedEvent::FrameAttached {
                frame_id,
                parent_frame_id,
            } => {
                let mut frames = self.frames.write();
                let frame = frames
                    .entry(frame_id.clone())
                    .or_insert_with(|| Frame::new(frame_id, None));
                if frame.parent_id.is_none() {
                    frame.parent_id = parent_frame_id;
                }
            }

            ParsedEvent::FrameStartedLoading { frame_id }
            | ParsedEvent::FrameScheduledNavigation { frame_id } => {
                self.frames
                    .write()
                    .entry(frame_id.clone())
                    .or_insert_with(|| Frame::new(frame_id, None))
                    .state = FrameState::Navigating;
                self.idle.reset();
            }

            ParsedEvent::FrameNavigated {
                frame_id,
                parent_frame_id,
                name,
                url,
            } => {
                let mut frames = self.frames.write();
                let frame = frames
                    .entry(frame_id.clone())
                    .or_insert_with(|| Frame::new(frame_id, None));
                frame.name = name;
                frame.url = url;
                if parent_frame_id.is_some() {
                    frame.parent_id = parent_frame_id;
                }
            }

            ParsedEvent::NavigatedWithinDocument { frame_id, url } => {
                if let Some(frame) = self.frames.write().get_mut(&frame_id) {
                    frame.url = url;
                }
            }

            ParsedEvent::FrameStoppedLoading { frame_id } => {
                self.frames
                    .write()
                    .entry(frame_id.clone())
                    .or_insert_with(|| Frame::new(frame_id.clone(), None))
                    .state = FrameState::Loaded;

                if self.is_main(&frame_id) {
                    self.refresh_document();
                }

                self.settle();
            }

            ParsedEvent::FrameDetached { frame_id } => {
                if let Some(mut frame) = self.frames.write().remove(&frame_id) {
                    frame.state = FrameState::Detached;
                    trace!(%frame_id, "Frame detached");
                }
                self.settle();
            }

            ParsedEvent::ExecutionContextCreated {
                context_id,
                frame_id,
                is_default,
            } => {
                let Some(frame_id) = frame_id else {
                    return;
                };
                if !is_default {
                    return;
                }

                if self.main_frame_id.read().is_none()
                    && !self.root_query_in_flight.swap(true, Ordering::AcqRel)
                {
                    self.query_root_frame(frame_id.clone());
                }

                let assigned = {
                    let mut frames = self.frames.write();
                    let frame = frames
                        .entry(frame_id.clone())
                        .or_insert_with(|| Frame::new(frame_id.clone(), None));
                    if frame.execution_id.is_none() {
                        frame.execution_id = Some(context_id);
                        true
                    } else {
                        false
                    }
                };

                if assigned {
                    trace!(%frame_id, %context_id, "Execution context assigned");
                    self.bump_contexts();
                }
            }

            ParsedEvent::ExecutionContextDestroyed { context_id } => {
                let cleared = self
                    .frames
                    .write()
                    .values_mut()
                    .find(|frame| frame.execution_id == Some(context_id))
                    .map(|frame| frame.execution_id = None)
                    .is_some();

                if cleared {
                    self.bump_contexts();
                }
            }

            ParsedEvent::ExecutionContextsCleared => {
                let main = self.main_frame_id.read().clone();
                {
                    let mut frames = self.frames.write();
                    match &main {
                        Some(main) => frames.retain(|id, _| id == main),
                        None => frames.retain(|id, _| id.as_str() == self.target_id.as_str()),
                    }
                    for frame in frames.values_mut() {
                        frame.execution_id = None;
                    }
                }

                debug!(target_id = %self.target_id, "Execution contexts cleared");
                self.bump_contexts();
                self.settle();
            }

            _ => {}
        }
    }

    fn any_loading(&self) -> bool {
        self.frames.read().values().any(Frame::is_loading)
    }

    /// Signals idle once no frame is loading.
    fn settle(&self) {
        if !self.any_loading() {
            self.idle.set();
        }
    }

    fn is_main(&self, frame_id: &FrameId) -> bool {
        match self.main_frame_id.read().as_ref() {
            Some(main) => main == frame_id,
            None => frame_id.as_str() == self.target_id.as_str(),
        }
    }

    fn bump_contexts(&self) {
        self.contexts.send_modify(|version| *version += 1);
    }

    fn query_root_frame(&self, candidate: FrameId) {
        let session = self.session.clone();
        let tx = self.tx.clone();

        tokio::spawn(async move {
            let root = match session.command("Page.getFrameTree", json!({})).await {
                Ok(tree) => tree
                    .pointer("/frameTree/frame/id")
                    .and_then(Value::as_str)
                    .map(FrameId::new),
                Err(e) => {
                    debug!(error = %e, "Frame tree query failed");
                    None
                }
            };

            let _ = tx.send(FrameMessage::RootFrame { candidate, root });
        });
    }

    fn confirm_main_frame(&self, candidate: FrameId, root: Option<FrameId>) {
        self.root_query_in_flight.store(false, Ordering::Release);

        let Some(root) = root else {
            return;
        };
        if self.main_frame_id.read().is_some() {
            return;
        }

        let root_has_context = self
            .frames
            .read()
            .get(&root)
            .is_some_and(|frame| frame.execution_id.is_some());

        if root != candidate && !root_has_context {
            trace!(%candidate, %root, "Context frame is not the root frame");
            return;
        }

        {
            let mut frames = self.frames.write();
            let frame = frames
                .entry(root.clone())
                .or_insert_with(|| Frame::new(root.clone(), None));
            frame.parent_id = None;
        }
        *self.main_frame_id.write() = Some(root.clone());

        debug!(main_frame_id = %root, "Main frame confirmed");
        self.bump_contexts();
    }

    fn refresh_document(&self) {
        let session = self.session.clone();
        let tx = self.tx.clone();

        tokio::spawn(async move {
            let node_id = match session.command("DOM.getDocument", json!({ "depth": 0 })).await {
                Ok(document) => document.pointer("/root/nodeId").and_then(Value::as_i64),
                Err(e) => {
                    trace!(error = %e, "Document refresh failed");
                    None
                }
            };

            let _ = tx.send(FrameMessage::Document(node_id));
        });
    }
}

// ============================================================================
// Tests
// ============================================================================
