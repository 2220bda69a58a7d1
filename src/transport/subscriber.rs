//! Two-lane event subscriber.
//!
//! Every inbound message without an `id` is an event. The subscriber files
//! it into one of two FIFO lanes by method name and each lane is drained by
//! its own OS thread, so a listener that blocks on the regular lane can
//! never hold back a paused-request or auth-challenge answer on the
//! priority lane.
//!
//! # Listener Contract
//!
//! Listeners are keyed by `(method, session)` and invoked in registration
//! order with the event params and a [`Delivery`] giving their position.
//! A listener error is logged at `warn`, a panic at `error`; the lane keeps
//! running either way.
//!
//! Listeners run on the lane thread with the tokio runtime entered, so
//! they may `tokio::spawn` follow-up work but must not `block_on`.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

use crate::error::Result;
use crate::identifiers::SessionId;
use crate::protocol::{Event, Lane};

// ============================================================================
// Types
// ============================================================================

/// Event listener callback.
pub type Listener = Arc<dyn Fn(&Value, Delivery) -> Result<()> + Send + Sync>;

/// Listeners by session, then by method.
type ListenerMap = FxHashMap<Option<SessionId>, FxHashMap<String, Vec<Listener>>>;

// ============================================================================
// Delivery
// ============================================================================

/// Position of a listener among all listeners receiving one event.
///
/// Lets several listeners for the same event agree on a first-wins or
/// last-wins protocol, e.g. the last interception listener continues any
/// request nobody else handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    /// Zero-based index of this listener.
    pub ordinal: usize,
    /// Number of listeners receiving the event.
    pub total: usize,
}

impl Delivery {
    /// Returns `true` for the first listener.
    #[inline]
    #[must_use]
    pub fn is_first(&self) -> bool {
        self.ordinal == 0
    }

    /// Returns `true` for the last listener.
    #[inline]
    #[must_use]
    pub fn is_last(&self) -> bool {
        self.ordinal + 1 == self.total
    }
}

// ============================================================================
// Subscriber
// ============================================================================

/// Lane senders. Dropping them stops the lane threads.
struct Lanes {
    priority: mpsc::UnboundedSender<Event>,
    regular: mpsc::UnboundedSender<Event>,
}

struct SubscriberInner {
    listeners: RwLock<ListenerMap>,
    lanes: Mutex<Option<Lanes>>,
    closed: AtomicBool,
}

/// Two-lane event subscriber.
///
/// Cheap to clone; all clones share listeners and lanes.
#[derive(Clone)]
pub struct Subscriber {
    inner: Arc<SubscriberInner>,
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Subscriber {
    /// Creates a subscriber and starts both lane threads.
    ///
    /// When called inside a tokio runtime, listeners run with that runtime
    /// entered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if a lane thread cannot be
    /// spawned.
    pub fn new() -> Result<Self> {
        let (priority_tx, priority_rx) = mpsc::unbounded_channel();
        let (regular_tx, regular_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(SubscriberInner {
            listeners: RwLock::new(ListenerMap::default()),
            lanes: Mutex::new(Some(Lanes {
                priority: priority_tx,
                regular: regular_tx,
            })),
            closed: AtomicBool::new(false),
        });

        let runtime = Handle::try_current().ok();
        spawn_lane(Lane::Priority, priority_rx, Arc::downgrade(&inner), runtime.clone())?;
        spawn_lane(Lane::Regular, regular_rx, Arc::downgrade(&inner), runtime)?;

        Ok(Self { inner })
    }

    /// Registers a listener for `method`, scoped to `session_id`.
    ///
    /// Browser-level events carry no session and match `None`.
    pub fn on<F>(&self, method: impl Into<String>, session_id: Option<SessionId>, listener: F)
    where
        F: Fn(&Value, Delivery) -> Result<()> + Send + Sync + 'static,
    {
        let method = method.into();

        if self.is_closed() {
            trace!(%method, "Listener ignored, subscriber closed");
            return;
        }

        self.inner
            .listeners
            .write()
            .entry(session_id)
            .or_default()
            .entry(method)
            .or_default()
            .push(Arc::new(listener));
    }

    /// Queues an event on its lane.
    ///
    /// Events arriving after [`close`](Self::close) are dropped.
    pub fn dispatch(&self, event: Event) {
        let lanes = self.inner.lanes.lock();
        let Some(lanes) = lanes.as_ref() else {
            trace!(method = %event.method, "Event dropped, subscriber closed");
            return;
        };

        let tx = match event.lane() {
            Lane::Priority => &lanes.priority,
            Lane::Regular => &lanes.regular,
        };

        if let Err(e) = tx.send(event) {
            trace!(method = %e.0.method, "Event dropped, lane stopped");
        }
    }

    /// Removes every listener registered for a session.
    pub fn clear_session(&self, session_id: &SessionId) {
        let removed = self
            .inner
            .listeners
            .write()
            .remove(&Some(session_id.clone()));

        if let Some(removed) = removed {
            debug!(%session_id, methods = removed.len(), "Cleared session listeners");
        }
    }

    /// Returns the number of listeners for `(method, session)`.
    #[must_use]
    pub fn listener_count(&self, method: &str, session_id: Option<&SessionId>) -> usize {
        self.inner
            .listeners
            .read()
            .get(&session_id.cloned())
            .and_then(|methods| methods.get(method))
            .map_or(0, Vec::len)
    }

    /// Stops both lanes. Queued, undelivered events are discarded.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.inner.lanes.lock().take();
        self.inner.listeners.write().clear();

        debug!("Subscriber closed");
    }

    /// Returns `true` after [`close`](Self::close).
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

// ============================================================================
// Lane Consumers
// ============================================================================

fn spawn_lane(
    lane: Lane,
    mut rx: mpsc::UnboundedReceiver<Event>,
    subscriber: Weak<SubscriberInner>,
    runtime: Option<Handle>,
) -> Result<()> {
    let name = match lane {
        Lane::Priority => "devtools-priority",
        Lane::Regular => "devtools-regular",
    };

    thread::Builder::new().name(name.to_string()).spawn(move || {
        while let Some(event) = rx.blocking_recv() {
            let Some(inner) = subscriber.upgrade() else {
                break;
            };

            if inner.closed.load(Ordering::Acquire) {
                break;
            }

            let _guard = runtime.as_ref().map(Handle::enter);
            inner.deliver(&event);
        }

        trace!(?lane, "Event lane stopped");
    })?;

    Ok(())
}

impl SubscriberInner {
    /// Invokes every listener for the event, isolating their failures.
    fn deliver(&self, event: &Event) {
        let listeners = {
            let map = self.listeners.read();
            match map
                .get(&event.session_id)
                .and_then(|methods| methods.get(event.method.as_str()))
            {
                Some(listeners) => listeners.clone(),
                None => return,
            }
        };

        let total = listeners.len();
        for (ordinal, listener) in listeners.iter().enumerate() {
            let delivery = Delivery { ordinal, total };

            match panic::catch_unwind(AssertUnwindSafe(|| listener(&event.params, delivery))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(method = %event.method, ordinal, error = %e, "Event listener failed");
                }
                Err(_) => {
                    error!(method = %event.method, ordinal, "Event listener panicked");
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
