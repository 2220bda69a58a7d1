//! Command dispatcher and event loop.
//!
//! A [`Connection`] owns one transport. It assigns every command a fresh id,
//! parks the caller on a oneshot in the pending table and resolves it when
//! the reply with that id arrives. Messages without an id are handed to the
//! [`Subscriber`].
//!
//! # Event Loop
//!
//! The connection spawns a tokio task that handles:
//!
//! - Incoming text frames (replies, events)
//! - Outgoing commands queued by callers
//! - Failing every pending command when the transport ends
//!
//! # Resolution
//!
//! | Outcome | Caller sees |
//! |---------|-------------|
//! | reply with `result` | `Ok(result)` (`{}` if absent) |
//! | reply with `error` | typed error from [`Error::from_reply`] |
//! | no reply in time | [`Error::CommandTimeout`], entry removed |
//! | transport closed | [`Error::DeadConnection`] |
//! | session detached | [`Error::NoSuchTarget`] |
//!
//! Ids are never reused, so a reply that arrives after its command timed out
//! finds no entry and is discarded.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{CommandId, CommandIdSequence, SessionId};
use crate::protocol::{Command, Incoming};

use super::{Subscriber, TransportReader, TransportWriter, websocket};

// ============================================================================
// Constants
// ============================================================================

/// Default timeout for command execution.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Default maximum of pending commands before rejecting new ones.
pub const DEFAULT_MAX_PENDING: usize = 1000;

// ============================================================================
// ConnectionOptions
// ============================================================================

/// Dispatcher settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Reply deadline for [`Connection::send`].
    pub timeout: Duration,
    /// Fixed delay before every write, for human-speed runs.
    pub slow_motion: Option<Duration>,
    /// Pending table capacity.
    pub max_pending: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_COMMAND_TIMEOUT,
            slow_motion: None,
            max_pending: DEFAULT_MAX_PENDING,
        }
    }
}

// ============================================================================
// Types
// ============================================================================

/// A command waiting for its reply.
struct PendingCommand {
    reply_tx: oneshot::Sender<Result<Value>>,
    method: String,
    session_id: Option<SessionId>,
}

/// Map of command ids to waiting callers.
type PendingMap = FxHashMap<CommandId, PendingCommand>;

/// Internal commands for the event loop.
enum ConnectionCommand {
    /// Write a serialized command.
    Write { id: CommandId, text: String },
    /// Close the transport.
    Shutdown,
}

/// State shared between callers and the event loop.
struct Shared {
    pending: Mutex<PendingMap>,
    closed: AtomicBool,
    detached: Mutex<FxHashSet<SessionId>>,
    subscriber: Subscriber,
}

struct ConnectionInner {
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
    shared: Arc<Shared>,
    ids: CommandIdSequence,
    options: ConnectionOptions,
}

// ============================================================================
// Connection
// ============================================================================

/// Protocol connection to a browser.
///
/// # Thread Safety
///
/// `Connection` is `Send + Sync` and cheap to clone; clones share the
/// transport, pending table and subscriber.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("pending", &self.pending_count())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Creates a connection over a transport and spawns its event loop.
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the subscriber lanes cannot be started.
    pub fn new<W, R>(writer: W, reader: R, options: ConnectionOptions) -> Result<Self>
    where
        W: TransportWriter + 'static,
        R: TransportReader + 'static,
    {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            pending: Mutex::new(PendingMap::default()),
            closed: AtomicBool::new(false),
            detached: Mutex::new(FxHashSet::default()),
            subscriber: Subscriber::new()?,
        });

        tokio::spawn(run_event_loop(
            Box::new(writer),
            Box::new(reader),
            command_rx,
            Arc::clone(&shared),
        ));

        Ok(Self {
            inner: Arc::new(ConnectionInner {
                command_tx,
                shared,
                ids: CommandIdSequence::new(),
                options,
            }),
        })
    }

    /// Connects to a DevTools WebSocket endpoint.
    ///
    /// # Errors
    ///
    /// See [`websocket::connect`].
    pub async fn connect(url: &str, options: ConnectionOptions) -> Result<Self> {
        let (writer, reader) = websocket::connect(url).await?;
        Self::new(writer, reader, options)
    }

    /// Returns the event subscriber.
    #[inline]
    #[must_use]
    pub fn subscriber(&self) -> &Subscriber {
        &self.inner.shared.subscriber
    }

    /// Returns the dispatcher settings.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &ConnectionOptions {
        &self.inner.options
    }

    /// Sends a command and waits for its reply with the default timeout.
    ///
    /// # Errors
    ///
    /// - [`Error::DeadConnection`] if the transport is closed
    /// - [`Error::NoSuchTarget`] if the session was detached
    /// - [`Error::CommandTimeout`] if no reply arrives in time
    /// - [`Error::Protocol`] if too many commands are pending
    /// - the typed reply error if the browser rejects the command
    pub async fn send(
        &self,
        method: &str,
        params: Value,
        session_id: Option<&SessionId>,
    ) -> Result<Value> {
        self.send_with_timeout(method, params, session_id, self.inner.options.timeout)
            .await
    }

    /// Sends a command and waits for its reply with a custom timeout.
    ///
    /// # Errors
    ///
    /// Same as [`send`](Self::send).
    pub async fn send_with_timeout(
        &self,
        method: &str,
        params: Value,
        session_id: Option<&SessionId>,
        command_timeout: Duration,
    ) -> Result<Value> {
        self.check_open(session_id)?;

        {
            let pending = self.inner.shared.pending.lock();
            let max = self.inner.options.max_pending;
            if pending.len() >= max {
                warn!(pending = pending.len(), max, "Too many pending commands");
                return Err(Error::protocol(format!(
                    "Too many pending commands: {}/{}",
                    pending.len(),
                    max
                )));
            }
        }

        let id = self.inner.ids.next_id();
        let text = serde_json::to_string(&Command::new(id, method, params, session_id.cloned()))?;
        let (reply_tx, reply_rx) = oneshot::channel();

        self.inner.shared.pending.lock().insert(
            id,
            PendingCommand {
                reply_tx,
                method: method.to_string(),
                session_id: session_id.cloned(),
            },
        );

        // The loop may have drained the table between the check and the insert.
        if let Err(e) = self.check_open(session_id) {
            self.inner.shared.pending.lock().remove(&id);
            return Err(e);
        }

        self.write(id, text).await.inspect_err(|_| {
            self.inner.shared.pending.lock().remove(&id);
        })?;

        trace!(command_id = %id, %method, session_id = ?session_id, "Command sent");

        match timeout(command_timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::DeadConnection),
            Err(_) => {
                self.inner.shared.pending.lock().remove(&id);
                debug!(command_id = %id, %method, "Command timed out");

                Err(Error::command_timeout(
                    id,
                    method,
                    u64::try_from(command_timeout.as_millis()).unwrap_or(u64::MAX),
                ))
            }
        }
    }

    /// Sends a command without waiting for a reply.
    ///
    /// No pending entry is created; the eventual reply is discarded.
    ///
    /// # Errors
    ///
    /// - [`Error::DeadConnection`] if the transport is closed
    /// - [`Error::NoSuchTarget`] if the session was detached
    pub async fn send_detached(
        &self,
        method: &str,
        params: Value,
        session_id: Option<&SessionId>,
    ) -> Result<CommandId> {
        self.check_open(session_id)?;

        let id = self.inner.ids.next_id();
        let text = serde_json::to_string(&Command::new(id, method, params, session_id.cloned()))?;
        self.write(id, text).await?;

        trace!(command_id = %id, %method, session_id = ?session_id, "Detached command sent");
        Ok(id)
    }

    /// Queues a serialized command for the event loop.
    async fn write(&self, id: CommandId, text: String) -> Result<()> {
        if let Some(delay) = self.inner.options.slow_motion {
            sleep(delay).await;
        }

        self.inner
            .command_tx
            .send(ConnectionCommand::Write { id, text })
            .map_err(|_| Error::DeadConnection)
    }

    fn check_open(&self, session_id: Option<&SessionId>) -> Result<()> {
        if self.is_closed() {
            return Err(Error::DeadConnection);
        }

        if let Some(session_id) = session_id
            && self.inner.shared.detached.lock().contains(session_id)
        {
            return Err(Error::no_such_target(format!(
                "Session {session_id} is detached"
            )));
        }

        Ok(())
    }

    /// Detaches a session.
    ///
    /// Its listeners are removed, its pending commands fail with
    /// [`Error::NoSuchTarget`] and later sends on it are rejected.
    pub fn detach_session(&self, session_id: &SessionId) {
        if !self.inner.shared.detached.lock().insert(session_id.clone()) {
            return;
        }

        self.inner.shared.subscriber.clear_session(session_id);

        let failed: Vec<PendingCommand> = {
            let mut pending = self.inner.shared.pending.lock();
            let ids: Vec<CommandId> = pending
                .iter()
                .filter(|(_, command)| command.session_id.as_ref() == Some(session_id))
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter().filter_map(|id| pending.remove(&id)).collect()
        };

        let count = failed.len();
        for command in failed {
            let _ = command.reply_tx.send(Err(Error::no_such_target(format!(
                "Session {session_id} detached while {} was pending",
                command.method
            ))));
        }

        debug!(%session_id, failed = count, "Session detached");
    }

    /// Returns `true` if the session was detached.
    #[inline]
    #[must_use]
    pub fn is_detached(&self, session_id: &SessionId) -> bool {
        self.inner.shared.detached.lock().contains(session_id)
    }

    /// Returns the number of pending commands.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.shared.pending.lock().len()
    }

    /// Returns `true` once the transport has closed.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.shared.closed.load(Ordering::Acquire)
    }

    /// Closes the transport.
    ///
    /// Pending commands fail with [`Error::DeadConnection`].
    pub fn close(&self) {
        self.inner.shared.closed.store(true, Ordering::Release);
        let _ = self.inner.command_tx.send(ConnectionCommand::Shutdown);
    }
}

// ============================================================================
// Event Loop
// ============================================================================

/// Event loop that handles transport I/O.
async fn run_event_loop(
    mut writer: Box<dyn TransportWriter>,
    mut reader: Box<dyn TransportReader>,
    mut command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
    shared: Arc<Shared>,
) {
    loop {
        tokio::select! {
            // Incoming frames from the browser
            message = reader.receive() => {
                match message {
                    Some(Ok(text)) => handle_incoming_message(&text, &shared),

                    Some(Err(e)) => {
                        error!(error = %e, "Transport error");
                        break;
                    }

                    None => {
                        debug!("Transport stream ended");
                        break;
                    }
                }
            }

            // Commands from callers
            command = command_rx.recv() => {
                match command {
                    Some(ConnectionCommand::Write { id, text }) => {
                        if let Err(e) = writer.send(text).await {
                            error!(command_id = %id, error = %e, "Failed to write command");

                            if let Some(command) = shared.pending.lock().remove(&id) {
                                let _ = command.reply_tx.send(Err(Error::connection(e.to_string())));
                            }
                            break;
                        }
                    }

                    Some(ConnectionCommand::Shutdown) => {
                        debug!("Shutdown command received");
                        break;
                    }

                    None => {
                        debug!("Command channel closed");
                        break;
                    }
                }
            }
        }
    }

    shared.closed.store(true, Ordering::Release);
    if let Err(e) = writer.close().await {
        trace!(error = %e, "Transport close failed");
    }

    fail_pending_commands(&shared);
    shared.subscriber.close();

    debug!("Event loop terminated");
}

/// Routes an inbound frame to the pending table or the subscriber.
fn handle_incoming_message(text: &str, shared: &Shared) {
    match Incoming::parse(text) {
        Ok(Incoming::Reply(reply)) => {
            let id = reply.id;
            let command = shared.pending.lock().remove(&id);

            match command {
                Some(command) => {
                    trace!(command_id = %id, method = %command.method, "Reply received");
                    let _ = command.reply_tx.send(reply.into_result());
                }
                None => trace!(command_id = %id, "Unmatched reply discarded"),
            }
        }

        Ok(Incoming::Event(event)) => shared.subscriber.dispatch(event),

        Err(e) => warn!(error = %e, text = %text, "Failed to parse incoming message"),
    }
}

/// Fails all pending commands with DeadConnection.
fn fail_pending_commands(shared: &Shared) {
    let pending: Vec<_> = shared.pending.lock().drain().collect();
    let count = pending.len();

    for (_, command) in pending {
        let _ = command.reply_tx.send(Err(Error::DeadConnection));
    }

    if count > 0 {
        debug!(count, "Failed pending commands on shutdown");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;
    use serde_json::json;
    use tokio::time::Instant;
    use tokio_test::assert_ok;

    use crate::transport::memory::{self, FakeBrowser};

    fn connect(options: ConnectionOptions) -> (Connection, FakeBrowser) {
        let (writer, reader, browser) = memory::pair();
        let connection = Connection::new(writer, reader, options).expect("connection");
        (connection, browser)
    }

    fn short_timeout() -> ConnectionOptions {
        ConnectionOptions {
            timeout: Duration::from_millis(200),
            ..ConnectionOptions::default()
        }
    }

    #[test]
    fn test_default_options() {
        let options = ConnectionOptions::default();
        assert_eq!(options.timeout, Duration::from_secs(5));
        assert_eq!(options.max_pending, 1000);
        assert!(options.slow_motion.is_none());
    }

    #[tokio::test]
    async fn test_reply_resolves_command() {
        let (connection, mut browser) = connect(ConnectionOptions::default());

        let call = tokio::spawn({
            let connection = connection.clone();
            async move { connection.send("Browser.getVersion", json!({}), None).await }
        });

        let command = browser.next_command().await.expect("command");
        assert_eq!(command.method, "Browser.getVersion");
        browser.reply(command.id, json!({ "product": "Fake/1.0" }));

        let result = assert_ok!(call.await.expect("join"));
        assert_eq!(result["product"], "Fake/1.0");
        assert_eq!(connection.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_result_is_empty_object() {
        let (connection, mut browser) = connect(ConnectionOptions::default());

        let call = tokio::spawn({
            let connection = connection.clone();
            async move { connection.send("Page.enable", json!(null), None).await }
        });

        let command = browser.next_command().await.expect("command");
        assert_eq!(command.params, json!({}));
        browser.handle().send_raw(format!(r#"{{"id":{}}}"#, command.id));

        assert_eq!(call.await.expect("join").expect("result"), json!({}));
    }

    #[tokio::test]
    async fn test_error_reply_is_classified() {
        let (connection, mut browser) = connect(ConnectionOptions::default());

        let call = tokio::spawn({
            let connection = connection.clone();
            async move { connection.send("DOM.resolveNode", json!({ "nodeId": 9 }), None).await }
        });

        let command = browser.next_command().await.expect("command");
        browser.reply_error(command.id, -32000, "No node with given id found");

        let err = call.await.expect("join").expect_err("error reply");
        assert!(matches!(err, Error::NodeNotFound { .. }));
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn test_session_id_is_sent() {
        let (connection, mut browser) = connect(ConnectionOptions::default());
        let session = SessionId::new("S1");

        let id = connection
            .send_detached("Runtime.enable", json!({}), Some(&session))
            .await
            .expect("sent");

        let command = browser.next_command().await.expect("command");
        assert_eq!(command.id, id);
        assert_eq!(command.session_id, Some(session));
    }

    #[tokio::test]
    async fn test_timeout_removes_pending_entry() {
        let (connection, mut browser) = connect(short_timeout());

        let call = tokio::spawn({
            let connection = connection.clone();
            async move { connection.send("Page.navigate", json!({}), None).await }
        });

        let command = browser.next_command().await.expect("command");
        let err = call.await.expect("join").expect_err("timeout");
        assert!(matches!(err, Error::CommandTimeout { command_id, .. } if command_id == command.id));
        assert_eq!(connection.pending_count(), 0);

        // A late reply is discarded and the next command still correlates.
        browser.reply(command.id, json!({ "late": true }));

        let call = tokio::spawn({
            let connection = connection.clone();
            async move { connection.send("Page.reload", json!({}), None).await }
        });
        let next = browser.next_command().await.expect("command");
        assert!(next.id > command.id);
        browser.reply(next.id, json!({ "fresh": true }));

        assert_eq!(call.await.expect("join").expect("result"), json!({ "fresh": true }));
    }

    #[tokio::test]
    async fn test_dead_connection_fails_all_pending() {
        let (connection, mut browser) = connect(ConnectionOptions::default());

        let calls: Vec<_> = (0..3)
            .map(|i| {
                let connection = connection.clone();
                tokio::spawn(async move {
                    connection.send("Runtime.evaluate", json!({ "n": i }), None).await
                })
            })
            .collect();

        for _ in 0..3 {
            browser.next_command().await.expect("command");
        }
        browser.close();

        for call in calls {
            let err = call.await.expect("join").expect_err("dead connection");
            assert!(matches!(err, Error::DeadConnection));
        }

        assert!(connection.is_closed());
        let err = connection
            .send("Browser.getVersion", json!({}), None)
            .await
            .expect_err("closed");
        assert!(matches!(err, Error::DeadConnection));
    }

    #[tokio::test]
    async fn test_close_fails_pending() {
        let (connection, mut browser) = connect(ConnectionOptions::default());

        let call = tokio::spawn({
            let connection = connection.clone();
            async move { connection.send("Page.navigate", json!({}), None).await }
        });

        browser.next_command().await.expect("command");
        connection.close();

        let err = call.await.expect("join").expect_err("closed");
        assert!(matches!(err, Error::DeadConnection));
        assert!(browser.next_command().await.is_none());
    }

    #[tokio::test]
    async fn test_detach_session_fails_its_pending() {
        let (connection, mut browser) = connect(ConnectionOptions::default());
        let session = SessionId::new("S1");

        let scoped = tokio::spawn({
            let connection = connection.clone();
            let session = session.clone();
            async move { connection.send("Page.navigate", json!({}), Some(&session)).await }
        });
        let unscoped = tokio::spawn({
            let connection = connection.clone();
            async move { connection.send("Browser.getVersion", json!({}), None).await }
        });

        let first = browser.next_command().await.expect("command");
        let second = browser.next_command().await.expect("command");

        connection.detach_session(&session);

        let err = scoped.await.expect("join").expect_err("detached");
        assert!(matches!(err, Error::NoSuchTarget { .. }));

        let browser_level = if first.session_id.is_none() { first } else { second };
        browser.reply(browser_level.id, json!({}));
        assert_ok!(unscoped.await.expect("join"));

        assert!(connection.is_detached(&session));
        let err = connection
            .send("Page.reload", json!({}), Some(&session))
            .await
            .expect_err("detached");
        assert!(matches!(err, Error::NoSuchTarget { .. }));
    }

    #[tokio::test]
    async fn test_pending_limit() {
        let (connection, mut browser) = connect(ConnectionOptions {
            max_pending: 1,
            ..ConnectionOptions::default()
        });

        let first = tokio::spawn({
            let connection = connection.clone();
            async move { connection.send("Page.navigate", json!({}), None).await }
        });
        let command = browser.next_command().await.expect("command");

        let err = connection
            .send("Page.reload", json!({}), None)
            .await
            .expect_err("limit");
        assert!(matches!(err, Error::Protocol { .. }));

        browser.reply(command.id, json!({}));
        assert_ok!(first.await.expect("join"));
    }

    #[tokio::test]
    async fn test_events_reach_subscriber() {
        let (connection, browser) = connect(ConnectionOptions::default());
        let (tx, mut rx) = mpsc::unbounded_channel();

        connection
            .subscriber()
            .on("Page.loadEventFired", None, move |params, _| {
                let _ = tx.send(params.clone());
                Ok(())
            });

        browser.emit("Page.loadEventFired", json!({ "timestamp": 1.5 }), None);

        let params = timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("event delivered")
            .expect("sender alive");
        assert_eq!(params["timestamp"], 1.5);
    }

    #[tokio::test]
    async fn test_slow_motion_delays_write() {
        let (connection, mut browser) = connect(ConnectionOptions {
            slow_motion: Some(Duration::from_millis(50)),
            ..ConnectionOptions::default()
        });

        let start = Instant::now();
        connection
            .send_detached("Page.enable", json!({}), None)
            .await
            .expect("sent");
        browser.next_command().await.expect("command");

        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_replies_correlate_regardless_of_order(
            order in (1usize..16).prop_flat_map(|n| Just((0..n).collect::<Vec<_>>()).prop_shuffle())
        ) {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
                .expect("runtime");

            let outcomes = runtime.block_on(async move {
                let (connection, mut browser) = connect(ConnectionOptions::default());
                let n = order.len();

                let calls: Vec<_> = (0..n)
                    .map(|i| {
                        let connection = connection.clone();
                        tokio::spawn(async move {
                            let result = connection
                                .send("Runtime.evaluate", json!({ "n": i }), None)
                                .await;
                            (i, result)
                        })
                    })
                    .collect();

                let mut commands = Vec::with_capacity(n);
                for _ in 0..n {
                    commands.push(browser.next_command().await.expect("command"));
                }

                for position in &order {
                    let command = &commands[*position];
                    browser.reply(command.id, json!({ "echo": command.params["n"] }));
                }

                let mut outcomes = Vec::with_capacity(n);
                for call in calls {
                    outcomes.push(call.await.expect("join"));
                }
                outcomes
            });

            for (i, result) in outcomes {
                let value = result.expect("reply");
                prop_assert_eq!(value["echo"].as_u64(), Some(i as u64));
            }
        }
    }
}
