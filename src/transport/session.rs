//! Session-scoped view of a connection.
//!
//! One WebSocket serves every attached target. A [`Session`] stamps its
//! `sessionId` on every command and registers listeners under it, so
//! targets never see each other's traffic.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::Duration;

use serde_json::Value;

use crate::error::Result;
use crate::identifiers::{CommandId, SessionId};

use super::{Connection, Delivery};

// ============================================================================
// Session
// ============================================================================

/// Commands and listeners scoped to one attached target.
///
/// The browser-level session has no id and addresses the browser itself.
#[derive(Clone)]
pub struct Session {
    connection: Connection,
    session_id: Option<SessionId>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Creates the browser-level session.
    #[inline]
    #[must_use]
    pub fn browser(connection: Connection) -> Self {
        Self {
            connection,
            session_id: None,
        }
    }

    /// Creates a session for an attached target.
    #[inline]
    #[must_use]
    pub fn attached(connection: Connection, session_id: SessionId) -> Self {
        Self {
            connection,
            session_id: Some(session_id),
        }
    }

    /// Returns the session id, `None` for the browser session.
    #[inline]
    #[must_use]
    pub fn id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    /// Returns the underlying connection.
    #[inline]
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Sends a command on this session and waits for the reply.
    ///
    /// # Errors
    ///
    /// See [`Connection::send`].
    pub async fn command(&self, method: &str, params: Value) -> Result<Value> {
        self.connection
            .send(method, params, self.session_id.as_ref())
            .await
    }

    /// Sends a command with an explicit reply deadline.
    ///
    /// # Errors
    ///
    /// See [`Connection::send_with_timeout`].
    pub async fn command_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value> {
        self.connection
            .send_with_timeout(method, params, self.session_id.as_ref(), timeout)
            .await
    }

    /// Sends a command without waiting for the reply.
    ///
    /// # Errors
    ///
    /// See [`Connection::send_detached`].
    pub async fn command_detached(&self, method: &str, params: Value) -> Result<CommandId> {
        self.connection
            .send_detached(method, params, self.session_id.as_ref())
            .await
    }

    /// Registers a listener for events of this session.
    pub fn on<F>(&self, method: impl Into<String>, listener: F)
    where
        F: Fn(&Value, Delivery) -> Result<()> + Send + Sync + 'static,
    {
        self.connection
            .subscriber()
            .on(method, self.session_id.clone(), listener);
    }

    /// Closes the session.
    ///
    /// Listeners are cleared and pending commands fail with
    /// [`Error::NoSuchTarget`](crate::Error::NoSuchTarget). Closing the
    /// browser session is a no-op.
    pub fn close(&self) {
        if let Some(session_id) = &self.session_id {
            self.connection.detach_session(session_id);
        }
    }

    /// Returns `true` once the session is closed or the connection died.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.connection.is_closed()
            || self
                .session_id
                .as_ref()
                .is_some_and(|session_id| self.connection.is_detached(session_id))
    }
}

// ============================================================================
// Tests
// ============================================================================
