//! Error types for the protocol engine.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use devtools_engine::{Error, Result};
//!
//! async fn example(page: &Page) -> Result<()> {
//!     page.go_to("https://example.com").await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Process | [`Error::BinaryNotFound`], [`Error::ProcessLaunchFailed`], [`Error::ProcessTimeout`] |
//! | Connection | [`Error::Connection`], [`Error::DeadConnection`] |
//! | Browser reply | [`Error::NodeNotFound`], [`Error::NoExecutionContext`], [`Error::NoSuchTarget`], [`Error::NoSuchPage`], [`Error::CoordinatesNotFound`], [`Error::UnknownMethod`], [`Error::InvalidArgument`], [`Error::Browser`] |
//! | Timing | [`Error::CommandTimeout`], [`Error::Timeout`] |
//! | Script | [`Error::Script`], [`Error::ScriptTimeout`] |
//! | Navigation | [`Error::Status`], [`Error::PendingConnections`], [`Error::FrameNotFound`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::path::PathBuf;
use std::result::Result as StdResult;

use serde_json::Value;
use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::{CommandId, FrameId};
use crate::protocol::ReplyError;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Protocol Error Codes
// ============================================================================

/// JSON-RPC "method not found".
const CODE_METHOD_NOT_FOUND: i64 = -32601;

/// JSON-RPC "invalid params".
const CODE_INVALID_PARAMS: i64 = -32602;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when builder configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Process Errors
    // ========================================================================
    /// Browser binary not found at path.
    #[error("Browser binary not found at: {path}")]
    BinaryNotFound {
        /// Path where the binary was expected.
        path: PathBuf,
    },

    /// Failed to launch the browser process.
    #[error("Failed to launch browser: {message}")]
    ProcessLaunchFailed {
        /// Description of the launch failure.
        message: String,
    },

    /// The browser did not announce a listening endpoint in time.
    #[error("Browser did not announce a DevTools endpoint within {timeout_ms}ms")]
    ProcessTimeout {
        /// Milliseconds waited.
        timeout_ms: u64,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// WebSocket connection could not be established.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// The transport closed. Every pending and future command fails with this.
    #[error("Browser connection is dead")]
    DeadConnection,

    /// Protocol violation or unexpected message shape.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // Browser Reply Errors
    // ========================================================================
    /// The referenced DOM node no longer exists.
    #[error("Node not found: {message}")]
    NodeNotFound {
        /// Browser message.
        message: String,
    },

    /// The referenced execution context is gone or not created yet.
    #[error("No execution context: {message}")]
    NoExecutionContext {
        /// Browser message or local description.
        message: String,
    },

    /// The target or its session is gone.
    #[error("No such target: {message}")]
    NoSuchTarget {
        /// Browser message or local description.
        message: String,
    },

    /// The page was closed or navigated away mid-command.
    #[error("No such page: {message}")]
    NoSuchPage {
        /// Browser message.
        message: String,
    },

    /// Element geometry could not be computed.
    #[error("Coordinates not found: {message}")]
    CoordinatesNotFound {
        /// Browser message.
        message: String,
    },

    /// The browser does not know the method.
    #[error("Unknown method: {message}")]
    UnknownMethod {
        /// Browser message.
        message: String,
    },

    /// The browser rejected command parameters.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Browser message.
        message: String,
    },

    /// Any other error reply.
    #[error("Browser error {code}: {message}")]
    Browser {
        /// Protocol error code.
        code: i64,
        /// Browser message.
        message: String,
        /// Optional extra data.
        data: Option<Value>,
    },

    // ========================================================================
    // Timing Errors
    // ========================================================================
    /// No reply to a command within its deadline.
    #[error("Command {command_id} ({method}) timed out after {timeout_ms}ms")]
    CommandTimeout {
        /// The command that timed out.
        command_id: CommandId,
        /// Method name of the command.
        method: String,
        /// Milliseconds waited.
        timeout_ms: u64,
    },

    /// A wait operation exceeded its deadline.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
        /// Milliseconds waited.
        timeout_ms: u64,
    },

    // ========================================================================
    // Script Errors
    // ========================================================================
    /// Script threw an exception.
    #[error("Script error ({class_name}): {description}")]
    Script {
        /// Class of the thrown value (`Error`, `TypeError`, ...).
        class_name: String,
        /// Description or message of the thrown value.
        description: String,
    },

    /// Asynchronous script did not settle within its wait time.
    #[error("Script did not settle within {timeout_ms}ms")]
    ScriptTimeout {
        /// Milliseconds the script was given.
        timeout_ms: u64,
    },

    // ========================================================================
    // Navigation Errors
    // ========================================================================
    /// Navigation request failed at the network level.
    #[error("Request to {url} failed ({message})")]
    Status {
        /// URL being navigated to.
        url: String,
        /// Browser `errorText`.
        message: String,
    },

    /// Navigation timed out with network traffic still pending.
    #[error("Request to {url} reached server, but there are still pending connections: {}", pending.join(", "))]
    PendingConnections {
        /// URL being navigated to.
        url: String,
        /// URLs of unresolved exchanges.
        pending: Vec<String>,
    },

    /// Frame not found.
    #[error("Frame not found: {frame_id}")]
    FrameNotFound {
        /// The missing frame id.
        frame_id: FrameId,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

// ============================================================================
// ErrorKind
// ============================================================================

/// Stable category of an [`enum@Error`], used as the key of retry policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// [`Error::NodeNotFound`].
    NodeNotFound,
    /// [`Error::NoExecutionContext`].
    NoExecutionContext,
    /// [`Error::NoSuchTarget`].
    NoSuchTarget,
    /// [`Error::NoSuchPage`].
    NoSuchPage,
    /// [`Error::CoordinatesNotFound`].
    CoordinatesNotFound,
    /// Command or wait timeout.
    Timeout,
    /// Transport failure.
    Connection,
    /// Script exception or script timeout.
    Script,
    /// Anything else.
    Other,
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a binary not found error.
    #[inline]
    pub fn binary_not_found(path: impl Into<PathBuf>) -> Self {
        Self::BinaryNotFound { path: path.into() }
    }

    /// Creates a process launch failed error.
    #[inline]
    pub fn process_launch_failed(err: IoError) -> Self {
        Self::ProcessLaunchFailed {
            message: err.to_string(),
        }
    }

    /// Creates a process timeout error.
    #[inline]
    pub fn process_timeout(timeout_ms: u64) -> Self {
        Self::ProcessTimeout { timeout_ms }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a no execution context error.
    #[inline]
    pub fn no_execution_context(message: impl Into<String>) -> Self {
        Self::NoExecutionContext {
            message: message.into(),
        }
    }

    /// Creates a no such target error.
    #[inline]
    pub fn no_such_target(message: impl Into<String>) -> Self {
        Self::NoSuchTarget {
            message: message.into(),
        }
    }

    /// Creates a command timeout error.
    #[inline]
    pub fn command_timeout(command_id: CommandId, method: impl Into<String>, timeout_ms: u64) -> Self {
        Self::CommandTimeout {
            command_id,
            method: method.into(),
            timeout_ms,
        }
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Creates a script error.
    #[inline]
    pub fn script(class_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::Script {
            class_name: class_name.into(),
            description: description.into(),
        }
    }

    /// Creates a navigation status error.
    #[inline]
    pub fn status(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Status {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Creates a frame not found error.
    #[inline]
    pub fn frame_not_found(frame_id: FrameId) -> Self {
        Self::FrameNotFound { frame_id }
    }

    /// Builds the typed error for a browser error reply.
    ///
    /// The numeric code is consulted first. Chromium reports most failures
    /// as the generic server error `-32000`, so the message text decides
    /// the category for those.
    #[must_use]
    pub fn from_reply(error: ReplyError) -> Self {
        let ReplyError {
            code,
            message,
            data,
        } = error;

        match code {
            CODE_METHOD_NOT_FOUND => return Self::UnknownMethod { message },
            CODE_INVALID_PARAMS => return Self::InvalidArgument { message },
            _ => {}
        }

        if message.contains("No node with given id found")
            || message.contains("Could not find node with given id")
            || message.contains("Node with given id does not belong to the document")
        {
            Self::NodeNotFound { message }
        } else if message.contains("Cannot find context with specified id")
            || message.contains("Cannot find default execution context")
            || message.contains("Execution context was destroyed")
        {
            Self::NoExecutionContext { message }
        } else if message.contains("No target with given id found") {
            Self::NoSuchTarget { message }
        } else if message.contains("Session with given id not found")
            || message.contains("Inspected target navigated or closed")
        {
            Self::NoSuchPage { message }
        } else if message.contains("Could not compute content quads") {
            Self::CoordinatesNotFound { message }
        } else {
            Self::Browser {
                code,
                message,
                data,
            }
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns the stable category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NodeNotFound { .. } => ErrorKind::NodeNotFound,
            Self::NoExecutionContext { .. } => ErrorKind::NoExecutionContext,
            Self::NoSuchTarget { .. } => ErrorKind::NoSuchTarget,
            Self::NoSuchPage { .. } => ErrorKind::NoSuchPage,
            Self::CoordinatesNotFound { .. } => ErrorKind::CoordinatesNotFound,
            Self::CommandTimeout { .. } | Self::Timeout { .. } | Self::ProcessTimeout { .. } => {
                ErrorKind::Timeout
            }
            Self::Connection { .. } | Self::DeadConnection | Self::WebSocket(_) => {
                ErrorKind::Connection
            }
            Self::Script { .. } | Self::ScriptTimeout { .. } => ErrorKind::Script,
            _ => ErrorKind::Other,
        }
    }

    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        self.kind() == ErrorKind::Connection
    }

    /// Returns `true` if this error is expected to heal on its own.
    ///
    /// Nodes and execution contexts are recreated after a navigation, so
    /// commands that hit these are worth retrying.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::NodeNotFound | ErrorKind::NoExecutionContext
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind as IoErrorKind;

    fn reply(code: i64, message: &str) -> ReplyError {
        ReplyError {
            code,
            message: message.to_string(),
            data: None,
        }
    }

    #[test]
    fn test_error_display() {
        let err = Error::connection("refused");
        assert_eq!(err.to_string(), "Connection failed: refused");
        assert_eq!(Error::DeadConnection.to_string(), "Browser connection is dead");
    }

    #[test]
    fn test_classification_by_code() {
        let err = Error::from_reply(reply(-32601, "'Foo.bar' wasn't found"));
        assert!(matches!(err, Error::UnknownMethod { .. }));

        let err = Error::from_reply(reply(-32602, "Invalid parameters"));
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }

    #[test]
    fn test_classification_by_message() {
        let cases = [
            ("No node with given id found", ErrorKind::NodeNotFound),
            ("Could not find node with given id", ErrorKind::NodeNotFound),
            ("Cannot find context with specified id", ErrorKind::NoExecutionContext),
            ("Execution context was destroyed.", ErrorKind::NoExecutionContext),
            ("No target with given id found", ErrorKind::NoSuchTarget),
            ("Session with given id not found.", ErrorKind::NoSuchPage),
            ("Could not compute content quads.", ErrorKind::CoordinatesNotFound),
        ];

        for (message, kind) in cases {
            assert_eq!(Error::from_reply(reply(-32000, message)).kind(), kind, "{message}");
        }
    }

    #[test]
    fn test_generic_browser_error_keeps_code_and_data() {
        let err = Error::from_reply(ReplyError {
            code: -32000,
            message: "Something odd".into(),
            data: Some(Value::from("detail")),
        });

        match err {
            Error::Browser { code, data, .. } => {
                assert_eq!(code, -32000);
                assert_eq!(data, Some(Value::from("detail")));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_predicates() {
        let timeout = Error::command_timeout(CommandId::new(3), "Page.navigate", 100);
        assert!(timeout.is_timeout());
        assert!(!timeout.is_recoverable());

        assert!(Error::DeadConnection.is_connection_error());
        assert!(Error::no_execution_context("gone").is_recoverable());
        assert!(!Error::config("bad").is_recoverable());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(IoErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_pending_connections_display() {
        let err = Error::PendingConnections {
            url: "http://x/".into(),
            pending: vec!["http://x/a.js".into(), "http://x/b.css".into()],
        };
        assert!(err.to_string().ends_with("http://x/a.js, http://x/b.css"));
    }
}
