//! Command and Reply envelopes.
//!
//! Every inbound text frame is classified once by [`Incoming::parse`]: a
//! message carrying an `id` is a reply, anything else with a `method` is an
//! event.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::identifiers::{CommandId, SessionId};

use super::Event;

// ============================================================================
// Command
// ============================================================================

/// A command from local end to browser.
///
/// # Format
///
/// ```json
/// {
///   "id": 12,
///   "method": "Page.navigate",
///   "params": { "url": "https://example.com" },
///   "sessionId": "8E1B..."
/// }
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct Command {
    /// Identifier for reply correlation.
    pub id: CommandId,

    /// Method in `Domain.method` format.
    pub method: String,

    /// Opaque parameters.
    pub params: Value,

    /// Target session, absent for browser-level commands.
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
}

impl Command {
    /// Creates a new command.
    ///
    /// `Null` params are sent as an empty object since the browser rejects
    /// `"params": null`.
    #[must_use]
    pub fn new(
        id: CommandId,
        method: impl Into<String>,
        params: Value,
        session_id: Option<SessionId>,
    ) -> Self {
        let params = match params {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };

        Self {
            id,
            method: method.into(),
            params,
            session_id,
        }
    }
}

// ============================================================================
// Reply
// ============================================================================

/// A reply from browser to local end.
///
/// # Format
///
/// ```json
/// { "id": 12, "result": { "frameId": "F1" } }
/// { "id": 13, "error": { "code": -32000, "message": "No node with given id found" } }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Reply {
    /// Matches the command `id`.
    pub id: CommandId,

    /// Result data (if success).
    #[serde(default)]
    pub result: Option<Value>,

    /// Error object (if failure).
    #[serde(default)]
    pub error: Option<ReplyError>,

    /// Session the command was sent to.
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<SessionId>,
}

impl Reply {
    /// Returns `true` if this is an error reply.
    #[inline]
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Extracts the result value, converting error replies into typed errors.
    ///
    /// A success reply without `result` yields an empty object.
    ///
    /// # Errors
    ///
    /// Returns the error built by [`Error::from_reply`].
    pub fn into_result(self) -> Result<Value> {
        match self.error {
            Some(error) => Err(Error::from_reply(error)),
            None => Ok(self.result.unwrap_or_else(|| Value::Object(Map::new()))),
        }
    }
}

// ============================================================================
// ReplyError
// ============================================================================

/// The `error` object of a failed reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyError {
    /// JSON-RPC style code.
    pub code: i64,

    /// Human readable message.
    pub message: String,

    /// Optional extra data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

// ============================================================================
// Incoming
// ============================================================================

/// An inbound message, classified.
#[derive(Debug, Clone)]
pub enum Incoming {
    /// Reply to a command.
    Reply(Reply),
    /// Unsolicited notification.
    Event(Event),
}

/// Superset of every inbound field, used for one-pass classification.
#[derive(Deserialize)]
struct RawMessage {
    #[serde(default)]
    id: Option<CommandId>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ReplyError>,
    #[serde(rename = "sessionId", default)]
    session_id: Option<SessionId>,
}

impl Incoming {
    /// Parses and classifies an inbound text frame.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] if the text is not a JSON object
    /// - [`Error::Protocol`] if it has neither `id` nor `method`
    pub fn parse(text: &str) -> Result<Self> {
        let raw: RawMessage = serde_json::from_str(text)?;

        if let Some(id) = raw.id {
            return Ok(Self::Reply(Reply {
                id,
                result: raw.result,
                error: raw.error,
                session_id: raw.session_id,
            }));
        }

        match raw.method {
            Some(method) => Ok(Self::Event(Event::new(
                method,
                raw.params.unwrap_or(Value::Null),
                raw.session_id,
            ))),
            None => Err(Error::protocol("message has neither id nor method")),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_command_serialization() {
        let command = Command::new(
            CommandId::new(5),
            "Page.navigate",
            json!({ "url": "https://example.com" }),
            Some(SessionId::new("S1")),
        );
        let value = serde_json::to_value(&command).expect("serialize");

        assert_eq!(
            value,
            json!({
                "id": 5,
                "method": "Page.navigate",
                "params": { "url": "https://example.com" },
                "sessionId": "S1"
            })
        );
    }

    #[test]
    fn test_browser_level_command_omits_session() {
        let command = Command::new(CommandId::new(1), "Browser.getVersion", Value::Null, None);
        let json = serde_json::to_string(&command).expect("serialize");

        assert!(!json.contains("sessionId"));
        assert!(json.contains(r#""params":{}"#));
    }

    #[test]
    fn test_parse_success_reply() {
        let incoming = Incoming::parse(r#"{"id": 3, "result": {"frameId": "F1"}}"#).expect("parse");
        let Incoming::Reply(reply) = incoming else {
            panic!("expected reply");
        };

        assert_eq!(reply.id, CommandId::new(3));
        assert!(!reply.is_error());
        assert_eq!(reply.into_result().expect("ok")["frameId"], "F1");
    }

    #[test]
    fn test_parse_error_reply() {
        let incoming = Incoming::parse(
            r#"{"id": 4, "error": {"code": -32000, "message": "No node with given id found"}}"#,
        )
        .expect("parse");
        let Incoming::Reply(reply) = incoming else {
            panic!("expected reply");
        };

        assert!(reply.is_error());
        assert!(matches!(reply.into_result(), Err(Error::NodeNotFound { .. })));
    }

    #[test]
    fn test_reply_without_result_is_empty_object() {
        let Incoming::Reply(reply) = Incoming::parse(r#"{"id": 9}"#).expect("parse") else {
            panic!("expected reply");
        };
        assert_eq!(reply.into_result().expect("ok"), json!({}));
    }

    #[test]
    fn test_parse_event() {
        let incoming = Incoming::parse(
            r#"{"method": "Page.frameStoppedLoading", "params": {"frameId": "F1"}, "sessionId": "S"}"#,
        )
        .expect("parse");
        let Incoming::Event(event) = incoming else {
            panic!("expected event");
        };

        assert_eq!(event.method, "Page.frameStoppedLoading");
        assert_eq!(event.session_id, Some(SessionId::new("S")));
        assert_eq!(event.params["frameId"], "F1");
    }

    #[test]
    fn test_parse_rejects_shapeless_message() {
        assert!(matches!(
            Incoming::parse(r#"{"foo": 1}"#),
            Err(Error::Protocol { .. })
        ));
        assert!(matches!(Incoming::parse("not json"), Err(Error::Json(_))));
    }
}
