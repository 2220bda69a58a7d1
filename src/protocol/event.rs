//! Event message types.
//!
//! Events are notifications sent by the browser without a matching command.
//! Most are opaque to the engine and only forwarded to listeners; the fixed
//! vocabulary in [`methods`] drives the frame tracker, the network
//! correlator and the target registry.
//!
//! # Delivery Lanes
//!
//! | Lane | Methods |
//! |------|---------|
//! | [`Lane::Priority`] | `Fetch.requestPaused`, `Fetch.authRequired` |
//! | [`Lane::Regular`] | everything else |

// ============================================================================
// Imports
// ============================================================================

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::identifiers::{
    BrowserContextId, ExecutionContextId, FrameId, SessionId, TargetId,
};

// ============================================================================
// Method Names
// ============================================================================

/// Event method names consumed by the engine.
pub mod methods {
    /// A child frame was attached.
    pub const FRAME_ATTACHED: &str = "Page.frameAttached";
    /// A frame was detached.
    pub const FRAME_DETACHED: &str = "Page.frameDetached";
    /// A frame started loading.
    pub const FRAME_STARTED_LOADING: &str = "Page.frameStartedLoading";
    /// A frame scheduled a navigation.
    pub const FRAME_SCHEDULED_NAVIGATION: &str = "Page.frameScheduledNavigation";
    /// A frame committed a navigation.
    pub const FRAME_NAVIGATED: &str = "Page.frameNavigated";
    /// A frame stopped loading.
    pub const FRAME_STOPPED_LOADING: &str = "Page.frameStoppedLoading";
    /// Same-document navigation (anchor, history API).
    pub const NAVIGATED_WITHIN_DOCUMENT: &str = "Page.navigatedWithinDocument";

    /// A script execution context was created.
    pub const EXECUTION_CONTEXT_CREATED: &str = "Runtime.executionContextCreated";
    /// A script execution context was destroyed.
    pub const EXECUTION_CONTEXT_DESTROYED: &str = "Runtime.executionContextDestroyed";
    /// Every execution context was dropped (renderer swap).
    pub const EXECUTION_CONTEXTS_CLEARED: &str = "Runtime.executionContextsCleared";

    /// A request is about to be sent.
    pub const REQUEST_WILL_BE_SENT: &str = "Network.requestWillBeSent";
    /// Response headers were received.
    pub const RESPONSE_RECEIVED: &str = "Network.responseReceived";
    /// A request finished loading.
    pub const LOADING_FINISHED: &str = "Network.loadingFinished";
    /// A request failed to load.
    pub const LOADING_FAILED: &str = "Network.loadingFailed";
    /// A log entry was added.
    pub const LOG_ENTRY_ADDED: &str = "Log.entryAdded";

    /// A request was paused by the `Fetch` domain.
    pub const REQUEST_PAUSED: &str = "Fetch.requestPaused";
    /// A request hit an authentication challenge.
    pub const AUTH_REQUIRED: &str = "Fetch.authRequired";

    /// A target was created.
    pub const TARGET_CREATED: &str = "Target.targetCreated";
    /// Target title/url/etc. changed.
    pub const TARGET_INFO_CHANGED: &str = "Target.targetInfoChanged";
    /// A target was destroyed.
    pub const TARGET_DESTROYED: &str = "Target.targetDestroyed";
    /// A target's renderer crashed.
    pub const TARGET_CRASHED: &str = "Target.targetCrashed";
    /// A session was attached to a target.
    pub const ATTACHED_TO_TARGET: &str = "Target.attachedToTarget";
    /// A session was detached from a target.
    pub const DETACHED_FROM_TARGET: &str = "Target.detachedFromTarget";
}

/// Methods whose handler must answer before the browser can make progress.
const PRIORITY_METHODS: &[&str] = &[methods::REQUEST_PAUSED, methods::AUTH_REQUIRED];

// ============================================================================
// Lane
// ============================================================================

/// Delivery lane of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    /// Interruption events: the browser is blocked until they are answered.
    Priority,
    /// Everything else.
    Regular,
}

impl Lane {
    /// Classifies an event by method name.
    #[inline]
    #[must_use]
    pub fn for_method(method: &str) -> Self {
        if PRIORITY_METHODS.contains(&method) {
            Self::Priority
        } else {
            Self::Regular
        }
    }
}

// ============================================================================
// Event
// ============================================================================

/// A notification from browser to local end.
///
/// # Format
///
/// ```json
/// {
///   "method": "Page.frameStoppedLoading",
///   "params": { "frameId": "F1" },
///   "sessionId": "8E1B..."
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Event {
    /// Event name in `Domain.event` format.
    pub method: String,

    /// Event payload. Always an object.
    pub params: Value,

    /// Session the event belongs to, absent for browser-level events.
    pub session_id: Option<SessionId>,
}

impl Event {
    /// Creates an event; `Null` params become an empty object.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Value, session_id: Option<SessionId>) -> Self {
        let params = match params {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };

        Self {
            method: method.into(),
            params,
            session_id,
        }
    }

    /// Returns the domain name from the method.
    #[inline]
    #[must_use]
    pub fn domain(&self) -> &str {
        self.method.split('.').next().unwrap_or_default()
    }

    /// Returns the delivery lane for this event.
    #[inline]
    #[must_use]
    pub fn lane(&self) -> Lane {
        Lane::for_method(&self.method)
    }

    /// Parses the event into a typed variant.
    #[must_use]
    pub fn parse(&self) -> ParsedEvent {
        self.parse_internal()
    }
}

// ============================================================================
// TargetInfo
// ============================================================================

/// `Target.TargetInfo` as carried by target events.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
    /// Target id.
    pub target_id: TargetId,
    /// Target type (`page`, `iframe`, `service_worker`, ...).
    #[serde(rename = "type")]
    pub target_type: String,
    /// Document title.
    #[serde(default)]
    pub title: String,
    /// Document url.
    #[serde(default)]
    pub url: String,
    /// Whether some client is attached.
    #[serde(default)]
    pub attached: bool,
    /// Target that opened this one (popup / `window.open`).
    #[serde(default)]
    pub opener_id: Option<TargetId>,
    /// Containing browser context.
    #[serde(default)]
    pub browser_context_id: Option<BrowserContextId>,
}

impl TargetInfo {
    /// Returns `true` for page-typed targets.
    #[inline]
    #[must_use]
    pub fn is_page(&self) -> bool {
        self.target_type == "page"
    }
}

// ============================================================================
// ParsedEvent
// ============================================================================

/// Typed view of the events the engine consumes.
#[derive(Debug, Clone)]
pub enum ParsedEvent {
    /// Frame attached to a parent.
    FrameAttached {
        /// New frame.
        frame_id: FrameId,
        /// Its parent.
        parent_frame_id: Option<FrameId>,
    },

    /// Frame detached.
    FrameDetached {
        /// Removed frame.
        frame_id: FrameId,
    },

    /// Frame started loading.
    FrameStartedLoading {
        /// Loading frame.
        frame_id: FrameId,
    },

    /// Frame scheduled a navigation.
    FrameScheduledNavigation {
        /// Navigating frame.
        frame_id: FrameId,
    },

    /// Frame committed a navigation.
    FrameNavigated {
        /// Navigated frame.
        frame_id: FrameId,
        /// Its parent.
        parent_frame_id: Option<FrameId>,
        /// Frame name attribute.
        name: String,
        /// New url.
        url: String,
    },

    /// Frame stopped loading.
    FrameStoppedLoading {
        /// Loaded frame.
        frame_id: FrameId,
    },

    /// Same-document navigation.
    NavigatedWithinDocument {
        /// Frame.
        frame_id: FrameId,
        /// New url.
        url: String,
    },

    /// Execution context created.
    ExecutionContextCreated {
        /// New context handle.
        context_id: ExecutionContextId,
        /// Owning frame (from `auxData`).
        frame_id: Option<FrameId>,
        /// `false` for isolated worlds.
        is_default: bool,
    },

    /// Execution context destroyed.
    ExecutionContextDestroyed {
        /// Destroyed handle.
        context_id: ExecutionContextId,
    },

    /// All execution contexts dropped.
    ExecutionContextsCleared,

    /// Target created.
    TargetCreated {
        /// Target description.
        info: TargetInfo,
    },

    /// Target info changed.
    TargetInfoChanged {
        /// Updated description.
        info: TargetInfo,
    },

    /// Target destroyed.
    TargetDestroyed {
        /// Destroyed target.
        target_id: TargetId,
    },

    /// Target crashed.
    TargetCrashed {
        /// Crashed target.
        target_id: TargetId,
    },

    /// Session attached.
    AttachedToTarget {
        /// New session.
        session_id: SessionId,
        /// Target description.
        info: TargetInfo,
        /// Target is paused until `Runtime.runIfWaitingForDebugger`.
        waiting_for_debugger: bool,
    },

    /// Session detached.
    DetachedFromTarget {
        /// Detached session.
        session_id: SessionId,
        /// Target, when reported.
        target_id: Option<TargetId>,
    },

    /// Event outside the consumed vocabulary, or malformed.
    Unknown {
        /// Event method.
        method: String,
    },
}

// ============================================================================
// Event Parsing Implementation
// ============================================================================

impl Event {
    /// Internal parsing implementation.
    fn parse_internal(&self) -> ParsedEvent {
        match self.method.as_str() {
            methods::FRAME_ATTACHED => ParsedEvent::FrameAttached {
                frame_id: self.frame_id("/frameId"),
                parent_frame_id: self.optional_frame_id("/parentFrameId"),
            },

            methods::FRAME_DETACHED => ParsedEvent::FrameDetached {
                frame_id: self.frame_id("/frameId"),
            },

            methods::FRAME_STARTED_LOADING => ParsedEvent::FrameStartedLoading {
                frame_id: self.frame_id("/frameId"),
            },

            methods::FRAME_SCHEDULED_NAVIGATION => ParsedEvent::FrameScheduledNavigation {
                frame_id: self.frame_id("/frameId"),
            },

            methods::FRAME_NAVIGATED => ParsedEvent::FrameNavigated {
                frame_id: self.frame_id("/frame/id"),
                parent_frame_id: self.optional_frame_id("/frame/parentId"),
                name: self.get_string("/frame/name"),
                url: self.get_string("/frame/url"),
            },

            methods::FRAME_STOPPED_LOADING => ParsedEvent::FrameStoppedLoading {
                frame_id: self.frame_id("/frameId"),
            },

            methods::NAVIGATED_WITHIN_DOCUMENT => ParsedEvent::NavigatedWithinDocument {
                frame_id: self.frame_id("/frameId"),
                url: self.get_string("/url"),
            },

            methods::EXECUTION_CONTEXT_CREATED => ParsedEvent::ExecutionContextCreated {
                context_id: self.context_id("/context/id"),
                frame_id: self.optional_frame_id("/context/auxData/frameId"),
                is_default: self
                    .params
                    .pointer("/context/auxData/isDefault")
                    .and_then(Value::as_bool)
                    .unwrap_or(true),
            },

            methods::EXECUTION_CONTEXT_DESTROYED => ParsedEvent::ExecutionContextDestroyed {
                context_id: self.context_id("/executionContextId"),
            },

            methods::EXECUTION_CONTEXTS_CLEARED => ParsedEvent::ExecutionContextsCleared,

            methods::TARGET_CREATED => match self.target_info() {
                Some(info) => ParsedEvent::TargetCreated { info },
                None => self.unknown(),
            },

            methods::TARGET_INFO_CHANGED => match self.target_info() {
                Some(info) => ParsedEvent::TargetInfoChanged { info },
                None => self.unknown(),
            },

            methods::TARGET_DESTROYED => ParsedEvent::TargetDestroyed {
                target_id: TargetId::new(self.get_string("/targetId")),
            },

            methods::TARGET_CRASHED => ParsedEvent::TargetCrashed {
                target_id: TargetId::new(self.get_string("/targetId")),
            },

            methods::ATTACHED_TO_TARGET => match self.target_info() {
                Some(info) => ParsedEvent::AttachedToTarget {
                    session_id: SessionId::new(self.get_string("/sessionId")),
                    info,
                    waiting_for_debugger: self
                        .params
                        .get("waitingForDebugger")
                        .and_then(Value::as_bool)
                        .unwrap_or_default(),
                },
                None => self.unknown(),
            },

            methods::DETACHED_FROM_TARGET => ParsedEvent::DetachedFromTarget {
                session_id: SessionId::new(self.get_string("/sessionId")),
                target_id: self
                    .get_optional_string("/targetId")
                    .map(TargetId::new),
            },

            _ => self.unknown(),
        }
    }

    fn unknown(&self) -> ParsedEvent {
        ParsedEvent::Unknown {
            method: self.method.clone(),
        }
    }

    fn target_info(&self) -> Option<TargetInfo> {
        self.params
            .get("targetInfo")
            .and_then(|info| TargetInfo::deserialize(info).ok())
    }

    /// Gets a string at a JSON pointer, empty when missing.
    #[inline]
    fn get_string(&self, pointer: &str) -> String {
        self.get_optional_string(pointer).unwrap_or_default()
    }

    /// Gets an optional non-empty string at a JSON pointer.
    #[inline]
    fn get_optional_string(&self, pointer: &str) -> Option<String> {
        self.params
            .pointer(pointer)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    #[inline]
    fn frame_id(&self, pointer: &str) -> FrameId {
        FrameId::new(self.get_string(pointer))
    }

    #[inline]
    fn optional_frame_id(&self, pointer: &str) -> Option<FrameId> {
        self.get_optional_string(pointer).map(FrameId::new)
    }

    #[inline]
    fn context_id(&self, pointer: &str) -> ExecutionContextId {
        ExecutionContextId::new(
            self.params
                .pointer(pointer)
                .and_then(Value::as_i64)
                .unwrap_or_default(),
        )
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
    fn test_lane_classification() {
        assert_eq!(Lane::for_method("Fetch.requestPaused"), Lane::Priority);
        assert_eq!(Lane::for_method("Fetch.authRequired"), Lane::Priority);
        assert_eq!(Lane::for_method("Page.frameNavigated"), Lane::Regular);
        assert_eq!(Lane::for_method("Custom.event"), Lane::Regular);
    }

    #[test]
    fn test_event_domain() {
        let event = Event::new("Network.responseReceived", Value::Null, None);
        assert_eq!(event.domain(), "Network");
        assert_eq!(event.params, json!({}));
    }

    #[test]
    fn test_frame_navigated_parsing() {
        let event = Event::new(
            methods::FRAME_NAVIGATED,
            json!({ "frame": { "id": "F2", "parentId": "F1", "name": "child", "url": "http://x/" } }),
            None,
        );

        match event.parse() {
            ParsedEvent::FrameNavigated {
                frame_id,
                parent_frame_id,
                name,
                url,
            } => {
                assert_eq!(frame_id, FrameId::new("F2"));
                assert_eq!(parent_frame_id, Some(FrameId::new("F1")));
                assert_eq!(name, "child");
                assert_eq!(url, "http://x/");
            }
            other => panic!("unexpected parsed event: {other:?}"),
        }
    }

    #[test]
    fn test_execution_context_created_parsing() {
        let event = Event::new(
            methods::EXECUTION_CONTEXT_CREATED,
            json!({ "context": { "id": 7, "auxData": { "frameId": "F1", "isDefault": false } } }),
            None,
        );

        match event.parse() {
            ParsedEvent::ExecutionContextCreated {
                context_id,
                frame_id,
                is_default,
            } => {
                assert_eq!(context_id, ExecutionContextId::new(7));
                assert_eq!(frame_id, Some(FrameId::new("F1")));
                assert!(!is_default);
            }
            other => panic!("unexpected parsed event: {other:?}"),
        }
    }

    #[test]
    fn test_target_created_parsing() {
        let event = Event::new(
            methods::TARGET_CREATED,
            json!({
                "targetInfo": {
                    "targetId": "T1",
                    "type": "page",
                    "title": "",
                    "url": "about:blank",
                    "attached": false,
                    "openerId": "T0",
                    "browserContextId": "C1"
                }
            }),
            None,
        );

        match event.parse() {
            ParsedEvent::TargetCreated { info } => {
                assert!(info.is_page());
                assert_eq!(info.opener_id, Some(TargetId::new("T0")));
                assert_eq!(info.browser_context_id, Some(BrowserContextId::new("C1")));
            }
            other => panic!("unexpected parsed event: {other:?}"),
        }
    }

    #[test]
    fn test_malformed_target_event_is_unknown() {
        let event = Event::new(methods::TARGET_CREATED, json!({}), None);
        assert!(matches!(event.parse(), ParsedEvent::Unknown { .. }));
    }

    #[test]
    fn test_unknown_event() {
        let event = Event::new("Custom.thing", json!({ "foo": "bar" }), None);
        match event.parse() {
            ParsedEvent::Unknown { method } => assert_eq!(method, "Custom.thing"),
            other => panic!("expected Unknown variant, got {other:?}"),
        }
    }
}
