//! DevTools protocol message types.
//!
//! This module defines the JSON message shapes exchanged with the browser.
//! Command parameters and results stay opaque [`serde_json::Value`]s; only
//! the envelope and the fixed event vocabulary consumed by the trackers are
//! typed.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Shape |
//! |--------------|-----------|-------|
//! | [`Command`] | Local → Browser | `{id, method, params, sessionId?}` |
//! | [`Reply`] | Browser → Local | `{id, result?, error?}` |
//! | [`Event`] | Browser → Local | `{method, params, sessionId?}` |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `message` | Command, Reply and inbound classification |
//! | `event` | Event type, method names, lane classification |
//! | `remote_object` | Script evaluation result union |

// ============================================================================
// Submodules
// ============================================================================

/// Event message types and the consumed method vocabulary.
pub mod event;

/// Command and Reply envelopes.
pub mod message;

/// Decoded script evaluation results.
pub mod remote_object;

// ============================================================================
// Re-exports
// ============================================================================

pub use event::{Event, Lane, ParsedEvent, methods};
pub use message::{Command, Incoming, Reply, ReplyError};
pub use remote_object::{RemoteObject, RemoteValue};
