//! Type-safe identifiers for protocol entities.
//!
//! Newtype wrappers keep ids from different protocol domains apart at
//! compile time. A frame id can never be passed where a target id is
//! expected, even though both are strings on the wire.
//!
//! | Type | Wire type | Assigned by |
//! |------|-----------|-------------|
//! | [`CommandId`] | integer | this crate, per connection |
//! | [`SessionId`] | string | browser (`Target.attachToTarget`) |
//! | [`TargetId`] | string | browser |
//! | [`BrowserContextId`] | string | browser |
//! | [`FrameId`] | string | browser |
//! | [`ExecutionContextId`] | integer | browser |
//! | [`RequestId`] | string | browser (`Network` domain) |
//! | [`InterceptionId`] | string | browser (`Fetch` domain) |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

// ============================================================================
// CommandId
// ============================================================================

/// Identifier of an outgoing command.
///
/// Allocated from a per-connection [`CommandIdSequence`]; never reused while
/// the connection lives, so a late reply cannot be attributed to a newer
/// command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(u64);

impl CommandId {
    /// Creates a command id from a raw value.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic command id allocator. Starts at 1.
#[derive(Debug)]
pub struct CommandIdSequence(AtomicU64);

impl CommandIdSequence {
    /// Creates a fresh sequence.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    /// Allocates the next id.
    #[inline]
    pub fn next_id(&self) -> CommandId {
        CommandId(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for CommandIdSequence {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// ExecutionContextId
// ============================================================================

/// Browser-assigned handle of a live script execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionContextId(i64);

impl ExecutionContextId {
    /// Creates an execution context id from a raw value.
    #[inline]
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }
}

impl fmt::Display for ExecutionContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// String Identifiers
// ============================================================================

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates the id from any string-like value.
            #[inline]
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the id as a string slice.
            #[inline]
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Flattened session id returned by `Target.attachToTarget`.
    SessionId
);

string_id!(
    /// Addressable browsing surface (page, iframe owner, worker).
    TargetId
);

string_id!(
    /// Isolation scope ("incognito profile") containing targets.
    BrowserContextId
);

string_id!(
    /// Frame inside a page. The main frame's id equals its target id.
    FrameId
);

string_id!(
    /// Network request id. Shared by every leg of a redirect chain.
    RequestId
);

string_id!(
    /// Paused request id issued by the `Fetch` domain.
    InterceptionId
);

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_ids_are_monotonic() {
        let seq = CommandIdSequence::new();
        let a = seq.next_id();
        let b = seq.next_id();
        let c = seq.next_id();
        assert_eq!(a.as_u64(), 1);
        assert!(a < b && b < c);
    }

    #[test]
    fn test_string_id_serde_is_transparent() {
        let id = FrameId::new("F1");
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, "\"F1\"");

        let back: FrameId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, id);
    }

    #[test]
    fn test_display() {
        assert_eq!(TargetId::from("abc").to_string(), "abc");
        assert_eq!(ExecutionContextId::new(7).to_string(), "7");
        assert_eq!(CommandId::new(42).to_string(), "42");
    }
}
