//! Transport layer and protocol engine.
//!
//! A transport is a full-duplex text-frame pipe. On top of it the
//! [`Connection`] correlates commands with replies and hands events to the
//! [`Subscriber`]; [`Session`] scopes both to one attached target.
//!
//! # Architecture
//!
//! ```text
//!  callers ──► Connection::send ──┐
//!                                 ▼
//!                          ┌─────────────┐   text   ┌──────────┐
//!                          │ event loop  │◄────────►│ browser  │
//!                          └─────────────┘          └──────────┘
//!                            │        │
//!                 reply (id) │        │ event (no id)
//!                            ▼        ▼
//!                   pending table   Subscriber
//!                                    ├─ priority lane thread
//!                                    └─ regular lane thread
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | Command dispatcher and event loop |
//! | `subscriber` | Two-lane event delivery |
//! | `session` | Session-scoped view of a connection |
//! | `websocket` | WebSocket transport |
//! | `memory` | In-process transport and scripted browser peer |

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;

use crate::error::Result;

// ============================================================================
// Submodules
// ============================================================================

/// Command dispatcher and event loop.
pub mod connection;

/// In-process transport for tests and benchmarks.
pub mod memory;

/// Session-scoped command and listener routing.
pub mod session;

/// Two-lane event subscriber.
pub mod subscriber;

/// WebSocket transport.
pub mod websocket;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{Connection, ConnectionOptions};
pub use session::Session;
pub use subscriber::{Delivery, Subscriber};

// ============================================================================
// Transport Traits
// ============================================================================

/// Sending half of a transport.
#[async_trait]
pub trait TransportWriter: Send {
    /// Writes one text frame.
    async fn send(&mut self, text: String) -> Result<()>;

    /// Closes the transport.
    async fn close(&mut self) -> Result<()>;
}

/// Receiving half of a transport.
#[async_trait]
pub trait TransportReader: Send {
    /// Receives the next text frame.
    ///
    /// Returns `None` once the stream has ended. Must be cancel-safe: the
    /// event loop polls it inside `select!`.
    async fn receive(&mut self) -> Option<Result<String>>;
}
