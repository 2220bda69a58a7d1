//! DevTools protocol engine.
//!
//! Drives a Chromium-family browser over the DevTools protocol: commands are
//! correlated with replies on one WebSocket, events are delivered on two
//! lanes, and per-page trackers keep the frame tree, execution contexts and
//! network traffic up to date so callers can wait for a page to settle.
//!
//! # Architecture
//!
//! - **Connection**: one event loop per transport, a pending-command table
//!   and a two-lane [`Subscriber`](transport::Subscriber)
//! - **Session**: commands and listeners scoped to one attached target
//! - **Contexts**: browser contexts and the targets opened in them
//! - **Page**: frame tracker, network correlator, interception and script
//!   evaluation on one page session
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use devtools_engine::{Browser, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let options = Browser::builder()
//!         .binary("/usr/bin/chromium")
//!         .headless()
//!         .build()?;
//!
//!     let browser = Browser::launch(options).await?;
//!     let page = browser.create_page().await?;
//!
//!     page.go_to("https://example.com").await?;
//!     page.wait_idle(Duration::from_secs(5)).await;
//!
//!     let title = page.title().await?;
//!     println!("Page title: {title}");
//!
//!     browser.close().await
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`browser`] | Contexts, targets and pages |
//! | [`driver`] | Launch, connection and configuration |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Wire message types |
//! | [`retry`] | Retry policy for recoverable errors |
//! | [`transport`] | Transports, dispatcher and event delivery |

// ============================================================================
// Modules
// ============================================================================

/// Contexts, targets and pages.
pub mod browser;

/// Launch, connection and configuration.
pub mod driver;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers for protocol entities.
pub mod identifiers;

/// Wire message types.
pub mod protocol;

/// Retry policy keyed by error kind.
pub mod retry;

/// Transports, command dispatcher and event subscriber.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Browser types
pub use browser::{
    AuthType, Context, Contexts, ContinueOverrides, Exchange, Frame, FrameState, Frames,
    InterceptedRequest, Network, Page, PageOptions, Target,
};

// Driver types
pub use driver::{Browser, BrowserBuilder, BrowserOptions, BrowserVersion, LaunchOptions};

// Error types
pub use error::{Error, ErrorKind, Result};

// Identifier types
pub use identifiers::{
    BrowserContextId, CommandId, ExecutionContextId, FrameId, InterceptionId, RequestId,
    SessionId, TargetId,
};

// Protocol types
pub use protocol::{RemoteObject, RemoteValue};

// Retry
pub use retry::{RetryPolicy, RetryRule};

// Transport types
pub use transport::{Connection, ConnectionOptions, Session};
