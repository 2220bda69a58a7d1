//! Attached page and its trackers.
//!
//! A [`Page`] owns the session of one page target together with the
//! trackers fed by that session's events.
//!
//! # Module Structure
//!
//! | Module | Description |
//! |--------|-------------|
//! | `core` | Page struct, options, protocol access |
//! | `idle` | Settlement signal |
//! | `frames` | Frame tree and execution handles |
//! | `network` | Exchange correlation and traffic idle |
//! | `intercept` | Paused requests and authentication |
//! | `navigation` | Navigation and history |
//! | `runtime` | Script evaluation |
//!
//! # Example
//!
//! ```ignore
//! let page = browser.create_page().await?;
//!
//! page.go_to("https://example.com").await?;
//! assert!(page.wait_idle(Duration::from_secs(5)).await);
//!
//! let title = page.evaluate("document.title").await?;
//! let pending = page.network().pending_connections();
//! ```

// ============================================================================
// Submodules
// ============================================================================

mod core;
mod frames;
mod idle;
mod intercept;
mod navigation;
mod network;
mod runtime;

// ============================================================================
// Re-exports
// ============================================================================

pub use core::{DEFAULT_PAGE_TIMEOUT, DEFAULT_QUIET_WINDOW, Page, PageOptions};
pub use frames::{Frame, FrameState, Frames};
pub use idle::{IdleSignal, IdleState};
pub use intercept::{AuthType, ContinueOverrides, InterceptedRequest};
pub use network::{Exchange, Network, NetworkError, Request, Response};
