//! Browser entities.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Contexts`] | Registry of browser contexts on a connection |
//! | [`Context`] | Isolated profile holding targets |
//! | [`Target`] | Attachable surface (page, popup) |
//! | [`Page`] | Attached page with frame and network trackers |
//!
//! # Example
//!
//! ```ignore
//! let contexts = Contexts::new(connection, PageOptions::default(), timeout).await?;
//! let context = contexts.default_context().await?;
//!
//! let page = context.create_page().await?;
//! page.go_to("https://example.com").await?;
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Browser contexts.
pub mod context;

/// Context registry and target event routing.
pub mod contexts;

/// Attached pages.
pub mod page;

/// Browser targets.
pub mod target;

// ============================================================================
// Re-exports
// ============================================================================

pub use context::Context;
pub use contexts::Contexts;
pub use page::{
    AuthType, ContinueOverrides, Exchange, Frame, FrameState, Frames, IdleSignal, IdleState,
    InterceptedRequest, Network, NetworkError, Page, PageOptions, Request, Response,
};
pub use target::Target;
