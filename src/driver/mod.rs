//! Browser launch, connection and configuration.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Browser`] | Connected browser and its context registry |
//! | [`BrowserBuilder`] | Fluent configuration builder |
//! | [`BrowserOptions`] | Validated configuration |
//! | [`LaunchOptions`] | Browser command line |
//! | [`BrowserProcess`] | Launched browser process |
//!
//! # Example
//!
//! ```no_run
//! use devtools_engine::{Browser, Result};
//!
//! # async fn example() -> Result<()> {
//! let options = Browser::builder()
//!     .ws_url("ws://127.0.0.1:9222/devtools/browser/0d7e")
//!     .build()?;
//!
//! let browser = Browser::start(options).await?;
//! let page = browser.create_page().await?;
//! page.go_to("https://example.com").await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder for engine configuration.
pub mod builder;

/// Browser entry point.
pub mod core;

/// Launch and engine options.
pub mod options;

/// Browser process management.
pub mod process;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::BrowserBuilder;
pub use core::{Browser, BrowserVersion};
pub use options::{BrowserOptions, DEFAULT_PROCESS_TIMEOUT, Endpoint, LaunchOptions};
pub use process::BrowserProcess;
