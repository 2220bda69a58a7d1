//! Browser launch and engine options.
//!
//! [`LaunchOptions`] describes how the browser process is started and
//! produces its command line. [`BrowserOptions`] is the validated output of
//! [`BrowserBuilder`](super::BrowserBuilder) and carries everything needed to
//! launch or connect.
//!
//! # Example
//!
//! ```ignore
//! use devtools_engine::LaunchOptions;
//!
//! let options = LaunchOptions::new()
//!     .with_headless()
//!     .with_window_size(1920, 1080);
//!
//! let args = options.to_args();
//! // ["--headless=new", "--window-size=1920,1080"]
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::path::PathBuf;
use std::time::Duration;

use crate::browser::PageOptions;
use crate::transport::ConnectionOptions;

// ============================================================================
// Constants
// ============================================================================

/// Default wait for the browser to announce its endpoint.
pub const DEFAULT_PROCESS_TIMEOUT: Duration = Duration::from_secs(10);

/// Flags every launched browser receives.
const BASE_ARGS: &[&str] = &[
    "--remote-debugging-port=0",
    "--no-first-run",
    "--no-default-browser-check",
    "--disable-background-networking",
    "--disable-popup-blocking",
];

// ============================================================================
// LaunchOptions
// ============================================================================

/// Browser process command-line options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchOptions {
    /// Run without a visible window.
    pub headless: bool,

    /// Window dimensions in pixels (width, height).
    pub window_size: Option<(u32, u32)>,

    /// Additional command-line arguments.
    pub extra_args: Vec<String>,
}

impl LaunchOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            headless: false,
            window_size: None,
            extra_args: Vec::new(),
        }
    }

    /// Enables headless mode.
    #[inline]
    #[must_use]
    pub fn with_headless(mut self) -> Self {
        self.headless = true;
        self
    }

    /// Sets window size in pixels.
    #[inline]
    #[must_use]
    pub fn with_window_size(mut self, width: u32, height: u32) -> Self {
        self.window_size = Some((width, height));
        self
    }

    /// Adds a custom command-line argument.
    #[inline]
    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    /// Converts options to command-line arguments.
    ///
    /// The debugging port and user data directory are added by the process
    /// launcher.
    #[must_use]
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(2 + self.extra_args.len());

        if self.headless {
            args.push("--headless=new".to_string());
        }

        if let Some((width, height)) = self.window_size {
            args.push(format!("--window-size={width},{height}"));
        }

        args.extend(self.extra_args.iter().cloned());
        args
    }

    /// Returns flags shared by every launch.
    #[inline]
    #[must_use]
    pub(crate) fn base_args() -> impl Iterator<Item = &'static str> {
        BASE_ARGS.iter().copied()
    }

    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns error message if validation fails.
    pub fn validate(&self) -> Result<(), String> {
        if let Some((width, height)) = self.window_size
            && (width == 0 || height == 0)
        {
            return Err("Window dimensions must be greater than zero".to_string());
        }

        if self
            .extra_args
            .iter()
            .any(|arg| arg.starts_with("--remote-debugging-port") || arg.starts_with("--user-data-dir"))
        {
            return Err("Debugging port and user data directory are managed by the launcher".to_string());
        }

        Ok(())
    }
}

// ============================================================================
// Endpoint
// ============================================================================

/// Where the engine gets its browser from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Launch this binary.
    Launch(PathBuf),
    /// Connect to a running browser.
    Connect(String),
}

// ============================================================================
// BrowserOptions
// ============================================================================

/// Validated engine configuration.
#[derive(Debug, Clone)]
pub struct BrowserOptions {
    /// Browser source.
    pub endpoint: Endpoint,

    /// Process command line.
    pub launch: LaunchOptions,

    /// Wait for the browser to announce its endpoint.
    pub process_timeout: Duration,

    /// Command dispatch settings.
    pub connection: ConnectionOptions,

    /// Settings for every page.
    pub page: PageOptions,
}

impl BrowserOptions {
    /// Creates options that connect to a running browser.
    #[must_use]
    pub fn connect(ws_url: impl Into<String>) -> Self {
        Self {
            endpoint: Endpoint::Connect(ws_url.into()),
            launch: LaunchOptions::default(),
            process_timeout: DEFAULT_PROCESS_TIMEOUT,
            connection: ConnectionOptions::default(),
            page: PageOptions::default(),
        }
    }

    /// Returns the timeout for target announcements.
    #[inline]
    #[must_use]
    pub fn target_timeout(&self) -> Duration {
        self.connection.timeout
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_creates_default_options() {
        let options = LaunchOptions::new();
        assert!(!options.headless);
        assert!(options.window_size.is_none());
        assert!(options.to_args().is_empty());
    }

    #[test]
    fn test_to_args_includes_flags() {
        let options = LaunchOptions::new()
            .with_headless()
            .with_window_size(1280, 720)
            .with_arg("--mute-audio");

        assert_eq!(
            options.to_args(),
            vec!["--headless=new", "--window-size=1280,720", "--mute-audio"]
        );
    }

    #[test]
    fn test_base_args_request_ephemeral_port() {
        assert!(LaunchOptions::base_args().any(|arg| arg == "--remote-debugging-port=0"));
    }

    #[test]
    fn test_validate_rejects_zero_window() {
        let options = LaunchOptions::new().with_window_size(0, 600);
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_managed_flags() {
        let options = LaunchOptions::new().with_arg("--remote-debugging-port=9222");
        assert!(options.validate().is_err());

        let options = LaunchOptions::new().with_arg("--user-data-dir=/tmp/x");
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_connect_options_defaults() {
        let options = BrowserOptions::connect("ws://127.0.0.1:9222/devtools/browser/x");
        assert!(matches!(options.endpoint, Endpoint::Connect(_)));
        assert_eq!(options.process_timeout, DEFAULT_PROCESS_TIMEOUT);
        assert!(options.page.pending_connection_errors);
    }
}
