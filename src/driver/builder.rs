//! Builder pattern for engine configuration.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use devtools_engine::Browser;
//!
//! # fn example() -> devtools_engine::Result<()> {
//! let options = Browser::builder()
//!     .binary("/usr/bin/chromium")
//!     .headless()
//!     .timeout(Duration::from_secs(10))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::path::PathBuf;
use std::time::Duration;

use crate::browser::PageOptions;
use crate::error::{Error, Result};
use crate::transport::ConnectionOptions;

use super::options::{BrowserOptions, DEFAULT_PROCESS_TIMEOUT, Endpoint, LaunchOptions};

// ============================================================================
// BrowserBuilder
// ============================================================================

/// Builder for [`BrowserOptions`].
///
/// Use [`Browser::builder()`](super::Browser::builder) to create one.
#[derive(Debug, Clone)]
pub struct BrowserBuilder {
    binary: Option<PathBuf>,
    ws_url: Option<String>,
    launch: LaunchOptions,
    process_timeout: Duration,
    connection: ConnectionOptions,
    page: PageOptions,
}

impl Default for BrowserBuilder {
    fn default() -> Self {
        Self {
            binary: None,
            ws_url: None,
            launch: LaunchOptions::default(),
            process_timeout: DEFAULT_PROCESS_TIMEOUT,
            connection: ConnectionOptions::default(),
            page: PageOptions::default(),
        }
    }
}

impl BrowserBuilder {
    /// Creates a builder with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the browser binary to launch.
    #[inline]
    #[must_use]
    pub fn binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.binary = Some(path.into());
        self
    }

    /// Connects to a running browser instead of launching one.
    #[inline]
    #[must_use]
    pub fn ws_url(mut self, url: impl Into<String>) -> Self {
        self.ws_url = Some(url.into());
        self
    }

    /// Runs the launched browser headless.
    #[inline]
    #[must_use]
    pub fn headless(mut self) -> Self {
        self.launch.headless = true;
        self
    }

    /// Sets the window size of the launched browser.
    #[inline]
    #[must_use]
    pub fn window_size(mut self, width: u32, height: u32) -> Self {
        self.launch.window_size = Some((width, height));
        self
    }

    /// Adds a command-line argument.
    #[inline]
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.launch.extra_args.push(arg.into());
        self
    }

    /// Sets the command and page wait timeout.
    #[inline]
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.connection.timeout = timeout;
        self.page.timeout = timeout;
        self
    }

    /// Sets how long to wait for the browser to announce its endpoint.
    #[inline]
    #[must_use]
    pub fn process_timeout(mut self, timeout: Duration) -> Self {
        self.process_timeout = timeout;
        self
    }

    /// Delays every command write.
    #[inline]
    #[must_use]
    pub fn slow_motion(mut self, delay: Duration) -> Self {
        self.connection.slow_motion = Some(delay);
        self
    }

    /// Sets how long a page must stay idle to count as settled.
    #[inline]
    #[must_use]
    pub fn quiet_window(mut self, window: Duration) -> Self {
        self.page.quiet_window = window;
        self
    }

    /// Caps the number of commands awaiting a reply.
    #[inline]
    #[must_use]
    pub fn max_pending(mut self, max: usize) -> Self {
        self.connection.max_pending = max;
        self
    }

    /// Reports pending traffic when a navigation times out.
    #[inline]
    #[must_use]
    pub fn pending_connection_errors(mut self, enabled: bool) -> Self {
        self.page.pending_connection_errors = enabled;
        self
    }

    /// Validates and builds the options.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if neither or both of binary and url are set
    /// - [`Error::BinaryNotFound`] if the binary path doesn't exist
    /// - [`Error::Config`] if a setting is out of range
    pub fn build(self) -> Result<BrowserOptions> {
        let endpoint = self.validate_endpoint()?;
        self.validate_settings()?;

        Ok(BrowserOptions {
            endpoint,
            launch: self.launch,
            process_timeout: self.process_timeout,
            connection: self.connection,
            page: self.page,
        })
    }
}

// ============================================================================
// Validation
// ============================================================================

impl BrowserBuilder {
    fn validate_endpoint(&self) -> Result<Endpoint> {
        match (&self.binary, &self.ws_url) {
            (Some(_), Some(_)) => Err(Error::config(
                "Set either .binary() or .ws_url(), not both.",
            )),
            (None, None) => Err(Error::config(
                "A browser is required. Use .binary() to launch one or .ws_url() to connect.\n\
                 Example: Browser::builder().binary(\"/usr/bin/chromium\")",
            )),
            (Some(binary), None) => {
                if !binary.exists() {
                    return Err(Error::binary_not_found(binary));
                }
                Ok(Endpoint::Launch(binary.clone()))
            }
            (None, Some(ws_url)) => {
                let parsed = url::Url::parse(ws_url)
                    .map_err(|e| Error::config(format!("Invalid endpoint url {ws_url}: {e}")))?;
                if !matches!(parsed.scheme(), "ws" | "wss") {
                    return Err(Error::config(format!(
                        "Endpoint url must use ws:// or wss://, got {ws_url}"
                    )));
                }
                Ok(Endpoint::Connect(ws_url.clone()))
            }
        }
    }

    fn validate_settings(&self) -> Result<()> {
        self.launch.validate().map_err(Error::config)?;

        if self.connection.timeout.is_zero() {
            return Err(Error::config("Timeout must be greater than zero"));
        }

        if self.process_timeout.is_zero() {
            return Err(Error::config("Process timeout must be greater than zero"));
        }

        if self.connection.max_pending == 0 {
            return Err(Error::config("Max pending must be at least 1"));
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_creates_empty_builder() {
        let builder = BrowserBuilder::new();
        assert!(builder.binary.is_none());
        assert!(builder.ws_url.is_none());
        assert_eq!(builder.process_timeout, DEFAULT_PROCESS_TIMEOUT);
    }

    #[test]
    fn test_build_fails_without_endpoint() {
        let err = BrowserBuilder::new().build().unwrap_err();
        assert!(err.to_string().contains("binary"));
    }

    #[test]
    fn test_build_fails_with_both_endpoints() {
        let result = BrowserBuilder::new()
            .binary("/bin/sh")
            .ws_url("ws://127.0.0.1:9222/devtools/browser/x")
            .build();
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn test_build_fails_with_nonexistent_binary() {
        let result = BrowserBuilder::new().binary("/nonexistent/chromium").build();
        assert!(matches!(result, Err(Error::BinaryNotFound { .. })));
    }

    #[test]
    fn test_build_rejects_non_websocket_url() {
        let result = BrowserBuilder::new().ws_url("http://127.0.0.1:9222").build();
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn test_build_rejects_zero_timeout() {
        let result = BrowserBuilder::new()
            .ws_url("ws://127.0.0.1:9222/devtools/browser/x")
            .timeout(Duration::ZERO)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_build_applies_settings() {
        let options = BrowserBuilder::new()
            .binary("/bin/sh")
            .headless()
            .window_size(800, 600)
            .arg("--mute-audio")
            .timeout(Duration::from_secs(7))
            .slow_motion(Duration::from_millis(20))
            .quiet_window(Duration::from_millis(250))
            .max_pending(10)
            .pending_connection_errors(false)
            .build()
            .unwrap();

        assert_eq!(options.endpoint, Endpoint::Launch(PathBuf::from("/bin/sh")));
        assert!(options.launch.headless);
        assert_eq!(options.launch.window_size, Some((800, 600)));
        assert_eq!(options.connection.timeout, Duration::from_secs(7));
        assert_eq!(options.page.timeout, Duration::from_secs(7));
        assert_eq!(options.connection.slow_motion, Some(Duration::from_millis(20)));
        assert_eq!(options.page.quiet_window, Duration::from_millis(250));
        assert_eq!(options.connection.max_pending, 10);
        assert!(!options.page.pending_connection_errors);
    }
}
