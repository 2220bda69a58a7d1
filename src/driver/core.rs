//! Browser entry point.
//!
//! A [`Browser`] owns one connection, the context registry on it and, when
//! it launched the browser itself, the browser process.
//!
//! # Example
//!
//! ```no_run
//! use devtools_engine::Browser;
//!
//! # async fn example() -> devtools_engine::Result<()> {
//! let options = Browser::builder()
//!     .binary("/usr/bin/chromium")
//!     .headless()
//!     .build()?;
//!
//! let browser = Browser::launch(options).await?;
//! let page = browser.create_page().await?;
//! page.go_to("https://example.com").await?;
//!
//! browser.close().await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::browser::{Context, Contexts, Page};
use crate::error::Result;
use crate::transport::{Connection, Session};

use super::builder::BrowserBuilder;
use super::options::{BrowserOptions, Endpoint};
use super::process::BrowserProcess;

// ============================================================================
// Constants
// ============================================================================

/// Grace period for `Browser.close` before the process is killed.
const CLOSE_GRACE: Duration = Duration::from_millis(500);

// ============================================================================
// Types
// ============================================================================

/// Reply of `Browser.getVersion`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserVersion {
    /// Protocol version.
    pub protocol_version: String,
    /// Product name and version.
    pub product: String,
    /// Product revision.
    #[serde(default)]
    pub revision: String,
    /// User agent.
    #[serde(default)]
    pub user_agent: String,
    /// Script engine version.
    #[serde(default)]
    pub js_version: String,
}

struct BrowserInner {
    connection: Connection,
    contexts: Contexts,
    options: BrowserOptions,
    process: Mutex<Option<BrowserProcess>>,
}

// ============================================================================
// Browser
// ============================================================================

/// A connected browser.
#[derive(Clone)]
pub struct Browser {
    inner: Arc<BrowserInner>,
}

impl fmt::Debug for Browser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Browser")
            .field("endpoint", &self.inner.options.endpoint)
            .field("closed", &self.inner.connection.is_closed())
            .finish_non_exhaustive()
    }
}

impl Browser {
    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> BrowserBuilder {
        BrowserBuilder::new()
    }

    /// Launches or connects, depending on the configured endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the browser cannot be started or reached.
    pub async fn start(options: BrowserOptions) -> Result<Self> {
        match options.endpoint.clone() {
            Endpoint::Launch(binary) => Self::launch_binary(&binary, options).await,
            Endpoint::Connect(ws_url) => Self::connect(&ws_url, options).await,
        }
    }

    /// Launches a browser process and connects to it.
    ///
    /// Options with a connect endpoint are connected instead.
    ///
    /// # Errors
    ///
    /// Returns a process error if the browser does not start, or a
    /// connection error if its endpoint cannot be reached.
    pub async fn launch(options: BrowserOptions) -> Result<Self> {
        Self::start(options).await
    }

    /// Connects to a running browser.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`](crate::Error::Connection) if the
    /// endpoint cannot be reached.
    pub async fn connect(ws_url: &str, options: BrowserOptions) -> Result<Self> {
        let connection = Connection::connect(ws_url, options.connection.clone()).await?;
        info!(%ws_url, "Connected to browser");
        Self::from_connection(connection, options).await
    }

    /// Builds a browser over an established connection.
    ///
    /// # Errors
    ///
    /// Returns an error if target discovery cannot be enabled.
    pub async fn from_connection(connection: Connection, options: BrowserOptions) -> Result<Self> {
        let contexts = Contexts::new(
            connection.clone(),
            options.page.clone(),
            options.target_timeout(),
        )
        .await?;

        Ok(Self {
            inner: Arc::new(BrowserInner {
                connection,
                contexts,
                options,
                process: Mutex::new(None),
            }),
        })
    }

    async fn launch_binary(binary: &Path, options: BrowserOptions) -> Result<Self> {
        let mut process =
            BrowserProcess::start(binary, &options.launch, options.process_timeout).await?;

        let ws_url = process.ws_url().to_string();
        let browser = match Self::connect(&ws_url, options).await {
            Ok(browser) => browser,
            Err(e) => {
                process.stop().await;
                return Err(e);
            }
        };

        *browser.inner.process.lock().await = Some(process);
        Ok(browser)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Returns the connection.
    #[inline]
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.inner.connection
    }

    /// Returns the context registry.
    #[inline]
    #[must_use]
    pub fn contexts(&self) -> &Contexts {
        &self.inner.contexts
    }

    /// Returns the options the browser was started with.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &BrowserOptions {
        &self.inner.options
    }

    /// Returns `true` once the connection is closed.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.connection.is_closed()
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Returns the default context, creating it on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the context cannot be created.
    pub async fn default_context(&self) -> Result<Context> {
        self.inner.contexts.default_context().await
    }

    /// Opens a page in the default context.
    ///
    /// # Errors
    ///
    /// Returns an error if the page cannot be created or attached.
    pub async fn create_page(&self) -> Result<Page> {
        self.default_context().await?.create_page().await
    }

    /// Returns the browser version.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails or the reply is malformed.
    pub async fn version(&self) -> Result<BrowserVersion> {
        let reply = Session::browser(self.inner.connection.clone())
            .command("Browser.getVersion", json!({}))
            .await?;
        Ok(serde_json::from_value(reply)?)
    }

    /// Closes the connection and stops a launched browser.
    ///
    /// A launched browser is asked to exit with `Browser.close` first and
    /// killed afterwards.
    ///
    /// # Errors
    ///
    /// Does not fail today; shutdown problems are logged.
    pub async fn close(&self) -> Result<()> {
        let mut process = self.inner.process.lock().await;

        if process.is_some() && !self.inner.connection.is_closed() {
            let result = Session::browser(self.inner.connection.clone())
                .command_with_timeout("Browser.close", json!({}), CLOSE_GRACE)
                .await;
            if let Err(e) = result {
                debug!(error = %e, "Browser.close failed, killing process");
            }
        }

        self.inner.connection.close();

        if let Some(mut process) = process.take() {
            process.stop().await;
        }

        info!("Browser closed");
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::Mutex as SyncMutex;

    use crate::transport::ConnectionOptions;
    use crate::transport::memory::{self, FakeBrowserHandle};

    #[test]
    fn test_builder_returns_browser_builder() {
        let _builder = Browser::builder();
    }

    #[test]
    fn test_browser_is_clone_and_debug() {
        fn assert_traits<T: Clone + fmt::Debug + Send + Sync>() {}
        assert_traits::<Browser>();
    }

    fn respond(method: &str, id: crate::identifiers::CommandId, handle: &FakeBrowserHandle) -> serde_json::Value {
        match method {
            "Browser.getVersion" => json!({
                "protocolVersion": "1.3",
                "product": "HeadlessChrome/120.0",
                "revision": "@abc",
                "userAgent": "Mozilla/5.0",
                "jsVersion": "12.0"
            }),
            "Target.createBrowserContext" => json!({ "browserContextId": "C1" }),
            "Target.createTarget" => {
                let target_id = format!("T{id}");
                handle.emit(
                    "Target.targetCreated",
                    json!({ "targetInfo": {
                        "targetId": target_id,
                        "type": "page",
                        "url": "about:blank",
                        "browserContextId": "C1"
                    }}),
                    None,
                );
                json!({ "targetId": target_id })
            }
            "Target.attachToTarget" => json!({ "sessionId": "S1" }),
            _ => json!({}),
        }
    }

    async fn browser() -> (Browser, std::sync::Arc<SyncMutex<Vec<String>>>) {
        let (writer, reader, fake) = memory::pair();
        let connection = Connection::new(writer, reader, ConnectionOptions::default()).expect("connection");

        let seen = std::sync::Arc::new(SyncMutex::new(Vec::new()));
        let log = std::sync::Arc::clone(&seen);
        fake.serve(move |command, handle| {
            log.lock().push(command.method.clone());
            Some(Ok(respond(&command.method, command.id, handle)))
        });

        let options = BrowserOptions::connect("ws://127.0.0.1:1/devtools/browser/x");
        let browser = Browser::from_connection(connection, options).await.expect("browser");
        (browser, seen)
    }

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    #[tokio::test]
    async fn test_version() -> anyhow::Result<()> {
        init_tracing();
        let (browser, _seen) = browser().await;

        let version = browser.version().await?;
        assert_eq!(version.protocol_version, "1.3");
        assert_eq!(version.product, "HeadlessChrome/120.0");
        Ok(())
    }

    #[tokio::test]
    async fn test_create_page_in_default_context() {
        init_tracing();
        let (browser, seen) = browser().await;

        let page = browser.create_page().await.expect("page");
        assert_eq!(page.session().id().map(|id| id.as_str()), Some("S1"));

        let methods = seen.lock().clone();
        let position = |name: &str| methods.iter().position(|m| m == name);
        assert!(position("Target.createBrowserContext") < position("Target.createTarget"));
        assert!(position("Target.createTarget") < position("Target.attachToTarget"));
    }

    #[tokio::test]
    async fn test_close_connected_browser() {
        let (browser, seen) = browser().await;
        browser.close().await.expect("close");

        assert!(browser.is_closed());
        assert!(!seen.lock().iter().any(|m| m == "Browser.close"));
    }
}
