//! Browser process management.
//!
//! [`BrowserProcess::start`] launches the browser with an ephemeral
//! debugging port and a throwaway user data directory, then reads stderr
//! until the browser prints its WebSocket endpoint.

// ============================================================================
// Imports
// ============================================================================

use std::path::Path;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, info, trace};

use crate::error::{Error, Result};

use super::options::LaunchOptions;

// ============================================================================
// Constants
// ============================================================================

/// Endpoint announcement printed by the browser on stderr.
static LISTENING: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"DevTools listening on (ws://\S+)").ok());

// ============================================================================
// ProcessGuard
// ============================================================================

/// Kills the child process when dropped.
struct ProcessGuard {
    child: Option<Child>,
    pid: u32,
}

impl ProcessGuard {
    fn new(child: Child) -> Self {
        let pid = child.id().unwrap_or(0);
        debug!(pid, "Process guard created");
        Self {
            child: Some(child),
            pid,
        }
    }

    async fn kill(&mut self) {
        if let Some(mut child) = self.child.take() {
            debug!(pid = self.pid, "Killing browser process");
            if let Err(e) = child.kill().await {
                debug!(pid = self.pid, error = %e, "Failed to kill process");
            }
            if let Err(e) = child.wait().await {
                debug!(pid = self.pid, error = %e, "Failed to wait for process");
            }
            info!(pid = self.pid, "Process terminated");
        }
    }

    fn is_running(&self) -> bool {
        self.child.is_some()
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take()
            && let Err(e) = child.start_kill()
        {
            debug!(pid = self.pid, error = %e, "Failed to send kill signal in Drop");
        }
    }
}

// ============================================================================
// BrowserProcess
// ============================================================================

/// A launched browser process.
///
/// The process is killed and its user data directory removed on
/// [`stop`](Self::stop) or drop.
pub struct BrowserProcess {
    guard: ProcessGuard,
    ws_url: String,
    _user_data_dir: TempDir,
}

impl std::fmt::Debug for BrowserProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserProcess")
            .field("pid", &self.guard.pid)
            .field("ws_url", &self.ws_url)
            .finish_non_exhaustive()
    }
}

impl BrowserProcess {
    /// Launches `binary` and waits for its endpoint announcement.
    ///
    /// # Errors
    ///
    /// - [`Error::BinaryNotFound`] if `binary` doesn't exist
    /// - [`Error::ProcessLaunchFailed`] if the process cannot be spawned or
    ///   exits before announcing
    /// - [`Error::ProcessTimeout`] if no endpoint appears within
    ///   `process_timeout`
    pub async fn start(
        binary: &Path,
        options: &LaunchOptions,
        process_timeout: Duration,
    ) -> Result<Self> {
        if !binary.exists() {
            return Err(Error::binary_not_found(binary));
        }

        let user_data_dir = tempfile::Builder::new().prefix("devtools-profile-").tempdir()?;

        let mut cmd = Command::new(binary);
        cmd.args(LaunchOptions::base_args())
            .arg(format!("--user-data-dir={}", user_data_dir.path().display()))
            .args(options.to_args())
            .arg("about:blank")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(Error::process_launch_failed)?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::ProcessLaunchFailed {
                message: "stderr not captured".to_string(),
            })?;

        let mut guard = ProcessGuard::new(child);
        info!(pid = guard.pid, binary = %binary.display(), "Browser process spawned");

        let mut lines = BufReader::new(stderr).lines();
        let timeout_ms = u64::try_from(process_timeout.as_millis()).unwrap_or(u64::MAX);
        let ws_url = match timeout(process_timeout, read_endpoint(&mut lines)).await {
            Ok(Ok(ws_url)) => ws_url,
            Ok(Err(e)) => {
                guard.kill().await;
                return Err(e);
            }
            Err(_) => {
                guard.kill().await;
                return Err(Error::process_timeout(timeout_ms));
            }
        };

        debug!(pid = guard.pid, %ws_url, "Browser endpoint announced");

        // Keep draining so the browser never blocks on a full pipe.
        tokio::spawn(async move {
            while let Ok(Some(line)) = lines.next_line().await {
                trace!(%line, "Browser output");
            }
        });

        Ok(Self {
            guard,
            ws_url,
            _user_data_dir: user_data_dir,
        })
    }

    /// Returns the announced WebSocket endpoint.
    #[inline]
    #[must_use]
    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Returns the process id.
    #[inline]
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.guard.pid
    }

    /// Returns `true` until the process is stopped.
    #[inline]
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.guard.is_running()
    }

    /// Kills the process and waits for it to exit.
    pub async fn stop(&mut self) {
        self.guard.kill().await;
    }
}

// ============================================================================
// Endpoint Scraping
// ============================================================================

/// Returns the endpoint from a line of browser output.
fn parse_endpoint(line: &str) -> Option<String> {
    LISTENING
        .as_ref()?
        .captures(line)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().to_string())
}

/// Reads lines until the endpoint announcement.
async fn read_endpoint<R>(lines: &mut Lines<BufReader<R>>) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    while let Some(line) = lines.next_line().await? {
        trace!(%line, "Browser output");
        if let Some(ws_url) = parse_endpoint(&line) {
            return Ok(ws_url);
        }
    }

    Err(Error::ProcessLaunchFailed {
        message: "browser exited before announcing its endpoint".to_string(),
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_endpoint() {
        let line = "DevTools listening on ws://127.0.0.1:39111/devtools/browser/5f0c-aa";
        assert_eq!(
            parse_endpoint(line).as_deref(),
            Some("ws://127.0.0.1:39111/devtools/browser/5f0c-aa")
        );
        assert!(parse_endpoint("[1234:ERROR] something else").is_none());
    }

    #[tokio::test]
    async fn test_read_endpoint_skips_noise() {
        let output: &[u8] = b"warning: sandbox disabled\n\
            \n\
            DevTools listening on ws://127.0.0.1:9222/devtools/browser/abc\n\
            more output\n";

        let mut lines = BufReader::new(output).lines();
        let ws_url = read_endpoint(&mut lines).await.expect("endpoint");
        assert_eq!(lines.next_line().await.expect("read").as_deref(), Some("more output"));
        assert_eq!(ws_url, "ws://127.0.0.1:9222/devtools/browser/abc");
    }

    #[tokio::test]
    async fn test_read_endpoint_fails_on_eof() {
        let output: &[u8] = b"crashed\n";
        let mut lines = BufReader::new(output).lines();
        let err = read_endpoint(&mut lines).await.expect_err("no endpoint");
        assert!(matches!(err, Error::ProcessLaunchFailed { .. }));
    }

    #[tokio::test]
    async fn test_start_rejects_missing_binary() {
        let err = BrowserProcess::start(
            Path::new("/nonexistent/chromium"),
            &LaunchOptions::default(),
            Duration::from_secs(1),
        )
        .await
        .expect_err("missing binary");
        assert!(matches!(err, Error::BinaryNotFound { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_start_fails_when_process_exits_silently() {
        let err = BrowserProcess::start(
            Path::new("/bin/false"),
            &LaunchOptions::default(),
            Duration::from_secs(5),
        )
        .await
        .expect_err("no announcement");
        assert!(matches!(err, Error::ProcessLaunchFailed { .. }));
    }
}
