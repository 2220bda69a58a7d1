//! Network exchange correlator.
//!
//! Every request the page makes becomes an [`Exchange`], stitched together
//! from independent events sharing a network request id:
//!
//! | Event | Effect |
//! |-------|--------|
//! | `Network.requestWillBeSent` | new exchange (or fills a blank one); a `redirectResponse` completes the previous leg |
//! | `Network.responseReceived` | response attached |
//! | `Network.loadingFinished` | body size computed, response loaded |
//! | `Network.loadingFailed` | error attached |
//! | `Log.entryAdded` (`network`/`error`) | error attached |
//! | `Fetch.requestPaused` | blank exchange ensured, request exposed for interception |
//!
//! A request id maps to more than one exchange only across redirects; the
//! last one is the live leg. Like the frame tracker, a single task owns the
//! traffic table and listeners feed it over a channel.

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use regex::Regex;
use rustc_hash::FxHashMap;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{FrameId, InterceptionId, RequestId};
use crate::protocol::methods;
use crate::transport::Session;

use super::frames::Frames;
use super::intercept::{ContinueOverrides, InterceptedRequest};

// ============================================================================
// Constants
// ============================================================================

/// Poll interval of [`Network::wait_for_idle`].
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Resource type of top-level documents.
const DOCUMENT_TYPE: &str = "Document";

/// Events forwarded to the tracker.
const TRACKED_EVENTS: &[&str] = &[
    methods::REQUEST_WILL_BE_SENT,
    methods::RESPONSE_RECEIVED,
    methods::LOADING_FINISHED,
    methods::LOADING_FAILED,
    methods::LOG_ENTRY_ADDED,
];

// ============================================================================
// Request / Response / NetworkError
// ============================================================================

/// Outgoing request as announced by the browser.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Network request id.
    pub request_id: RequestId,
    /// HTTP method.
    pub method: String,
    /// Request url.
    pub url: String,
    /// Request headers.
    pub headers: BTreeMap<String, String>,
    /// Resource type (`Document`, `Script`, `XHR`, ...).
    pub resource_type: Option<String>,
    /// Initiating frame.
    pub frame_id: Option<FrameId>,
    /// Loader id.
    pub loader_id: Option<String>,
    /// Monotonic timestamp in seconds.
    pub timestamp: Option<f64>,
}

impl Request {
    fn from_params(request_id: RequestId, params: &Value) -> Self {
        Self {
            request_id,
            method: string_at(params, "/request/method").unwrap_or_else(|| "GET".to_string()),
            url: string_at(params, "/request/url").unwrap_or_default(),
            headers: headers_at(params, "/request/headers"),
            resource_type: string_at(params, "/type"),
            frame_id: string_at(params, "/frameId").map(FrameId::new),
            loader_id: string_at(params, "/loaderId"),
            timestamp: params.get("timestamp").and_then(Value::as_f64),
        }
    }

    /// Returns `true` for top-level document requests.
    #[inline]
    #[must_use]
    pub fn is_document(&self) -> bool {
        self.resource_type.as_deref() == Some(DOCUMENT_TYPE)
    }
}

/// Response to a request.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Response url.
    pub url: String,
    /// HTTP status code.
    pub status: u16,
    /// HTTP status text.
    pub status_text: String,
    /// Response headers.
    pub headers: BTreeMap<String, String>,
    /// MIME type.
    pub mime_type: String,
    /// Bytes received for headers.
    pub headers_size: u64,
    /// Encoded body size, known once loading finished.
    pub body_size: Option<u64>,
    /// Loading finished.
    pub loaded: bool,
}

impl Response {
    fn from_value(response: &Value) -> Self {
        let status = response
            .get("status")
            .and_then(Value::as_u64)
            .and_then(|status| u16::try_from(status).ok())
            .unwrap_or_default();

        Self {
            url: string_at(response, "/url").unwrap_or_default(),
            status,
            status_text: string_at(response, "/statusText").unwrap_or_default(),
            headers: headers_at(response, "/headers"),
            mime_type: string_at(response, "/mimeType").unwrap_or_default(),
            headers_size: response
                .get("encodedDataLength")
                .and_then(Value::as_f64)
                .map_or(0, |size| size as u64),
            body_size: None,
            loaded: false,
        }
    }
}

/// Failure of a request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetworkError {
    /// Resource type of the failed request.
    pub error_type: Option<String>,
    /// Browser error text (`net::ERR_...`).
    pub error_text: String,
    /// Failed url, when reported.
    pub url: Option<String>,
    /// The request was cancelled.
    pub canceled: bool,
    /// Timestamp of the failure.
    pub timestamp: Option<f64>,
}

// ============================================================================
// Exchange
// ============================================================================

/// One request and whatever came back for it.
#[derive(Debug, Clone, PartialEq)]
pub struct Exchange {
    /// Network request id.
    pub id: RequestId,
    /// Request, `None` while the exchange is blank.
    pub request: Option<Request>,
    /// Response, `None` until received.
    pub response: Option<Response>,
    /// Failure, if any.
    pub error: Option<NetworkError>,
    /// Aborted by interception.
    pub blocked: bool,
}

impl Exchange {
    fn new(id: RequestId) -> Self {
        Self {
            id,
            request: None,
            response: None,
            error: None,
            blocked: false,
        }
    }

    /// Returns `true` if created from an intercepted request that the
    /// network domain has not announced yet.
    #[inline]
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.request.is_none()
    }

    /// Returns `true` once a response, an error or a block is recorded.
    #[inline]
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.blocked || self.response.is_some() || self.error.is_some()
    }

    /// Returns `true` while nothing came back.
    #[inline]
    #[must_use]
    pub fn is_pending(&self) -> bool {
        !self.is_finished()
    }

    /// Returns the request url, if known.
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        self.request.as_ref().map(|request| request.url.as_str())
    }
}

// ============================================================================
// Traffic
// ============================================================================

/// Ordered exchange table.
#[derive(Debug, Default)]
pub(crate) struct Traffic {
    exchanges: Vec<Exchange>,
    navigation: Option<usize>,
}

impl Traffic {
    fn last_index(&self, id: &RequestId) -> Option<usize> {
        self.exchanges.iter().rposition(|exchange| &exchange.id == id)
    }

    fn last_mut(&mut self, id: &RequestId) -> Option<&mut Exchange> {
        let index = self.last_index(id)?;
        self.exchanges.get_mut(index)
    }

    fn push(&mut self, id: RequestId) -> usize {
        self.exchanges.push(Exchange::new(id));
        self.exchanges.len() - 1
    }

    /// Makes sure an exchange exists for an intercepted request.
    pub(crate) fn ensure(&mut self, id: &RequestId) {
        if self.last_index(id).is_none() {
            self.push(id.clone());
        }
    }

    pub(crate) fn request_will_be_sent<F>(&mut self, params: &Value, is_main_frame: F)
    where
        F: Fn(&FrameId) -> bool,
    {
        let Some(id) = string_at(params, "/requestId").map(RequestId::new) else {
            return;
        };

        let index = match self.last_index(&id) {
            Some(index) if self.exchanges[index].is_blank() => index,
            _ => self.push(id.clone()),
        };

        if let Some(redirect) = params.get("redirectResponse") {
            let previous = self.exchanges[..index]
                .iter()
                .rposition(|exchange| exchange.id == id);

            if let Some(previous) = previous {
                let mut response = Response::from_value(redirect);
                response.loaded = true;
                self.exchanges[previous].response = Some(response);
                trace!(request_id = %id, "Redirect leg completed");
            }
        }

        let request = Request::from_params(id, params);
        let is_navigation =
            request.is_document() && request.frame_id.as_ref().is_some_and(&is_main_frame);

        self.exchanges[index].request = Some(request);
        if is_navigation {
            self.navigation = Some(index);
        }
    }

    pub(crate) fn response_received(&mut self, params: &Value) {
        let Some(id) = string_at(params, "/requestId").map(RequestId::new) else {
            return;
        };
        let Some(response) = params.get("response") else {
            return;
        };

        if let Some(exchange) = self.last_mut(&id) {
            exchange.response = Some(Response::from_value(response));
        }
    }

    pub(crate) fn loading_finished(&mut self, params: &Value) {
        let Some(id) = string_at(params, "/requestId").map(RequestId::new) else {
            return;
        };
        let encoded = params
            .get("encodedDataLength")
            .and_then(Value::as_f64)
            .map_or(0, |size| size as u64);

        if let Some(response) = self.last_mut(&id).and_then(|exchange| exchange.response.as_mut()) {
            response.body_size = Some(encoded.saturating_sub(response.headers_size));
            response.loaded = true;
        }
    }

    pub(crate) fn loading_failed(&mut self, params: &Value) {
        let Some(id) = string_at(params, "/requestId").map(RequestId::new) else {
            return;
        };

        if let Some(exchange) = self.last_mut(&id) {
            exchange.error = Some(NetworkError {
                error_type: string_at(params, "/type"),
                error_text: string_at(params, "/errorText").unwrap_or_default(),
                url: exchange.request.as_ref().map(|request| request.url.clone()),
                canceled: params.get("canceled").and_then(Value::as_bool).unwrap_or(false),
                timestamp: params.get("timestamp").and_then(Value::as_f64),
            });
        }
    }

    pub(crate) fn log_entry_added(&mut self, params: &Value) {
        let Some(entry) = params.get("entry") else {
            return;
        };
        if string_at(entry, "/source").as_deref() != Some("network")
            || string_at(entry, "/level").as_deref() != Some("error")
        {
            return;
        }
        let Some(id) = string_at(entry, "/networkRequestId").map(RequestId::new) else {
            return;
        };

        if let Some(exchange) = self.last_mut(&id) {
            let error = exchange.error.get_or_insert_with(NetworkError::default);
            error.url = string_at(entry, "/url").or(error.url.take());
            error.error_text = string_at(entry, "/text").unwrap_or_default();
            error.timestamp = entry.get("timestamp").and_then(Value::as_f64);
        }
    }

    pub(crate) fn mark_blocked(&mut self, id: &RequestId) {
        if let Some(exchange) = self.last_mut(id) {
            exchange.blocked = true;
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.exchanges.len()
    }

    pub(crate) fn finished(&self) -> usize {
        self.exchanges.iter().filter(|exchange| exchange.is_finished()).count()
    }

    pub(crate) fn pending(&self) -> usize {
        self.len() - self.finished()
    }

    /// Returns `true` if at most `connections` exchanges are still open.
    pub(crate) fn is_idle(&self, connections: usize) -> bool {
        self.pending() <= connections
    }

    pub(crate) fn navigation(&self) -> Option<&Exchange> {
        self.exchanges.get(self.navigation?)
    }

    pub(crate) fn clear(&mut self) {
        self.exchanges.clear();
        self.navigation = None;
    }
}

// ============================================================================
// Types
// ============================================================================

/// Input of the tracker task.
#[derive(Debug)]
pub(super) enum NetworkMessage {
    /// Traffic event from the session.
    Event { method: &'static str, params: Value },
    /// A request was paused by interception.
    Paused(RequestId),
    /// A paused request was aborted.
    Blocked(RequestId),
}

struct NetworkInner {
    session: Session,
    frames: Frames,
    traffic: RwLock<Traffic>,
    intercepted: Mutex<FxHashMap<InterceptionId, Arc<InterceptedRequest>>>,
    blocklist: RwLock<Vec<Regex>>,
    allowlist: RwLock<Vec<Regex>>,
    tx: mpsc::UnboundedSender<NetworkMessage>,
}

// ============================================================================
// Network
// ============================================================================

/// Network traffic and interception of one page.
#[derive(Clone)]
pub struct Network {
    inner: Arc<NetworkInner>,
}

impl fmt::Debug for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Network")
            .field("traffic", &self.inner.traffic.read().len())
            .field("intercepted", &self.inner.intercepted.lock().len())
            .finish_non_exhaustive()
    }
}

impl Network {
    /// Subscribes to the session's traffic events and starts the tracker.
    ///
    /// Must be called within a tokio runtime, before the `Network`, `Log`
    /// and `Fetch` domains are enabled.
    pub(crate) fn new(session: Session, frames: Frames) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        for &method in TRACKED_EVENTS {
            let tx = tx.clone();
            session.on(method, move |params: &Value, _| {
                tx.send(NetworkMessage::Event {
                    method,
                    params: params.clone(),
                })
                .map_err(|_| Error::protocol("network tracker stopped"))
            });
        }

        let inner = Arc::new(NetworkInner {
            session: session.clone(),
            frames,
            traffic: RwLock::new(Traffic::default()),
            intercepted: Mutex::new(FxHashMap::default()),
            blocklist: RwLock::new(Vec::new()),
            allowlist: RwLock::new(Vec::new()),
            tx,
        });

        // First priority listener: registers the request and applies the
        // block and allow lists.
        let weak = Arc::downgrade(&inner);
        session.on(methods::REQUEST_PAUSED, move |params: &Value, delivery| {
            let Some(inner) = weak.upgrade() else {
                return Ok(());
            };
            let request = inner.register_paused(params)?;

            if inner.is_refused(request.url()) {
                debug!(url = %request.url(), "Request refused by block rules");
                request.abort()?;
            }

            Network { inner }.finish_paused(&request, delivery.is_last())
        });

        tokio::spawn(run_tracker(Arc::downgrade(&inner), rx));

        Self { inner }
    }

    // ========================================================================
    // Traffic Queries
    // ========================================================================

    /// Returns every exchange in discovery order.
    #[must_use]
    pub fn exchanges(&self) -> Vec<Exchange> {
        self.inner.traffic.read().exchanges.clone()
    }

    /// Returns the number of exchanges.
    #[must_use]
    pub fn traffic_len(&self) -> usize {
        self.inner.traffic.read().len()
    }

    /// Returns the number of exchanges still waiting for a response.
    #[must_use]
    pub fn pending_connections(&self) -> usize {
        self.inner.traffic.read().pending()
    }

    /// Returns the number of finished exchanges.
    #[must_use]
    pub fn finished_connections(&self) -> usize {
        self.inner.traffic.read().finished()
    }

    /// Returns exchanges aborted by interception.
    #[must_use]
    pub fn blocked(&self) -> Vec<Exchange> {
        self.inner
            .traffic
            .read()
            .exchanges
            .iter()
            .filter(|exchange| exchange.blocked)
            .cloned()
            .collect()
    }

    /// Returns urls of exchanges still waiting for a response.
    #[must_use]
    pub fn pending_urls(&self) -> Vec<String> {
        self.inner
            .traffic
            .read()
            .exchanges
            .iter()
            .filter(|exchange| exchange.is_pending())
            .filter_map(|exchange| exchange.url().map(str::to_string))
            .collect()
    }

    /// Returns the main-frame document exchange of the last navigation.
    #[must_use]
    pub fn navigation(&self) -> Option<Exchange> {
        self.inner.traffic.read().navigation().cloned()
    }

    /// Returns the request of the last navigation.
    #[must_use]
    pub fn request(&self) -> Option<Request> {
        self.navigation().and_then(|exchange| exchange.request)
    }

    /// Returns the response of the last navigation.
    #[must_use]
    pub fn response(&self) -> Option<Response> {
        self.navigation().and_then(|exchange| exchange.response)
    }

    /// Returns the HTTP status of the last navigation.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        self.response().map(|response| response.status)
    }

    /// Returns `true` if at most `connections` exchanges are open.
    #[must_use]
    pub fn is_idle(&self, connections: usize) -> bool {
        self.inner.traffic.read().is_idle(connections)
    }

    /// Waits until at most `connections` exchanges are open.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if traffic does not settle in time.
    pub async fn wait_for_idle(&self, connections: usize, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;

        loop {
            if self.is_idle(connections) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::timeout(
                    format!("network idle ({} pending)", self.pending_connections()),
                    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                ));
            }
            sleep(IDLE_POLL_INTERVAL).await;
        }
    }

    /// Drops recorded traffic.
    pub fn clear(&self) {
        self.inner.traffic.write().clear();
    }

    /// Clears the browser's HTTP cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn clear_cache(&self) -> Result<()> {
        self.inner
            .session
            .command("Network.clearBrowserCache", json!({}))
            .await?;
        Ok(())
    }

    // ========================================================================
    // Interception
    // ========================================================================

    /// Pauses requests matching `pattern` (`*` wildcards) for interception.
    ///
    /// Authentication challenges are paused as well.
    ///
    /// # Errors
    ///
    /// Returns an error if the command fails.
    pub async fn intercept(&self, pattern: &str, resource_type: Option<&str>) -> Result<()> {
        let mut entry = json!({ "urlPattern": pattern });
        if let Some(resource_type) = resource_type {
            entry["resourceType"] = json!(resource_type);
        }

        debug!(pattern, ?resource_type, "Enabling request interception");

        self.inner
            .session
            .command(
                "Fetch.enable",
                json!({ "handleAuthRequests": true, "patterns": [entry] }),
            )
            .await?;
        Ok(())
    }

    /// Aborts requests whose url matches any of `patterns`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for an invalid pattern, or an
    /// error if interception cannot be enabled.
    pub async fn set_blocklist(&self, patterns: &[&str]) -> Result<()> {
        *self.inner.blocklist.write() = compile(patterns)?;
        self.enable_rules(patterns).await
    }

    /// Aborts requests whose url matches none of `patterns`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for an invalid pattern, or an
    /// error if interception cannot be enabled.
    pub async fn set_allowlist(&self, patterns: &[&str]) -> Result<()> {
        *self.inner.allowlist.write() = compile(patterns)?;
        self.enable_rules(patterns).await
    }

    async fn enable_rules(&self, patterns: &[&str]) -> Result<()> {
        if patterns.is_empty() {
            return Ok(());
        }
        self.intercept("*", None).await
    }

    /// Returns the paused request for an interception id.
    pub(crate) fn intercepted(&self, id: &InterceptionId) -> Option<Arc<InterceptedRequest>> {
        self.inner.intercepted.lock().get(id).cloned()
    }

    /// Continues the request if nobody handled it, once every listener ran.
    pub(crate) fn finish_paused(&self, request: &InterceptedRequest, is_last: bool) -> Result<()> {
        if !is_last {
            return Ok(());
        }

        self.inner.intercepted.lock().remove(request.id());
        if request.is_handled() {
            return Ok(());
        }
        request.continue_request(ContinueOverrides::default())
    }
}

impl NetworkInner {
    fn register_paused(&self, params: &Value) -> Result<Arc<InterceptedRequest>> {
        let request = Arc::new(InterceptedRequest::from_params(
            params,
            self.session.clone(),
            self.tx.clone(),
        )?);

        if let Some(network_id) = request.network_id() {
            let _ = self.tx.send(NetworkMessage::Paused(network_id.clone()));
        }

        self.intercepted
            .lock()
            .insert(request.id().clone(), Arc::clone(&request));
        Ok(request)
    }

    fn is_refused(&self, url: &str) -> bool {
        if self.blocklist.read().iter().any(|pattern| pattern.is_match(url)) {
            return true;
        }

        let allowlist = self.allowlist.read();
        !allowlist.is_empty() && !allowlist.iter().any(|pattern| pattern.is_match(url))
    }
}

// ============================================================================
// Tracker
// ============================================================================

async fn run_tracker(network: Weak<NetworkInner>, mut rx: mpsc::UnboundedReceiver<NetworkMessage>) {
    while let Some(message) = rx.recv().await {
        let Some(inner) = network.upgrade() else {
            break;
        };

        let mut traffic = inner.traffic.write();
        match message {
            NetworkMessage::Event { method, params } => match method {
                methods::REQUEST_WILL_BE_SENT => traffic
                    .request_will_be_sent(&params, |frame_id| inner.frames.is_main_frame(frame_id)),
                methods::RESPONSE_RECEIVED => traffic.response_received(&params),
                methods::LOADING_FINISHED => traffic.loading_finished(&params),
                methods::LOADING_FAILED => traffic.loading_failed(&params),
                methods::LOG_ENTRY_ADDED => traffic.log_entry_added(&params),
                other => warn!(method = other, "Unexpected network event"),
            },
            NetworkMessage::Paused(id) => traffic.ensure(&id),
            NetworkMessage::Blocked(id) => traffic.mark_blocked(&id),
        }
    }

    trace!("Network tracker stopped");
}

// ============================================================================
// Helpers
// ============================================================================

fn string_at(value: &Value, pointer: &str) -> Option<String> {
    value.pointer(pointer).and_then(Value::as_str).map(str::to_string)
}

fn headers_at(value: &Value, pointer: &str) -> BTreeMap<String, String> {
    let Some(Value::Object(map)) = value.pointer(pointer) else {
        return BTreeMap::new();
    };

    map.iter()
        .map(|(name, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (name.clone(), value)
        })
        .collect()
}

/// Compiles `*`-wildcard url patterns.
fn compile(patterns: &[&str]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|pattern| {
            let source = format!("^{}$", regex::escape(pattern).replace(r"\*", ".*"));
            Regex::new(&source).map_err(|e| Error::InvalidArgument {
                message: format!("Invalid url pattern {pattern:?}: {e}"),
            })
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
