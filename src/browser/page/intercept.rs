//! Paused requests and authentication challenges.
//!
//! A paused request is shared by every `Fetch.requestPaused` listener of the
//! page. The first listener to act on it wins; once all listeners ran, a
//! request nobody handled is continued unchanged.
//!
//! Listener callbacks are synchronous, so the answers are written with
//! [`Session::command_detached`] on a spawned task.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as Base64Standard;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::{Map, Value, json};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{FrameId, InterceptionId, RequestId};
use crate::protocol::methods;
use crate::transport::Session;

use super::Page;
use super::network::NetworkMessage;

// ============================================================================
// ContinueOverrides
// ============================================================================

/// Changes applied when continuing a paused request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContinueOverrides {
    /// Replacement url.
    pub url: Option<String>,
    /// Replacement method.
    pub method: Option<String>,
    /// Replacement body.
    pub post_data: Option<Vec<u8>>,
    /// Replacement headers.
    pub headers: Option<Vec<(String, String)>>,
}

impl ContinueOverrides {
    /// Sets the url.
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Sets the method.
    #[must_use]
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn post_data(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.post_data = Some(body.into());
        self
    }

    /// Adds a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(Vec::new)
            .push((name.into(), value.into()));
        self
    }

    fn apply(self, params: &mut Map<String, Value>) {
        if let Some(url) = self.url {
            params.insert("url".to_string(), json!(url));
        }
        if let Some(method) = self.method {
            params.insert("method".to_string(), json!(method));
        }
        if let Some(body) = self.post_data {
            params.insert("postData".to_string(), json!(Base64Standard.encode(body)));
        }
        if let Some(headers) = self.headers {
            params.insert("headers".to_string(), header_entries(&headers));
        }
    }
}

// ============================================================================
// InterceptedRequest
// ============================================================================

/// A request paused by `Fetch.requestPaused`.
pub struct InterceptedRequest {
    id: InterceptionId,
    network_id: Option<RequestId>,
    url: String,
    method: String,
    resource_type: Option<String>,
    frame_id: Option<FrameId>,
    params: Value,
    handled: AtomicBool,
    session: Session,
    network: mpsc::UnboundedSender<NetworkMessage>,
}

impl fmt::Debug for InterceptedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptedRequest")
            .field("id", &self.id)
            .field("url", &self.url)
            .field("method", &self.method)
            .field("handled", &self.is_handled())
            .finish_non_exhaustive()
    }
}

impl InterceptedRequest {
    pub(super) fn from_params(
        params: &Value,
        session: Session,
        network: mpsc::UnboundedSender<NetworkMessage>,
    ) -> Result<Self> {
        let id = params
            .get("requestId")
            .and_then(Value::as_str)
            .map(InterceptionId::new)
            .ok_or_else(|| Error::protocol("Fetch.requestPaused without requestId"))?;

        let text = |pointer: &str| {
            params
                .pointer(pointer)
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        Ok(Self {
            id,
            network_id: text("/networkId").map(RequestId::new),
            url: text("/request/url").unwrap_or_default(),
            method: text("/request/method").unwrap_or_else(|| "GET".to_string()),
            resource_type: text("/resourceType"),
            frame_id: text("/frameId").map(FrameId::new),
            params: params.clone(),
            handled: AtomicBool::new(false),
            session,
            network,
        })
    }

    /// Returns the interception id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &InterceptionId {
        &self.id
    }

    /// Returns the network request id, absent for some service-worker requests.
    #[inline]
    #[must_use]
    pub fn network_id(&self) -> Option<&RequestId> {
        self.network_id.as_ref()
    }

    /// Returns the request url.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the HTTP method.
    #[inline]
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Returns the resource type.
    #[inline]
    #[must_use]
    pub fn resource_type(&self) -> Option<&str> {
        self.resource_type.as_deref()
    }

    /// Returns the initiating frame.
    #[inline]
    #[must_use]
    pub fn frame_id(&self) -> Option<&FrameId> {
        self.frame_id.as_ref()
    }

    /// Returns the request headers.
    #[must_use]
    pub fn headers(&self) -> Map<String, Value> {
        self.params
            .pointer("/request/headers")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns the raw event parameters.
    #[inline]
    #[must_use]
    pub fn params(&self) -> &Value {
        &self.params
    }

    /// Returns `true` once continued, aborted or answered.
    #[inline]
    #[must_use]
    pub fn is_handled(&self) -> bool {
        self.handled.load(Ordering::Acquire)
    }

    /// Lets the request proceed, optionally modified.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the request was already handled.
    pub fn continue_request(&self, overrides: ContinueOverrides) -> Result<()> {
        self.claim()?;

        let mut params = Map::new();
        params.insert("requestId".to_string(), json!(self.id));
        overrides.apply(&mut params);

        trace!(id = %self.id, url = %self.url, "Continuing request");
        self.answer("Fetch.continueRequest", Value::Object(params))
    }

    /// Fails the request as blocked by the client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the request was already handled.
    pub fn abort(&self) -> Result<()> {
        self.claim()?;

        if let Some(network_id) = &self.network_id {
            let _ = self.network.send(NetworkMessage::Blocked(network_id.clone()));
        }

        debug!(id = %self.id, url = %self.url, "Aborting request");
        self.answer(
            "Fetch.failRequest",
            json!({ "requestId": self.id, "errorReason": "BlockedByClient" }),
        )
    }

    /// Answers the request without contacting the server.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the request was already handled.
    pub fn respond(&self, status: u16, headers: &[(String, String)], body: &[u8]) -> Result<()> {
        self.claim()?;

        trace!(id = %self.id, status, "Fulfilling request");
        self.answer(
            "Fetch.fulfillRequest",
            json!({
                "requestId": self.id,
                "responseCode": status,
                "responseHeaders": header_entries(headers),
                "body": Base64Standard.encode(body),
            }),
        )
    }

    fn claim(&self) -> Result<()> {
        if self.handled.swap(true, Ordering::AcqRel) {
            return Err(Error::InvalidArgument {
                message: format!("Request {} was already handled", self.id),
            });
        }
        Ok(())
    }

    fn answer(&self, method: &'static str, params: Value) -> Result<()> {
        send_detached(&self.session, method, params)
    }
}

// ============================================================================
// AuthType
// ============================================================================

/// Source of an authentication challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthType {
    /// `WWW-Authenticate` from the origin server.
    Server,
    /// `Proxy-Authenticate` from a proxy.
    Proxy,
}

impl AuthType {
    /// Returns the challenge source name used on the wire.
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Server => "Server",
            Self::Proxy => "Proxy",
        }
    }

    fn from_source(source: &str) -> Option<Self> {
        match source {
            "Server" => Some(Self::Server),
            "Proxy" => Some(Self::Proxy),
            _ => None,
        }
    }
}

/// Credentials of a page, shared with its `Fetch.authRequired` listener.
#[derive(Debug, Default)]
pub(crate) struct AuthCredentials {
    listening: AtomicBool,
    state: Mutex<AuthState>,
}

#[derive(Debug, Default)]
struct AuthState {
    credentials: FxHashMap<AuthType, (String, String)>,
    /// Requests that already received credentials.
    attempted: FxHashSet<InterceptionId>,
}

impl AuthCredentials {
    /// Stores credentials for `auth_type`, replacing earlier ones.
    fn set(&self, auth_type: AuthType, username: String, password: String) {
        self.state.lock().credentials.insert(auth_type, (username, password));
    }

    /// Returns `true` the first time it is called.
    fn start_listening(&self) -> bool {
        !self.listening.swap(true, Ordering::AcqRel)
    }

    /// Picks the answer to a challenge, or `None` without credentials.
    ///
    /// A request is answered with credentials once; the repeat challenge is
    /// cancelled and forgets the request.
    fn answer(&self, id: &InterceptionId, auth_type: AuthType) -> Option<AuthAnswer> {
        let mut state = self.state.lock();
        let (username, password) = state.credentials.get(&auth_type).cloned()?;

        if state.attempted.insert(id.clone()) {
            Some(AuthAnswer::Credentials { username, password })
        } else {
            state.attempted.remove(id);
            debug!(%id, "Credentials rejected, cancelling challenge");
            Some(AuthAnswer::Cancel)
        }
    }

    #[cfg(test)]
    fn attempted_len(&self) -> usize {
        self.state.lock().attempted.len()
    }
}

/// Response to an authentication challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AuthAnswer {
    Credentials { username: String, password: String },
    Cancel,
}

/// Answers `Fetch.authRequired` with `Fetch.continueWithAuth`.
pub(crate) fn answer_auth(session: &Session, id: &InterceptionId, answer: AuthAnswer) -> Result<()> {
    let response = match answer {
        AuthAnswer::Credentials { username, password } => json!({
            "response": "ProvideCredentials",
            "username": username,
            "password": password,
        }),
        AuthAnswer::Cancel => json!({ "response": "CancelAuth" }),
    };

    send_detached(
        session,
        "Fetch.continueWithAuth",
        json!({ "requestId": id, "authChallengeResponse": response }),
    )
}

// ============================================================================
// Page - Interception
// ============================================================================

impl Page {
    /// Calls `callback` for every paused request.
    ///
    /// Runs on the priority lane. Requests already handled by an earlier
    /// listener are skipped; a request nobody handled is continued after the
    /// last listener. Interception must be enabled with
    /// [`Network::intercept`](super::Network::intercept).
    pub fn on_request<F>(&self, callback: F)
    where
        F: Fn(&InterceptedRequest) -> Result<()> + Send + Sync + 'static,
    {
        let network = self.inner.network.clone();

        self.inner.session.on(methods::REQUEST_PAUSED, move |params: &Value, delivery| {
            let Some(id) = params.get("requestId").and_then(Value::as_str) else {
                return Ok(());
            };
            let Some(request) = network.intercepted(&InterceptionId::new(id)) else {
                return Ok(());
            };

            let result = if request.is_handled() {
                Ok(())
            } else {
                callback(&request)
            };

            network.finish_paused(&request, delivery.is_last())?;
            result
        });
    }

    /// Answers authentication challenges of `auth_type` with credentials.
    ///
    /// Each request gets the credentials once; a repeated challenge for the
    /// same request means they were rejected and is cancelled. Calling it
    /// again replaces the credentials for `auth_type`. Challenges without
    /// credentials are left to later listeners, or cancelled by the last
    /// one.
    ///
    /// # Errors
    ///
    /// Returns an error if interception cannot be enabled.
    pub async fn authorize(
        &self,
        username: impl Into<String>,
        password: impl Into<String>,
        auth_type: AuthType,
    ) -> Result<()> {
        let auth = &self.inner.auth;
        auth.set(auth_type, username.into(), password.into());

        if auth.start_listening() {
            let session = self.inner.session.clone();
            let auth = Arc::clone(auth);

            self.inner.session.on(methods::AUTH_REQUIRED, move |params: &Value, delivery| {
                let Some(id) = params
                    .get("requestId")
                    .and_then(Value::as_str)
                    .map(InterceptionId::new)
                else {
                    return Ok(());
                };

                let auth_type = params
                    .pointer("/authChallenge/source")
                    .and_then(Value::as_str)
                    .map_or(Some(AuthType::Server), AuthType::from_source);

                match auth_type.and_then(|auth_type| auth.answer(&id, auth_type)) {
                    Some(answer) => answer_auth(&session, &id, answer),
                    None if delivery.is_last() => answer_auth(&session, &id, AuthAnswer::Cancel),
                    None => Ok(()),
                }
            });
        }

        self.inner.network.intercept("*", None).await
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn header_entries(headers: &[(String, String)]) -> Value {
    Value::Array(
        headers
            .iter()
            .map(|(name, value)| json!({ "name": name, "value": value }))
            .collect(),
    )
}

fn send_detached(session: &Session, method: &'static str, params: Value) -> Result<()> {
    let handle = Handle::try_current()
        .map_err(|_| Error::protocol(format!("{method} requires a tokio runtime")))?;
    let session = session.clone();

    handle.spawn(async move {
        if let Err(e) = session.command_detached(method, params).await {
            warn!(method, error = %e, "Failed to answer paused request");
        }
    });
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tokio::time::timeout;

    use crate::browser::page::PageOptions;
    use crate::identifiers::{SessionId, TargetId};
    use crate::transport::memory::{self, FakeBrowser, FakeBrowserHandle, RecordedCommand};
    use crate::transport::{Connection, ConnectionOptions};

    fn paused() -> Value {
        json!({
            "requestId": "interception-1",
            "networkId": "7",
            "frameId": "MAIN",
            "resourceType": "Image",
            "request": { "url": "http://x/a.png", "method": "GET", "headers": { "Accept": "image/*" } }
        })
    }

    fn request() -> (InterceptedRequest, FakeBrowser, mpsc::UnboundedReceiver<NetworkMessage>) {
        let (writer, reader, browser) = memory::pair();
        let connection = Connection::new(writer, reader, ConnectionOptions::default()).expect("connection");
        let session = Session::attached(connection, SessionId::new("S1"));
        let (tx, rx) = mpsc::unbounded_channel();

        let request = InterceptedRequest::from_params(&paused(), session, tx).expect("request");
        (request, browser, rx)
    }

    #[tokio::test]
    async fn test_request_fields() {
        let (request, _browser, _rx) = request();

        assert_eq!(request.id().as_str(), "interception-1");
        assert_eq!(request.network_id().map(RequestId::as_str), Some("7"));
        assert_eq!(request.url(), "http://x/a.png");
        assert_eq!(request.resource_type(), Some("Image"));
        assert_eq!(request.headers().get("Accept"), Some(&json!("image/*")));
        assert!(!request.is_handled());
    }

    #[tokio::test]
    async fn test_continue_with_overrides() {
        let (request, mut browser, _rx) = request();

        request
            .continue_request(
                ContinueOverrides::default()
                    .url("http://x/b.png")
                    .post_data("hi")
                    .header("X-Test", "1"),
            )
            .expect("continue");

        let command = timeout(Duration::from_secs(1), browser.next_command())
            .await
            .expect("sent")
            .expect("command");
        assert_eq!(command.method, "Fetch.continueRequest");
        assert_eq!(command.params["url"], "http://x/b.png");
        assert_eq!(command.params["postData"], "aGk=");
        assert_eq!(command.params["headers"], json!([{ "name": "X-Test", "value": "1" }]));
        assert!(request.is_handled());
    }

    #[tokio::test]
    async fn test_abort_marks_exchange_blocked() {
        let (request, mut browser, mut rx) = request();

        request.abort().expect("abort");

        let command = timeout(Duration::from_secs(1), browser.next_command())
            .await
            .expect("sent")
            .expect("command");
        assert_eq!(command.method, "Fetch.failRequest");
        assert_eq!(command.params["errorReason"], "BlockedByClient");
        assert!(matches!(rx.recv().await, Some(NetworkMessage::Blocked(id)) if id.as_str() == "7"));
    }

    #[tokio::test]
    async fn test_second_answer_is_rejected() {
        let (request, mut browser, _rx) = request();

        request
            .respond(200, &[("Content-Type".to_string(), "text/plain".to_string())], b"ok")
            .expect("respond");
        assert!(request.abort().is_err());

        let command = timeout(Duration::from_secs(1), browser.next_command())
            .await
            .expect("sent")
            .expect("command");
        assert_eq!(command.method, "Fetch.fulfillRequest");
        assert_eq!(command.params["responseCode"], 200);
        assert_eq!(command.params["body"], "b2s=");
    }

    #[tokio::test]
    async fn test_auth_answers() {
        let (writer, reader, mut browser) = memory::pair();
        let connection = Connection::new(writer, reader, ConnectionOptions::default()).expect("connection");
        let session = Session::attached(connection, SessionId::new("S1"));
        let id = InterceptionId::new("auth-1");

        answer_auth(
            &session,
            &id,
            AuthAnswer::Credentials {
                username: "user".to_string(),
                password: "secret".to_string(),
            },
        )
        .expect("credentials");
        let command = browser.next_command().await.expect("command");
        assert_eq!(command.method, "Fetch.continueWithAuth");
        assert_eq!(command.params["authChallengeResponse"]["response"], "ProvideCredentials");
        assert_eq!(command.params["authChallengeResponse"]["username"], "user");

        answer_auth(&session, &id, AuthAnswer::Cancel).expect("cancel");
        let command = browser.next_command().await.expect("command");
        assert_eq!(command.params["authChallengeResponse"]["response"], "CancelAuth");
    }

    #[test]
    fn test_missing_request_id_is_rejected() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let runtime = tokio::runtime::Runtime::new().expect("runtime");
        let _guard = runtime.enter();

        let (writer, reader, _browser) = memory::pair();
        let connection = Connection::new(writer, reader, ConnectionOptions::default()).expect("connection");
        let session = Session::browser(connection);

        assert!(InterceptedRequest::from_params(&json!({}), session, tx).is_err());
    }

    async fn recorded_page() -> (Page, FakeBrowserHandle, mpsc::UnboundedReceiver<RecordedCommand>) {
        let (writer, reader, browser) = memory::pair();
        let connection = Connection::new(writer, reader, ConnectionOptions::default()).expect("connection");
        let session = Session::attached(connection, SessionId::new("S1"));
        let handle = browser.handle();

        let (tx, rx) = mpsc::unbounded_channel();
        browser.serve(move |command, _| {
            let _ = tx.send(command.clone());
            Some(Ok(json!({})))
        });

        let page = Page::attach(session, TargetId::new("MAIN"), PageOptions::default())
            .await
            .expect("page");
        (page, handle, rx)
    }

    async fn next_named(rx: &mut mpsc::UnboundedReceiver<RecordedCommand>, method: &str) -> RecordedCommand {
        loop {
            let command = timeout(Duration::from_secs(1), rx.recv())
                .await
                .expect("command in time")
                .expect("command");
            if command.method == method {
                return command;
            }
        }
    }

    fn pause(browser: &FakeBrowserHandle, id: &str, url: &str) {
        browser.emit(
            "Fetch.requestPaused",
            json!({
                "requestId": id,
                "networkId": format!("net-{id}"),
                "request": { "url": url, "method": "GET", "headers": {} }
            }),
            Some(&SessionId::new("S1")),
        );
    }

    #[tokio::test]
    async fn test_blocklist_aborts_matching_requests() {
        let (page, browser, mut rx) = recorded_page().await;

        page.network().set_blocklist(&["*ads*"]).await.expect("rules");
        let enable = next_named(&mut rx, "Fetch.enable").await;
        assert_eq!(enable.params["handleAuthRequests"], true);

        pause(&browser, "i1", "http://ads.example/track.js");
        let failed = next_named(&mut rx, "Fetch.failRequest").await;
        assert_eq!(failed.params["requestId"], "i1");

        pause(&browser, "i2", "http://x/app.js");
        let continued = next_named(&mut rx, "Fetch.continueRequest").await;
        assert_eq!(continued.params["requestId"], "i2");

        let network = page.network().clone();
        timeout(Duration::from_secs(1), async move {
            while network.blocked().len() != 1 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("blocked exchange recorded");
    }

    #[tokio::test]
    async fn test_unhandled_requests_are_continued() {
        let (page, browser, mut rx) = recorded_page().await;

        page.on_request(|request| {
            if request.url().ends_with(".png") {
                request.respond(204, &[], b"")
            } else {
                Ok(())
            }
        });

        pause(&browser, "i1", "http://x/a.png");
        let fulfilled = next_named(&mut rx, "Fetch.fulfillRequest").await;
        assert_eq!(fulfilled.params["responseCode"], 204);

        pause(&browser, "i2", "http://x/a.js");
        let continued = next_named(&mut rx, "Fetch.continueRequest").await;
        assert_eq!(continued.params["requestId"], "i2");
    }

    #[tokio::test]
    async fn test_authorize_once_per_request() {
        let (page, browser, mut rx) = recorded_page().await;
        let sid = SessionId::new("S1");

        page.authorize("user", "secret", AuthType::Server)
            .await
            .expect("authorize");
        next_named(&mut rx, "Fetch.enable").await;

        let challenge = json!({ "requestId": "a1", "authChallenge": { "source": "Server", "origin": "http://x" } });
        browser.emit("Fetch.authRequired", challenge.clone(), Some(&sid));
        let first = next_named(&mut rx, "Fetch.continueWithAuth").await;
        assert_eq!(first.params["authChallengeResponse"]["response"], "ProvideCredentials");
        assert_eq!(first.params["authChallengeResponse"]["password"], "secret");

        browser.emit("Fetch.authRequired", challenge, Some(&sid));
        let repeat = next_named(&mut rx, "Fetch.continueWithAuth").await;
        assert_eq!(repeat.params["authChallengeResponse"]["response"], "CancelAuth");

        browser.emit(
            "Fetch.authRequired",
            json!({ "requestId": "a2", "authChallenge": { "source": "Proxy" } }),
            Some(&sid),
        );
        let other = next_named(&mut rx, "Fetch.continueWithAuth").await;
        assert_eq!(other.params["requestId"], "a2");
        assert_eq!(other.params["authChallengeResponse"]["response"], "CancelAuth");
    }

    #[tokio::test]
    async fn test_authorize_again_replaces_credentials() {
        let (page, browser, mut rx) = recorded_page().await;
        let sid = SessionId::new("S1");

        page.authorize("user", "old", AuthType::Server)
            .await
            .expect("authorize");
        page.authorize("user", "new", AuthType::Server)
            .await
            .expect("authorize again");

        let challenge = json!({ "requestId": "a1", "authChallenge": { "source": "Server" } });
        browser.emit("Fetch.authRequired", challenge.clone(), Some(&sid));
        let first = next_named(&mut rx, "Fetch.continueWithAuth").await;
        assert_eq!(first.params["authChallengeResponse"]["password"], "new");
        assert_eq!(page.inner.auth.attempted_len(), 1);

        browser.emit("Fetch.authRequired", challenge, Some(&sid));
        let repeat = next_named(&mut rx, "Fetch.continueWithAuth").await;
        assert_eq!(repeat.params["authChallengeResponse"]["response"], "CancelAuth");

        // One listener answers each challenge exactly once.
        browser.emit(
            "Fetch.authRequired",
            json!({ "requestId": "a2", "authChallenge": { "source": "Server" } }),
            Some(&sid),
        );
        let next = next_named(&mut rx, "Fetch.continueWithAuth").await;
        assert_eq!(next.params["requestId"], "a2");
        assert_eq!(next.params["authChallengeResponse"]["password"], "new");
        assert!(
            timeout(Duration::from_millis(100), next_named(&mut rx, "Fetch.continueWithAuth"))
                .await
                .is_err()
        );
        assert_eq!(page.inner.auth.attempted_len(), 1);
    }

    #[test]
    fn test_rejected_request_is_forgotten() {
        let auth = AuthCredentials::default();
        let id = InterceptionId::new("a1");

        assert_eq!(auth.answer(&id, AuthType::Server), None);

        auth.set(AuthType::Server, "user".to_string(), "secret".to_string());
        assert!(matches!(auth.answer(&id, AuthType::Server), Some(AuthAnswer::Credentials { .. })));
        assert_eq!(auth.attempted_len(), 1);
        assert_eq!(auth.answer(&id, AuthType::Server), Some(AuthAnswer::Cancel));
        assert_eq!(auth.attempted_len(), 0);
        assert_eq!(auth.answer(&id, AuthType::Proxy), None);

        assert!(auth.start_listening());
        assert!(!auth.start_listening());
    }
}
