//! In-process transport.
//!
//! [`pair`] returns a transport whose far end is a [`FakeBrowser`]: a
//! scripted peer that reads the commands the connection writes and pushes
//! replies and events back. Tests and benchmarks drive the whole engine
//! through it without a browser process.
//!
//! # Example
//!
//! ```ignore
//! let (writer, reader, mut browser) = memory::pair();
//! let connection = Connection::new(writer, reader, ConnectionOptions::default());
//!
//! let call = tokio::spawn(async move { connection.send("Browser.getVersion", json!({}), None).await });
//! let command = browser.next_command().await.expect("command");
//! browser.reply(command.id, json!({ "product": "Fake/1.0" }));
//! ```

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{CommandId, SessionId};
use crate::protocol::ReplyError;

use super::{TransportReader, TransportWriter};

// ============================================================================
// Types
// ============================================================================

/// Frame travelling from the fake browser to the connection.
#[derive(Debug)]
enum Frame {
    Text(String),
    Close,
}

// ============================================================================
// pair
// ============================================================================

/// Creates an in-process transport and its scripted far end.
#[must_use]
pub fn pair() -> (MemoryWriter, MemoryReader, FakeBrowser) {
    let (to_browser_tx, to_browser_rx) = mpsc::unbounded_channel();
    let (to_local_tx, to_local_rx) = mpsc::unbounded_channel();

    let writer = MemoryWriter {
        tx: Some(to_browser_tx),
    };
    let reader = MemoryReader {
        rx: to_local_rx,
        ended: false,
    };
    let browser = FakeBrowser {
        commands: to_browser_rx,
        handle: FakeBrowserHandle { tx: to_local_tx },
    };

    (writer, reader, browser)
}

// ============================================================================
// MemoryWriter / MemoryReader
// ============================================================================

/// Sending half of the in-process transport.
#[derive(Debug)]
pub struct MemoryWriter {
    tx: Option<mpsc::UnboundedSender<String>>,
}

#[async_trait]
impl TransportWriter for MemoryWriter {
    async fn send(&mut self, text: String) -> Result<()> {
        let tx = self.tx.as_ref().ok_or(Error::DeadConnection)?;
        tx.send(text).map_err(|_| Error::DeadConnection)
    }

    async fn close(&mut self) -> Result<()> {
        self.tx = None;
        Ok(())
    }
}

/// Receiving half of the in-process transport.
#[derive(Debug)]
pub struct MemoryReader {
    rx: mpsc::UnboundedReceiver<Frame>,
    ended: bool,
}

#[async_trait]
impl TransportReader for MemoryReader {
    async fn receive(&mut self) -> Option<Result<String>> {
        if self.ended {
            return None;
        }

        match self.rx.recv().await {
            Some(Frame::Text(text)) => Some(Ok(text)),
            Some(Frame::Close) | None => {
                self.ended = true;
                None
            }
        }
    }
}

// ============================================================================
// RecordedCommand
// ============================================================================

/// A command as seen by the fake browser.
#[derive(Debug, Clone, Deserialize)]
pub struct RecordedCommand {
    /// Command id.
    pub id: CommandId,
    /// Method name.
    pub method: String,
    /// Parameters.
    #[serde(default)]
    pub params: Value,
    /// Target session.
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<SessionId>,
}

// ============================================================================
// FakeBrowserHandle
// ============================================================================

/// Cloneable sending side of a [`FakeBrowser`].
#[derive(Debug, Clone)]
pub struct FakeBrowserHandle {
    tx: mpsc::UnboundedSender<Frame>,
}

impl FakeBrowserHandle {
    /// Sends a raw text frame.
    pub fn send_raw(&self, text: impl Into<String>) {
        if self.tx.send(Frame::Text(text.into())).is_err() {
            trace!("Fake browser frame dropped, connection gone");
        }
    }

    /// Replies with a result.
    pub fn reply(&self, id: CommandId, result: Value) {
        self.send_raw(json!({ "id": id, "result": result }).to_string());
    }

    /// Replies with an error object.
    pub fn reply_error(&self, id: CommandId, code: i64, message: &str) {
        self.send_raw(json!({ "id": id, "error": { "code": code, "message": message } }).to_string());
    }

    /// Emits an event, optionally scoped to a session.
    pub fn emit(&self, method: &str, params: Value, session_id: Option<&SessionId>) {
        let message = match session_id {
            Some(session_id) => json!({ "method": method, "params": params, "sessionId": session_id }),
            None => json!({ "method": method, "params": params }),
        };
        self.send_raw(message.to_string());
    }

    /// Ends the stream; the connection sees end of file.
    pub fn close(&self) {
        let _ = self.tx.send(Frame::Close);
    }
}

// ============================================================================
// FakeBrowser
// ============================================================================

/// Scripted far end of an in-process transport.
#[derive(Debug)]
pub struct FakeBrowser {
    commands: mpsc::UnboundedReceiver<String>,
    handle: FakeBrowserHandle,
}

impl FakeBrowser {
    /// Returns a cloneable handle for emitting frames from other tasks.
    #[inline]
    #[must_use]
    pub fn handle(&self) -> FakeBrowserHandle {
        self.handle.clone()
    }

    /// Waits for the next command written by the connection.
    ///
    /// Returns `None` once the connection has closed its writer.
    pub async fn next_command(&mut self) -> Option<RecordedCommand> {
        loop {
            let text = self.commands.recv().await?;
            match serde_json::from_str::<RecordedCommand>(&text) {
                Ok(command) => return Some(command),
                Err(e) => warn!(error = %e, %text, "Fake browser received malformed command"),
            }
        }
    }

    /// Replies with a result.
    #[inline]
    pub fn reply(&self, id: CommandId, result: Value) {
        self.handle.reply(id, result);
    }

    /// Replies with an error object.
    #[inline]
    pub fn reply_error(&self, id: CommandId, code: i64, message: &str) {
        self.handle.reply_error(id, code, message);
    }

    /// Emits an event.
    #[inline]
    pub fn emit(&self, method: &str, params: Value, session_id: Option<&SessionId>) {
        self.handle.emit(method, params, session_id);
    }

    /// Ends the stream.
    #[inline]
    pub fn close(&self) {
        self.handle.close();
    }

    /// Answers every command with `responder` on a background task.
    ///
    /// The responder returns the reply, or `None` to leave the command
    /// unanswered. The task ends when the connection closes its writer.
    pub fn serve<F>(mut self, mut responder: F) -> JoinHandle<()>
    where
        F: FnMut(&RecordedCommand, &FakeBrowserHandle) -> Option<std::result::Result<Value, ReplyError>>
            + Send
            + 'static,
    {
        tokio::spawn(async move {
            while let Some(command) = self.next_command().await {
                match responder(&command, &self.handle) {
                    Some(Ok(result)) => self.handle.reply(command.id, result),
                    Some(Err(error)) => self.handle.reply_error(command.id, error.code, &error.message),
                    None => trace!(id = %command.id, method = %command.method, "Command left unanswered"),
                }
            }
        })
    }

    /// Answers every command with an empty result.
    pub fn serve_empty(self) -> JoinHandle<()> {
        self.serve(|_, _| Some(Ok(json!({}))))
    }
}

// ============================================================================
// Tests
// ============================================================================
