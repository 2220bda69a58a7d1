//! Script evaluation and result decoding.
//!
//! Expressions are wrapped in a function and run with
//! `Runtime.callFunctionOn` in the execution context of a frame. Results
//! come back as remote object handles and are decoded into [`RemoteValue`]:
//!
//! | Remote kind | Decoded as |
//! |-------------|------------|
//! | primitive, `null`, `undefined` | inline value |
//! | node | [`RemoteValue::Node`] handle |
//! | array, object | own enumerable properties, recursively |
//! | date, function | description |
//! | self-referencing array/object | [`RemoteValue::Cyclic`] |

use std::collections::BTreeMap;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::{Value, json};
use tracing::trace;

use crate::error::{Error, Result};
use crate::identifiers::{ExecutionContextId, FrameId};
use crate::protocol::remote_object::RemoteKind;
use crate::protocol::{RemoteObject, RemoteValue};
use crate::retry::with_retry;

use super::Page;

// ============================================================================
// Constants
// ============================================================================

/// Error message raised by the async wrapper when its timer fires.
const TIMEOUT_MARKER: &str = "timed out promise";

/// Returns `true` if `this` contains itself.
const CYCLE_CHECK: &str = r"function() {
    if (Array.isArray(this) && this.every(e => e instanceof Node)) {
        return false;
    }
    function detectCycle(obj, seen) {
        if (typeof obj === 'object' && obj !== null) {
            if (seen.indexOf(obj) !== -1) {
                return true;
            }
            for (const key in obj) {
                if (Object.prototype.hasOwnProperty.call(obj, key)
                    && detectCycle(obj[key], seen.concat([obj]))) {
                    return true;
                }
            }
        }
        return false;
    }
    return detectCycle(this, []);
}";

// ============================================================================
// Page - Runtime
// ============================================================================

impl Page {
    /// Evaluates `expression` in the main frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Script`] if the expression throws.
    pub async fn evaluate(&self, expression: &str) -> Result<RemoteValue> {
        self.call(None, format!("function() {{ return {expression} }}"), None)
            .await
    }

    /// Evaluates `expression` in a specific frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Script`] if the expression throws,
    /// [`Error::FrameNotFound`] if the frame is not tracked, or
    /// [`Error::NoExecutionContext`] if the frame has no document.
    pub async fn evaluate_on(&self, frame_id: &FrameId, expression: &str) -> Result<RemoteValue> {
        self.call(
            Some(frame_id),
            format!("function() {{ return {expression} }}"),
            None,
        )
        .await
    }

    /// Evaluates an expression that reports its result asynchronously.
    ///
    /// The expression receives a callback as `arguments[0]` and must call it
    /// with the result within `wait`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ScriptTimeout`] if the callback is not called in
    /// time, or [`Error::Script`] if the expression throws.
    pub async fn evaluate_async(&self, expression: &str, wait: Duration) -> Result<RemoteValue> {
        let wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX);
        let function = format!(
            r"function() {{
    return new Promise((__resolve, __reject) => {{
        try {{
            arguments[arguments.length] = r => __resolve(r);
            arguments.length = arguments.length + 1;
            setTimeout(() => __reject(new Error('{TIMEOUT_MARKER}')), {wait_ms});
            {expression}
        }} catch (error) {{
            __reject(error);
        }}
    }});
}}"
        );

        self.call(None, function, Some(wait_ms)).await
    }

    /// Runs `expression` in the main frame, discarding its value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Script`] if the expression throws.
    pub async fn execute(&self, expression: &str) -> Result<()> {
        self.call(None, format!("function() {{ {expression}; return true }}"), None)
            .await?;
        Ok(())
    }
}

// ============================================================================
// Page - Internal
// ============================================================================

impl Page {
    async fn call(
        &self,
        frame_id: Option<&FrameId>,
        function: String,
        wait_ms: Option<u64>,
    ) -> Result<RemoteValue> {
        let policy = self.inner.options.retry.clone();
        let function = function.as_str();

        with_retry(&policy, || async move {
            let context_id = match frame_id {
                Some(frame_id) => self.frame_execution_handle(frame_id).await?,
                None => self.main_frame_execution_handle().await?,
            };

            let reply = self
                .command(
                    "Runtime.callFunctionOn",
                    json!({
                        "functionDeclaration": function,
                        "executionContextId": context_id,
                        "arguments": [],
                        "returnByValue": false,
                        "awaitPromise": true,
                    }),
                )
                .await?;

            let object = script_result(reply, wait_ms)?;
            self.decode(context_id, object).await
        })
        .await
    }

    fn decode(&self, context_id: ExecutionContextId, object: RemoteObject) -> BoxFuture<'_, Result<RemoteValue>> {
        Box::pin(async move {
            match object.kind() {
                RemoteKind::Node => Ok(RemoteValue::Node {
                    object_id: object.object_id.unwrap_or_default(),
                    description: object.description,
                }),
                RemoteKind::Date => Ok(RemoteValue::Date(object.description.unwrap_or_default())),
                RemoteKind::Function => Ok(RemoteValue::Function(object.description)),
                RemoteKind::Array | RemoteKind::Object => {
                    let Some(object_id) = object.object_id.clone() else {
                        return Ok(RemoteValue::Json(object.value.unwrap_or(Value::Null)));
                    };
                    if self.is_cyclic(&object_id).await? {
                        trace!(%context_id, "Cyclic value");
                        return Ok(RemoteValue::Cyclic);
                    }

                    let properties = self.own_properties(&object_id).await?;
                    if object.kind() == RemoteKind::Array {
                        let mut items = Vec::with_capacity(properties.len());
                        for (name, value) in properties {
                            let Ok(index) = name.parse::<usize>() else {
                                continue;
                            };
                            items.push((index, self.decode(context_id, value).await?));
                        }
                        items.sort_by_key(|(index, _)| *index);
                        Ok(RemoteValue::Array(items.into_iter().map(|(_, v)| v).collect()))
                    } else {
                        let mut fields = BTreeMap::new();
                        for (name, value) in properties {
                            fields.insert(name, self.decode(context_id, value).await?);
                        }
                        Ok(RemoteValue::Object(fields))
                    }
                }
                RemoteKind::Undefined | RemoteKind::Null | RemoteKind::Primitive => {
                    Ok(object.to_primitive().unwrap_or(RemoteValue::Undefined))
                }
            }
        })
    }

    async fn is_cyclic(&self, object_id: &str) -> Result<bool> {
        let reply = self
            .command(
                "Runtime.callFunctionOn",
                json!({
                    "functionDeclaration": CYCLE_CHECK,
                    "objectId": object_id,
                    "returnByValue": true,
                }),
            )
            .await?;

        Ok(reply
            .pointer("/result/value")
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }

    /// Returns own enumerable properties in declaration order.
    async fn own_properties(&self, object_id: &str) -> Result<Vec<(String, RemoteObject)>> {
        let reply = self
            .command(
                "Runtime.getProperties",
                json!({ "objectId": object_id, "ownProperties": true }),
            )
            .await?;

        let Some(Value::Array(properties)) = reply.get("result") else {
            return Ok(Vec::new());
        };

        properties
            .iter()
            .filter(|property| property.get("enumerable").and_then(Value::as_bool) == Some(true))
            .filter_map(|property| {
                let name = property.get("name")?.as_str()?.to_string();
                let value = property.get("value")?.clone();
                Some((name, value))
            })
            .map(|(name, value)| -> Result<(String, RemoteObject)> {
                Ok((name, serde_json::from_value(value)?))
            })
            .collect()
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Extracts the result object, or the thrown exception as an error.
fn script_result(mut reply: Value, wait_ms: Option<u64>) -> Result<RemoteObject> {
    if let Some(details) = reply.get("exceptionDetails") {
        let class_name = details
            .pointer("/exception/className")
            .and_then(Value::as_str)
            .unwrap_or("Error");
        let description = details
            .pointer("/exception/description")
            .or_else(|| details.get("text"))
            .and_then(Value::as_str)
            .unwrap_or_default();

        if let Some(timeout_ms) = wait_ms
            && description.contains(TIMEOUT_MARKER)
        {
            return Err(Error::ScriptTimeout { timeout_ms });
        }
        return Err(Error::script(class_name, description));
    }

    let result = reply
        .get_mut("result")
        .map(Value::take)
        .ok_or_else(|| Error::protocol("Runtime.callFunctionOn reply without result"))?;
    Ok(serde_json::from_value(result)?)
}

// ============================================================================
// Tests
// ============================================================================
