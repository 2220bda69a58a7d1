//! Script evaluation results.
//!
//! `Runtime.evaluate` and `Runtime.callFunctionOn` return a
//! [`RemoteObject`] mirror of the value. The decoder in
//! `browser::page::runtime` walks it into a [`RemoteValue`], a closed union
//! over the shapes the browser actually produces.
//!
//! | `type` / `subtype` | Decoded as |
//! |--------------------|------------|
//! | `undefined` | [`RemoteValue::Undefined`] |
//! | `object` / `null` | [`RemoteValue::Null`] |
//! | `boolean`, `number`, `string`, `bigint` | primitive variants |
//! | `object` / `node` | [`RemoteValue::Node`] |
//! | `object` / `array` | [`RemoteValue::Array`] |
//! | `object` / `date` | [`RemoteValue::Date`] |
//! | `object` (other) | [`RemoteValue::Object`] |
//! | `function` | [`RemoteValue::Function`] |

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Number, Value};

// ============================================================================
// RemoteObject
// ============================================================================

/// `Runtime.RemoteObject` as returned by the browser.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObject {
    /// JavaScript type.
    #[serde(rename = "type")]
    pub object_type: String,

    /// Subtype hint for `object` values.
    #[serde(default)]
    pub subtype: Option<String>,

    /// Constructor name.
    #[serde(default)]
    pub class_name: Option<String>,

    /// Primitive value, present for primitives and by-value results.
    #[serde(default)]
    pub value: Option<Value>,

    /// Textual form of values JSON cannot carry (`NaN`, `-0`, bigints).
    #[serde(default)]
    pub unserializable_value: Option<String>,

    /// Human readable description.
    #[serde(default)]
    pub description: Option<String>,

    /// Handle for follow-up calls. Absent for primitives.
    #[serde(default)]
    pub object_id: Option<String>,
}

/// Decoding tag of a [`RemoteObject`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteKind {
    /// `undefined`.
    Undefined,
    /// `null`.
    Null,
    /// boolean, number, string or bigint.
    Primitive,
    /// DOM node.
    Node,
    /// Array-like.
    Array,
    /// Date.
    Date,
    /// Function.
    Function,
    /// Any other object.
    Object,
}

impl RemoteObject {
    /// Classifies the object by `type` and `subtype`.
    #[must_use]
    pub fn kind(&self) -> RemoteKind {
        match (self.object_type.as_str(), self.subtype.as_deref()) {
            ("undefined", _) => RemoteKind::Undefined,
            ("object", Some("null")) => RemoteKind::Null,
            ("object", Some("node")) => RemoteKind::Node,
            ("object", Some("array")) => RemoteKind::Array,
            ("object", Some("date")) => RemoteKind::Date,
            ("function", _) => RemoteKind::Function,
            ("object", _) if self.object_id.is_none() && self.value.is_none() => RemoteKind::Null,
            ("object", _) => RemoteKind::Object,
            _ => RemoteKind::Primitive,
        }
    }

    /// Decodes a primitive mirror. Non-primitive kinds yield `None`.
    #[must_use]
    pub fn to_primitive(&self) -> Option<RemoteValue> {
        match self.kind() {
            RemoteKind::Undefined => Some(RemoteValue::Undefined),
            RemoteKind::Null => Some(RemoteValue::Null),
            RemoteKind::Primitive => Some(self.decode_primitive()),
            _ => None,
        }
    }

    fn decode_primitive(&self) -> RemoteValue {
        if let Some(raw) = &self.unserializable_value {
            return match self.object_type.as_str() {
                "bigint" => RemoteValue::BigInt(raw.trim_end_matches('n').to_string()),
                _ => match raw.as_str() {
                    "NaN" => RemoteValue::Number(f64::NAN),
                    "Infinity" => RemoteValue::Number(f64::INFINITY),
                    "-Infinity" => RemoteValue::Number(f64::NEG_INFINITY),
                    "-0" => RemoteValue::Number(-0.0),
                    other => RemoteValue::String(other.to_string()),
                },
            };
        }

        match &self.value {
            Some(Value::Bool(b)) => RemoteValue::Bool(*b),
            Some(Value::Number(n)) => RemoteValue::Number(n.as_f64().unwrap_or_default()),
            Some(Value::String(s)) => RemoteValue::String(s.clone()),
            Some(Value::Null) | None => RemoteValue::Null,
            Some(other) => RemoteValue::Json(other.clone()),
        }
    }
}

// ============================================================================
// RemoteValue
// ============================================================================

/// Decoded evaluation result.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteValue {
    /// `undefined`.
    Undefined,
    /// `null`.
    Null,
    /// Boolean.
    Bool(bool),
    /// Number, including `NaN` and infinities.
    Number(f64),
    /// String.
    String(String),
    /// BigInt digits without the trailing `n`.
    BigInt(String),
    /// DOM node handle.
    Node {
        /// Remote object id used to address the node.
        object_id: String,
        /// Description such as `div#main`.
        description: Option<String>,
    },
    /// Array elements in index order.
    Array(Vec<RemoteValue>),
    /// Date as its string description.
    Date(String),
    /// Plain object, own enumerable properties.
    Object(BTreeMap<String, RemoteValue>),
    /// Function, by description.
    Function(Option<String>),
    /// A value that refers back to one of its ancestors.
    Cyclic,
    /// Structured value returned by value.
    Json(Value),
}

impl RemoteValue {
    /// Returns the string slice for string values.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) | Self::Date(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the number for numeric values.
    #[inline]
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the boolean for boolean values.
    #[inline]
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns `true` for `null` and `undefined`.
    #[inline]
    #[must_use]
    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Null | Self::Undefined)
    }

    /// Returns `true` for the cyclic marker.
    #[inline]
    #[must_use]
    pub fn is_cyclic(&self) -> bool {
        matches!(self, Self::Cyclic)
    }

    /// Converts to plain JSON.
    ///
    /// Nodes become their object id, functions their description and cyclic
    /// references the string `"[Circular]"`. Non-finite numbers become `null`.
    #[must_use]
    pub fn into_json(self) -> Value {
        match self {
            Self::Undefined | Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(b),
            Self::Number(n) => Number::from_f64(n).map_or(Value::Null, Value::Number),
            Self::String(s) | Self::BigInt(s) | Self::Date(s) => Value::String(s),
            Self::Node { object_id, .. } => Value::String(object_id),
            Self::Array(items) => Value::Array(items.into_iter().map(Self::into_json).collect()),
            Self::Object(fields) => Value::Object(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, v.into_json()))
                    .collect::<Map<_, _>>(),
            ),
            Self::Function(description) => description.map_or(Value::Null, Value::String),
            Self::Cyclic => Value::String("[Circular]".to_string()),
            Self::Json(value) => value,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
