//! Secret values and the decode step applied to fetched payloads.
//!
//! Payload values are classified once, at the store boundary, into
//! [`SecretValue`] so the component never has to inspect raw JSON types.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::FetchError;

/// Sensitive string exported to consumers.
///
/// The wrapped value is wiped on drop and never rendered by `Debug` or
/// `Display`; call [`Secret::expose`] to read it.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the clear-text value.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<&[u8]> for Secret {
    fn from(value: &[u8]) -> Self {
        Self(String::from_utf8_lossy(value).into_owned())
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

/// One field of a fetched secret document.
#[derive(Clone, PartialEq, Eq)]
pub enum SecretValue {
    Text(String),
    Binary(Vec<u8>),
    /// Any other JSON shape; carries the kind name for diagnostics.
    Unsupported(&'static str),
}

impl SecretValue {
    /// Classifies a JSON value.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::String(text) => SecretValue::Text(text),
            other => SecretValue::Unsupported(json_kind(&other)),
        }
    }

    /// Name of the value's shape, as used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            SecretValue::Text(_) => "string",
            SecretValue::Binary(_) => "bytes",
            SecretValue::Unsupported(kind) => kind,
        }
    }

    /// Converts the value into an exportable secret, if representable.
    pub fn into_secret(self) -> Option<Secret> {
        match self {
            SecretValue::Text(text) => Some(Secret::from(text)),
            SecretValue::Binary(bytes) => Some(Secret::from(bytes.as_slice())),
            SecretValue::Unsupported(_) => None,
        }
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretValue::Text(_) => f.write_str("Text(<redacted>)"),
            SecretValue::Binary(bytes) => write!(f, "Binary(<{} bytes redacted>)", bytes.len()),
            SecretValue::Unsupported(kind) => f.debug_tuple("Unsupported").field(kind).finish(),
        }
    }
}

/// Decoded content of one fetch, keyed by field name.
pub type SecretContent = BTreeMap<String, SecretValue>;

/// Parses a secret string as a flat JSON object.
pub fn parse_secret_document(text: &str) -> Result<SecretContent, FetchError> {
    match serde_json::from_str::<Value>(text)? {
        Value::Object(map) => Ok(map
            .into_iter()
            .map(|(key, value)| (key, SecretValue::from_json(value)))
            .collect()),
        other => Err(FetchError::NotAnObject(json_kind(&other))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
