//! Typed OSC values and the message/bundle data model.

use crate::error::{WireError, WireResult};
use crate::osc::time::TimeTag;

/// A single typed OSC argument.
///
/// Each variant maps to exactly one type-tag character in the serialized
/// form. Type selection is explicit at this boundary; the only dynamic
/// inference offered is [`OscValue::from_json`].
#[derive(Debug, Clone, PartialEq)]
pub enum OscValue {
    /// Null-terminated, 4-byte-padded string (`s`)
    Str(String),
    /// 32-bit big-endian two's-complement integer (`i`)
    Int(i32),
    /// 32-bit big-endian IEEE-754 float (`f`)
    Float(f32),
    /// 64-bit big-endian IEEE-754 float (`d`)
    Double(f64),
    /// Length-prefixed, 4-byte-padded byte blob (`b`)
    Blob(Vec<u8>),
    /// Boolean true, no payload (`T`)
    True,
    /// Boolean false, no payload (`F`)
    False,
    /// Null/absent, no payload (`N`)
    Nil,
}

impl OscValue {
    /// The single-character type tag for this value.
    pub fn type_tag(&self) -> char {
        match self {
            OscValue::Str(_) => 's',
            OscValue::Int(_) => 'i',
            OscValue::Float(_) => 'f',
            OscValue::Double(_) => 'd',
            OscValue::Blob(_) => 'b',
            OscValue::True => 'T',
            OscValue::False => 'F',
            OscValue::Nil => 'N',
        }
    }

    /// Interpret the value as a string slice.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            OscValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Interpret the value as a 32-bit integer.
    pub fn as_int(&self) -> Option<i32> {
        match self {
            OscValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Interpret the value as a 32-bit float.
    pub fn as_float(&self) -> Option<f32> {
        match self {
            OscValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Infer an OSC value from a dynamically typed JSON value.
    ///
    /// Strings map to the string tag, numbers to the float tag, booleans
    /// to the true/false tags and null to the nil tag. Arrays and objects
    /// have no wire mapping and fail with [`WireError::UnsupportedType`];
    /// callers wanting doubles or blobs must construct those variants
    /// explicitly.
    pub fn from_json(value: &serde_json::Value) -> WireResult<Self> {
        match value {
            serde_json::Value::String(s) => Ok(OscValue::Str(s.clone())),
            serde_json::Value::Number(n) => {
                let f = n.as_f64().ok_or_else(|| {
                    WireError::UnsupportedType(format!("non-finite number {n}"))
                })?;
                Ok(OscValue::Float(f as f32))
            }
            serde_json::Value::Bool(true) => Ok(OscValue::True),
            serde_json::Value::Bool(false) => Ok(OscValue::False),
            serde_json::Value::Null => Ok(OscValue::Nil),
            other => Err(WireError::UnsupportedType(format!(
                "no OSC mapping for JSON {}",
                json_kind(other)
            ))),
        }
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

impl From<&str> for OscValue {
    fn from(s: &str) -> Self {
        OscValue::Str(s.to_string())
    }
}

impl From<String> for OscValue {
    fn from(s: String) -> Self {
        OscValue::Str(s)
    }
}

impl From<i32> for OscValue {
    fn from(i: i32) -> Self {
        OscValue::Int(i)
    }
}

impl From<f32> for OscValue {
    fn from(f: f32) -> Self {
        OscValue::Float(f)
    }
}

impl From<f64> for OscValue {
    fn from(f: f64) -> Self {
        OscValue::Double(f)
    }
}

impl From<bool> for OscValue {
    fn from(b: bool) -> Self {
        if b { OscValue::True } else { OscValue::False }
    }
}

impl From<Vec<u8>> for OscValue {
    fn from(bytes: Vec<u8>) -> Self {
        OscValue::Blob(bytes)
    }
}

/// An addressed OSC message.
#[derive(Debug, Clone, PartialEq)]
pub struct OscMessage {
    /// ASCII path beginning with `/`
    pub address: String,
    /// Ordered typed arguments
    pub args: Vec<OscValue>,
}

impl OscMessage {
    /// Build a message, validating the address invariant eagerly.
    pub fn new(address: impl Into<String>, args: Vec<OscValue>) -> WireResult<Self> {
        let address = address.into();
        validate_address(&address)?;
        Ok(Self { address, args })
    }
}

/// Check the address invariant: non-empty ASCII path beginning with `/`.
pub fn validate_address(address: &str) -> WireResult<()> {
    if !address.starts_with('/') {
        return Err(WireError::InvalidArgument(format!(
            "address must begin with '/': {address:?}"
        )));
    }
    if !address.is_ascii() {
        return Err(WireError::InvalidArgument(format!(
            "address must be ASCII: {address:?}"
        )));
    }
    Ok(())
}

/// A timestamped group of packets meant to execute atomically.
#[derive(Debug, Clone, PartialEq)]
pub struct OscBundle {
    /// Scheduled execution time
    pub time_tag: TimeTag,
    /// Messages and nested bundles, in order
    pub elements: Vec<OscPacket>,
}

/// Either a message or a bundle; the unit the codec works in.
#[derive(Debug, Clone, PartialEq)]
pub enum OscPacket {
    /// A single addressed message
    Message(OscMessage),
    /// A timestamped group
    Bundle(OscBundle),
}

impl From<OscMessage> for OscPacket {
    fn from(m: OscMessage) -> Self {
        OscPacket::Message(m)
    }
}

impl From<OscBundle> for OscPacket {
    fn from(b: OscBundle) -> Self {
        OscPacket::Bundle(b)
    }
}
