//! Payload codec - converts between raw byte payloads and typed values
//!
//! Decoding is a pure function of the payload bytes and a target type
//! descriptor. The descriptor set is a closed enumeration; anything outside
//! it is an explicit [`DecodeError::Unsupported`], never a silent
//! fallthrough. Structured payloads use JSON as the interchange format.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Decode failures, carried as the source of payload binding errors
#[derive(Error, Debug)]
pub enum DecodeError {
    /// Payload bytes are not valid UTF-8 for a text-based target
    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// Payload text is not valid JSON for a structured target
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload text did not parse as the target scalar
    #[error("cannot parse '{text}' as {target}")]
    Lexical { target: &'static str, text: String },

    /// Structured payload does not match the declared record shape
    #[error("record shape mismatch: {message}")]
    Shape { message: String },

    /// No alternative of a union target accepted the payload
    #[error("no union alternative matched: {message}")]
    Union { message: String },

    /// Decoded value could not be converted to the declared Rust type
    #[error("value conversion failed: {message}")]
    Convert { message: String },

    /// Target descriptor cannot be decoded into (e.g. an empty union)
    #[error("unsupported decode target: {target}")]
    Unsupported { target: String },
}

/// One required-or-optional field of a record target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub required: bool,
}

impl FieldSpec {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
        }
    }
}

/// Closed enumeration of decode targets
#[derive(Debug, Clone, PartialEq)]
pub enum TargetType {
    /// UTF-8 text
    String,
    /// Raw byte sequence, ownership transfer
    Bytes,
    /// Signed integer, lexical parse
    Int,
    /// Floating point, lexical parse
    Float,
    /// Boolean, lexical parse
    Bool,
    /// Any structured data (JSON)
    Any,
    /// Structured data with a required field set
    Record(Vec<FieldSpec>),
    /// One of several alternatives
    Union(Vec<TargetType>),
    /// Read-only view of the inner target; the binder freezes the result
    Readonly(Box<TargetType>),
}

impl TargetType {
    /// Strip read-only wrappers
    pub fn unwrap_readonly(&self) -> &TargetType {
        match self {
            TargetType::Readonly(inner) => inner.unwrap_readonly(),
            other => other,
        }
    }

    /// Whether the target (ignoring read-only wrappers) is string-typed
    pub fn is_string(&self) -> bool {
        matches!(self.unwrap_readonly(), TargetType::String)
    }

    /// Short name used in error messages
    pub fn name(&self) -> &'static str {
        match self {
            TargetType::String => "string",
            TargetType::Bytes => "bytes",
            TargetType::Int => "int",
            TargetType::Float => "float",
            TargetType::Bool => "bool",
            TargetType::Any => "any",
            TargetType::Record(_) => "record",
            TargetType::Union(_) => "union",
            TargetType::Readonly(_) => "readonly",
        }
    }
}

/// Dynamic payload value produced by decoding
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
}

impl Value {
    /// Convert into the JSON representation used by serde bridging
    pub fn into_json(self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Int(i) => serde_json::Value::from(i),
            Value::Float(f) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s),
            Value::Bytes(b) => serde_json::Value::Array(
                b.into_iter().map(serde_json::Value::from).collect(),
            ),
            Value::Json(v) => v,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null) || matches!(self, Value::Json(serde_json::Value::Null))
    }
}

/// Decode payload bytes against a target descriptor
pub fn decode(bytes: Vec<u8>, target: &TargetType) -> Result<Value, DecodeError> {
    match target {
        // Identity, ownership transfer only
        TargetType::Bytes => Ok(Value::Bytes(bytes)),
        other => decode_slice(&bytes, other),
    }
}

fn decode_slice(bytes: &[u8], target: &TargetType) -> Result<Value, DecodeError> {
    match target {
        TargetType::String => Ok(Value::String(utf8(bytes)?)),
        TargetType::Bytes => Ok(Value::Bytes(bytes.to_vec())),
        TargetType::Int => {
            let text = utf8(bytes)?;
            text.trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| DecodeError::Lexical {
                    target: "int",
                    text,
                })
        }
        TargetType::Float => {
            let text = utf8(bytes)?;
            text.trim()
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| DecodeError::Lexical {
                    target: "float",
                    text,
                })
        }
        TargetType::Bool => {
            let text = utf8(bytes)?;
            text.trim()
                .parse::<bool>()
                .map(Value::Bool)
                .map_err(|_| DecodeError::Lexical {
                    target: "bool",
                    text,
                })
        }
        TargetType::Any => {
            let text = utf8(bytes)?;
            Ok(Value::Json(serde_json::from_str(&text)?))
        }
        TargetType::Record(fields) => {
            let text = utf8(bytes)?;
            let parsed: serde_json::Value = serde_json::from_str(&text)?;
            coerce_record(parsed, fields)
        }
        TargetType::Union(alternatives) => decode_union(bytes, alternatives),
        TargetType::Readonly(inner) => decode_slice(bytes, inner),
    }
}

fn utf8(bytes: &[u8]) -> Result<String, DecodeError> {
    Ok(String::from_utf8(bytes.to_vec())?)
}

fn coerce_record(parsed: serde_json::Value, fields: &[FieldSpec]) -> Result<Value, DecodeError> {
    let obj = match &parsed {
        serde_json::Value::Object(map) => map,
        other => {
            return Err(DecodeError::Shape {
                message: format!("expected a JSON object, got {}", json_kind(other)),
            })
        }
    };
    for field in fields {
        if field.required && !obj.contains_key(&field.name) {
            return Err(DecodeError::Shape {
                message: format!("missing required field '{}'", field.name),
            });
        }
    }
    Ok(Value::Json(parsed))
}

/// Union decoding policy: a union containing a string alternative always
/// decodes as string, sidestepping ambiguous numeric/string payloads. This
/// is a deliberate design decision, not an oversight.
fn decode_union(bytes: &[u8], alternatives: &[TargetType]) -> Result<Value, DecodeError> {
    if alternatives.is_empty() {
        return Err(DecodeError::Unsupported {
            target: "empty union".to_string(),
        });
    }

    if alternatives.iter().any(TargetType::is_string) {
        return Ok(Value::String(utf8(bytes)?));
    }

    // No string alternative: first alternative that decodes wins, in
    // declaration order.
    let mut attempted = Vec::new();
    for alt in alternatives {
        match decode_slice(bytes, alt) {
            Ok(value) => return Ok(value),
            Err(_) => attempted.push(alt.name()),
        }
    }
    Err(DecodeError::Union {
        message: format!("tried [{}]", attempted.join(", ")),
    })
}

/// Encode a value back to payload bytes - the inverse of [`decode`]
pub fn encode(value: &Value) -> Vec<u8> {
    match value {
        Value::Null => Vec::new(),
        Value::Bool(b) => b.to_string().into_bytes(),
        Value::Int(i) => i.to_string().into_bytes(),
        Value::Float(f) => f.to_string().into_bytes(),
        Value::String(s) => s.clone().into_bytes(),
        Value::Bytes(b) => b.clone(),
        Value::Json(v) => serde_json::to_vec(v).unwrap_or_default(),
    }
}

/// Convert a decoded value into a concrete Rust type via serde
pub fn from_value<T: DeserializeOwned>(value: Value) -> Result<T, DecodeError> {
    serde_json::from_value(value.into_json()).map_err(|e| DecodeError::Convert {
        message: e.to_string(),
    })
}

/// Convert a serializable Rust value into a dynamic value
pub fn to_value<T: Serialize>(value: &T) -> Result<Value, DecodeError> {
    let json = serde_json::to_value(value).map_err(|e| DecodeError::Convert {
        message: e.to_string(),
    })?;
    Ok(Value::Json(json))
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

/// Conversion of scalar handler return values into dynamic values, used by
/// generated service glue so that e.g. a `String` reply is encoded as raw
/// UTF-8 rather than a JSON-quoted string.
pub trait IntoValue {
    fn into_value(self) -> Value;
}

impl IntoValue for String {
    fn into_value(self) -> Value {
        Value::String(self)
    }
}

impl IntoValue for Vec<u8> {
    fn into_value(self) -> Value {
        Value::Bytes(self)
    }
}

impl IntoValue for bool {
    fn into_value(self) -> Value {
        Value::Bool(self)
    }
}

impl IntoValue for f64 {
    fn into_value(self) -> Value {
        Value::Float(self)
    }
}

impl IntoValue for f32 {
    fn into_value(self) -> Value {
        Value::Float(self as f64)
    }
}

impl IntoValue for serde_json::Value {
    fn into_value(self) -> Value {
        Value::Json(self)
    }
}

macro_rules! impl_into_value_int {
    ($($ty:ty),*) => {
        $(impl IntoValue for $ty {
            fn into_value(self) -> Value {
                Value::Int(self as i64)
            }
        })*
    };
}

impl_into_value_int!(i8, i16, i32, i64, u8, u16, u32);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_roundtrip() {
        let value = decode(b"hello world".to_vec(), &TargetType::String).unwrap();
        assert_eq!(value, Value::String("hello world".into()));
        assert_eq!(encode(&value), b"hello world");
    }

    #[test]
    fn bytes_roundtrip() {
        let raw = vec![0u8, 159, 146, 150]; // deliberately not UTF-8
        let value = decode(raw.clone(), &TargetType::Bytes).unwrap();
        assert_eq!(value, Value::Bytes(raw.clone()));
        assert_eq!(encode(&value), raw);
    }

    #[test]
    fn scalar_roundtrips() {
        for (bytes, target, expected) in [
            (b"42".to_vec(), TargetType::Int, Value::Int(42)),
            (b"-7".to_vec(), TargetType::Int, Value::Int(-7)),
            (b"2.5".to_vec(), TargetType::Float, Value::Float(2.5)),
            (b"true".to_vec(), TargetType::Bool, Value::Bool(true)),
        ] {
            let value = decode(bytes.clone(), &target).unwrap();
            assert_eq!(value, expected);
            assert_eq!(decode(encode(&value), &target).unwrap(), expected);
        }
    }

    #[test]
    fn invalid_utf8_is_a_decode_error() {
        let err = decode(vec![0xff, 0xfe], &TargetType::String).unwrap_err();
        assert!(matches!(err, DecodeError::Utf8(_)));
    }

    #[test]
    fn lexical_failures() {
        let err = decode(b"not a number".to_vec(), &TargetType::Int).unwrap_err();
        assert!(matches!(err, DecodeError::Lexical { target: "int", .. }));

        let err = decode(b"yes".to_vec(), &TargetType::Bool).unwrap_err();
        assert!(matches!(err, DecodeError::Lexical { target: "bool", .. }));
    }

    #[test]
    fn any_target_parses_json() {
        let value = decode(br#"{"id": 7}"#.to_vec(), &TargetType::Any).unwrap();
        assert_eq!(value, Value::Json(serde_json::json!({"id": 7})));

        let err = decode(b"{broken".to_vec(), &TargetType::Any).unwrap_err();
        assert!(matches!(err, DecodeError::Json(_)));
    }

    #[test]
    fn record_shape_enforced() {
        let target = TargetType::Record(vec![
            FieldSpec::required("id"),
            FieldSpec::optional("note"),
        ]);

        assert!(decode(br#"{"id": 1}"#.to_vec(), &target).is_ok());

        let err = decode(br#"{"note": "x"}"#.to_vec(), &target).unwrap_err();
        assert!(matches!(err, DecodeError::Shape { .. }));

        let err = decode(b"[1, 2]".to_vec(), &target).unwrap_err();
        assert!(matches!(err, DecodeError::Shape { .. }));
    }

    #[test]
    fn union_with_string_always_decodes_as_string() {
        // The payload is perfectly valid JSON, but the string alternative
        // still takes precedence.
        let target = TargetType::Union(vec![TargetType::Any, TargetType::String]);
        let value = decode(br#"{"id": 7}"#.to_vec(), &target).unwrap();
        assert_eq!(value, Value::String(r#"{"id": 7}"#.into()));

        let numeric = TargetType::Union(vec![TargetType::Int, TargetType::String]);
        let value = decode(b"42".to_vec(), &numeric).unwrap();
        assert_eq!(value, Value::String("42".into()));
    }

    #[test]
    fn union_without_string_tries_alternatives_in_order() {
        let target = TargetType::Union(vec![TargetType::Int, TargetType::Any]);
        assert_eq!(decode(b"42".to_vec(), &target).unwrap(), Value::Int(42));
        assert_eq!(
            decode(br#"{"a": 1}"#.to_vec(), &target).unwrap(),
            Value::Json(serde_json::json!({"a": 1}))
        );

        let err = decode(b"nope".to_vec(), &target).unwrap_err();
        assert!(matches!(err, DecodeError::Union { .. }));
    }

    #[test]
    fn union_string_precedence_sees_through_readonly() {
        let target = TargetType::Union(vec![
            TargetType::Int,
            TargetType::Readonly(Box::new(TargetType::String)),
        ]);
        let value = decode(b"42".to_vec(), &target).unwrap();
        assert_eq!(value, Value::String("42".into()));
    }

    #[test]
    fn empty_union_is_unsupported() {
        let err = decode(b"x".to_vec(), &TargetType::Union(vec![])).unwrap_err();
        assert!(matches!(err, DecodeError::Unsupported { .. }));
    }

    #[test]
    fn readonly_decodes_inner_target() {
        let target = TargetType::Readonly(Box::new(TargetType::Int));
        assert_eq!(decode(b"9".to_vec(), &target).unwrap(), Value::Int(9));
    }

    #[test]
    fn serde_bridge() {
        #[derive(serde::Deserialize, serde::Serialize, PartialEq, Debug)]
        struct Order {
            id: u32,
        }

        let value = decode(br#"{"id": 3}"#.to_vec(), &TargetType::Any).unwrap();
        let order: Order = from_value(value).unwrap();
        assert_eq!(order, Order { id: 3 });

        let back = to_value(&order).unwrap();
        assert_eq!(back, Value::Json(serde_json::json!({"id": 3})));
    }

    #[test]
    fn bytes_bridge_through_serde() {
        let value = Value::Bytes(vec![1, 2, 3]);
        let restored: Vec<u8> = from_value(value).unwrap();
        assert_eq!(restored, vec![1, 2, 3]);
    }
}
