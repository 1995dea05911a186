//! Optional contract validation over bound values
//!
//! Runs after a successful decode when validation is enabled for the
//! registration. A violation is a semantic failure distinct from a decode
//! failure and maps to a payload validation error, not a binding error.

use thiserror::Error;

use crate::codec::Value;

/// Declarative bounds attached to a handler parameter
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Constraints {
    /// Minimum length for strings, byte sequences and arrays
    pub min_length: Option<usize>,
    /// Maximum length for strings, byte sequences and arrays
    pub max_length: Option<usize>,
    /// Inclusive lower bound for numeric values
    pub min_value: Option<f64>,
    /// Inclusive upper bound for numeric values
    pub max_value: Option<f64>,
}

impl Constraints {
    pub fn length(min: Option<usize>, max: Option<usize>) -> Self {
        Self {
            min_length: min,
            max_length: max,
            ..Self::default()
        }
    }

    pub fn range(min: Option<f64>, max: Option<f64>) -> Self {
        Self {
            min_value: min,
            max_value: max,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Constraint check failure, carried as the source of payload validation
/// errors
#[derive(Error, Debug)]
#[error("constraint violated: {message}")]
pub struct ConstraintViolation {
    pub message: String,
}

impl ConstraintViolation {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Check a bound value against its declared constraints
pub fn check(value: &Value, constraints: &Constraints) -> Result<(), ConstraintViolation> {
    if let Some(len) = value_length(value) {
        if let Some(min) = constraints.min_length {
            if len < min {
                return Err(ConstraintViolation::new(format!(
                    "length {len} below minimum {min}"
                )));
            }
        }
        if let Some(max) = constraints.max_length {
            if len > max {
                return Err(ConstraintViolation::new(format!(
                    "length {len} above maximum {max}"
                )));
            }
        }
    }

    if let Some(num) = numeric_value(value) {
        if let Some(min) = constraints.min_value {
            if num < min {
                return Err(ConstraintViolation::new(format!(
                    "value {num} below minimum {min}"
                )));
            }
        }
        if let Some(max) = constraints.max_value {
            if num > max {
                return Err(ConstraintViolation::new(format!(
                    "value {num} above maximum {max}"
                )));
            }
        }
    }

    Ok(())
}

fn value_length(value: &Value) -> Option<usize> {
    match value {
        Value::String(s) => Some(s.chars().count()),
        Value::Bytes(b) => Some(b.len()),
        Value::Json(serde_json::Value::String(s)) => Some(s.chars().count()),
        Value::Json(serde_json::Value::Array(a)) => Some(a.len()),
        _ => None,
    }
}

fn numeric_value(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        Value::Json(serde_json::Value::Number(n)) => n.as_f64(),
        _ => None,
    }
}
