//! Envelope types carrying payload content plus routing metadata

use std::ops::Deref;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::codec::Value;

/// Typed envelope handed to service handlers.
///
/// Any record with exactly these three fields is envelope-compatible as far
/// as the static validator is concerned; this is the canonical shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope<T> {
    /// Decoded payload content
    pub content: T,

    /// Subject the message arrived on
    pub subject: String,

    /// Reply address, when the sender expects a response
    pub reply_to: Option<String>,
}

impl<T> Envelope<T> {
    pub fn new(content: T, subject: impl Into<String>, reply_to: Option<String>) -> Self {
        Self {
            content,
            subject: subject.into(),
            reply_to,
        }
    }
}

/// Dynamic envelope produced by the argument binder before typed conversion
#[derive(Debug, Clone, PartialEq)]
pub struct BoundEnvelope {
    pub content: Value,
    pub subject: String,
    pub reply_to: Option<String>,
}

/// Read-only wrapper for handler parameters declared immutable.
///
/// A frozen value is shared, never copied back out mutably; the inner data
/// is reachable only by reference.
#[derive(Debug, Clone)]
pub struct Frozen<T>(Arc<T>);

impl<T> Frozen<T> {
    pub fn new(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn get(&self) -> &T {
        &self.0
    }
}

impl<T> Deref for Frozen<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> From<Arc<T>> for Frozen<T> {
    fn from(inner: Arc<T>) -> Self {
        Self(inner)
    }
}
