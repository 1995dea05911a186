//! Durable stream management boundary
//!
//! Stream persistence, replay and consumer-group coordination are owned by
//! the external streaming client; this module carries the administrative
//! surface this crate consumes plus the per-message acknowledgement
//! capability. The in-memory [`StreamRegistry`] backs the tests.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Where stream data lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum StorageType {
    Memory,
    #[default]
    File,
}

/// When messages leave the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RetentionPolicy {
    /// Age/size limits only
    #[default]
    Limits,
    /// Kept while any consumer is interested
    Interest,
    /// Removed once consumed
    WorkQueue,
}

/// What happens when the stream is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DiscardPolicy {
    #[default]
    Old,
    New,
}

/// Stream definition handed to the streaming client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub name: String,
    pub subjects: Vec<String>,
    pub storage: StorageType,
    pub retention: RetentionPolicy,
    pub discard: DiscardPolicy,
    pub max_consumers: Option<i64>,
    pub max_messages: Option<i64>,
    pub max_bytes: Option<i64>,
    pub max_message_size: Option<i32>,
    pub max_age: Option<Duration>,
    pub replicas: usize,
}

impl StreamConfig {
    pub fn new(name: impl Into<String>, subjects: Vec<String>) -> Self {
        Self {
            name: name.into(),
            subjects,
            storage: StorageType::default(),
            retention: RetentionPolicy::default(),
            discard: DiscardPolicy::default(),
            max_consumers: None,
            max_messages: None,
            max_bytes: None,
            max_message_size: None,
            max_age: None,
            replicas: 1,
        }
    }

    /// Basic sanity checks before handing the config to the client
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::configuration(
                "stream name must not be empty",
                Some("name".to_string()),
            ));
        }
        if self.subjects.is_empty() {
            return Err(Error::configuration(
                "stream must cover at least one subject",
                Some("subjects".to_string()),
            ));
        }
        for subject in &self.subjects {
            // Wildcards are fine for stream coverage, empty tokens are not.
            if subject.is_empty() || subject.split('.').any(str::is_empty) {
                return Err(Error::configuration(
                    format!("invalid stream subject '{subject}'"),
                    Some("subjects".to_string()),
                ));
            }
        }
        if self.replicas == 0 {
            return Err(Error::configuration(
                "stream needs at least one replica",
                Some("replicas".to_string()),
            ));
        }
        Ok(())
    }
}

/// Administrative operations on durable streams
#[async_trait]
pub trait StreamManager: Send + Sync + 'static {
    async fn create_or_update_stream(&self, config: StreamConfig) -> Result<()>;

    async fn delete_stream(&self, name: &str) -> Result<()>;

    async fn purge_stream(&self, name: &str) -> Result<()>;
}

/// Per-message acknowledgement capability on stream-delivered messages.
///
/// Negative acknowledgement is the streaming client's redelivery trigger;
/// the dispatch layer never calls it on its own.
#[async_trait]
pub trait Acker: Send + Sync {
    async fn ack(&self) -> Result<()>;

    async fn nak(&self) -> Result<()>;

    async fn in_progress(&self) -> Result<()>;
}

struct StreamEntry {
    config: StreamConfig,
    messages: u64,
}

/// In-memory stream manager for tests and demos
#[derive(Default)]
pub struct StreamRegistry {
    streams: DashMap<String, StreamEntry>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.streams.contains_key(name)
    }

    pub fn config(&self, name: &str) -> Option<StreamConfig> {
        self.streams.get(name).map(|entry| entry.config.clone())
    }

    pub fn message_count(&self, name: &str) -> Option<u64> {
        self.streams.get(name).map(|entry| entry.messages)
    }

    /// Record a stored message, used by tests to simulate traffic
    pub fn record_message(&self, name: &str) -> Result<()> {
        let mut entry = self
            .streams
            .get_mut(name)
            .ok_or_else(|| Error::configuration(format!("unknown stream '{name}'"), None))?;
        entry.messages += 1;
        Ok(())
    }
}

#[async_trait]
impl StreamManager for StreamRegistry {
    async fn create_or_update_stream(&self, config: StreamConfig) -> Result<()> {
        config.validate()?;
        tracing::debug!(stream = %config.name, "create or update stream");
        self.streams
            .entry(config.name.clone())
            .and_modify(|entry| entry.config = config.clone())
            .or_insert(StreamEntry {
                config,
                messages: 0,
            });
        Ok(())
    }

    async fn delete_stream(&self, name: &str) -> Result<()> {
        self.streams
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::configuration(format!("unknown stream '{name}'"), None))
    }

    async fn purge_stream(&self, name: &str) -> Result<()> {
        let mut entry = self
            .streams
            .get_mut(name)
            .ok_or_else(|| Error::configuration(format!("unknown stream '{name}'"), None))?;
        entry.messages = 0;
        Ok(())
    }
}
