//! Event - the canonical in-pipeline payload
//!
//! An event is a JSON-like object plus metadata. Values are addressed by
//! [`KeyPath`]; lookups of absent keys return `EventError::KeyNotFound`
//! rather than a sentinel.
//!
//! # Example
//!
//! ```
//! use serde_json::json;
//! use sluice_protocol::Event;
//!
//! let mut event = Event::new("trace");
//! event.put("span/name", json!("GET /")).unwrap();
//! assert_eq!(event.get("span/name").unwrap(), &json!("GET /"));
//! assert!(event.get("span/status").is_err());
//! ```

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ack::EventHandle;
use crate::error::{EventError, Result};
use crate::key_path::KeyPath;

#[cfg(test)]
#[path = "event_test.rs"]
mod tests;

/// Tag added to events that failed processing
pub const FAILURE_TAG: &str = "_processing_failure";

/// Event metadata carried alongside the data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Kind of event (log, trace, metric, ...)
    pub event_type: String,

    /// When the event entered the pipeline
    pub time_received: DateTime<Utc>,

    /// Free-form tags
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,

    /// Reason the event was tagged as failed, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl EventMetadata {
    /// Metadata stamped with the current time
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            time_received: Utc::now(),
            tags: BTreeSet::new(),
            failure: None,
        }
    }
}

/// Structured event with metadata and an optional acknowledgement handle
///
/// Cloning an event clones the handle, so both copies share one release.
/// Use [`derive`](Self::derive) when splitting an event into independently
/// acknowledged children.
#[derive(Debug, Clone)]
pub struct Event {
    data: Map<String, Value>,
    metadata: EventMetadata,
    handle: Option<EventHandle>,
}

impl Event {
    /// Create an empty event
    pub fn new(event_type: impl Into<String>) -> Self {
        Self::from_map(event_type, Map::new())
    }

    /// Create an event from an object
    pub fn from_map(event_type: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            data,
            metadata: EventMetadata::new(event_type),
            handle: None,
        }
    }

    /// Create an event from a JSON value, which must be an object
    pub fn from_value(event_type: impl Into<String>, value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self::from_map(event_type, map)),
            _ => Err(EventError::NotAnObject(String::new())),
        }
    }

    /// Create an event from explicit parts
    pub fn from_parts(data: Map<String, Value>, metadata: EventMetadata) -> Self {
        Self {
            data,
            metadata,
            handle: None,
        }
    }

    /// Get the value at `key`
    pub fn get(&self, key: &str) -> Result<&Value> {
        KeyPath::parse(key)?.get(&self.data)
    }

    /// Get the value at a pre-parsed path
    #[inline]
    pub fn get_path(&self, path: &KeyPath) -> Result<&Value> {
        path.get(&self.data)
    }

    /// Set the value at `key`, returning any previous value
    pub fn put(&mut self, key: &str, value: Value) -> Result<Option<Value>> {
        KeyPath::parse(key)?.put(&mut self.data, value)
    }

    /// Set the value at a pre-parsed path
    #[inline]
    pub fn put_path(&mut self, path: &KeyPath, value: Value) -> Result<Option<Value>> {
        path.put(&mut self.data, value)
    }

    /// Remove the value at `key`
    pub fn delete(&mut self, key: &str) -> Result<Value> {
        KeyPath::parse(key)?.delete(&mut self.data)
    }

    /// Whether a value exists at `key`
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_ok()
    }

    /// Whether a value exists at a pre-parsed path
    #[inline]
    pub fn contains_path(&self, path: &KeyPath) -> bool {
        path.get(&self.data).is_ok()
    }

    /// The event's top-level object
    #[inline]
    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    /// Mutable access to the top-level object
    #[inline]
    pub fn data_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.data
    }

    /// Consume the event, returning its object
    pub fn into_data(self) -> Map<String, Value> {
        self.data
    }

    /// Event metadata
    #[inline]
    pub fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    /// Mutable event metadata
    #[inline]
    pub fn metadata_mut(&mut self) -> &mut EventMetadata {
        &mut self.metadata
    }

    /// Event type shortcut
    #[inline]
    pub fn event_type(&self) -> &str {
        &self.metadata.event_type
    }

    /// Add a tag
    pub fn tag(&mut self, tag: impl Into<String>) {
        self.metadata.tags.insert(tag.into());
    }

    /// Whether the event carries `tag`
    pub fn has_tag(&self, tag: &str) -> bool {
        self.metadata.tags.contains(tag)
    }

    /// Mark the event as failed with a reason
    ///
    /// Failed events continue through the pipeline and are diverted to the
    /// dead-letter path when one is configured.
    pub fn tag_failure(&mut self, reason: impl Into<String>) {
        self.metadata.tags.insert(FAILURE_TAG.to_string());
        self.metadata.failure = Some(reason.into());
    }

    /// Whether the event has been tagged as failed
    #[inline]
    pub fn is_failed(&self) -> bool {
        self.metadata.failure.is_some()
    }

    /// Failure reason, if tagged
    pub fn failure_reason(&self) -> Option<&str> {
        self.metadata.failure.as_deref()
    }

    /// Acknowledgement handle, if the source enabled acknowledgements
    #[inline]
    pub fn handle(&self) -> Option<&EventHandle> {
        self.handle.as_ref()
    }

    /// Attach an acknowledgement handle
    pub fn set_handle(&mut self, handle: EventHandle) {
        self.handle = Some(handle);
    }

    /// Builder-style variant of [`set_handle`](Self::set_handle)
    #[must_use]
    pub fn with_handle(mut self, handle: EventHandle) -> Self {
        self.handle = Some(handle);
        self
    }

    /// Detach and return the acknowledgement handle
    pub fn take_handle(&mut self) -> Option<EventHandle> {
        self.handle.take()
    }

    /// Copy this event for fan-out with an independently tracked handle
    pub fn derive(&self) -> Event {
        Self {
            data: self.data.clone(),
            metadata: self.metadata.clone(),
            handle: self.handle.as_ref().map(EventHandle::derive),
        }
    }

    /// Approximate in-memory size in bytes, used for byte-bounded buffers
    pub fn estimated_size(&self) -> usize {
        let metadata = self.metadata.event_type.len()
            + self.metadata.tags.iter().map(String::len).sum::<usize>()
            + self.metadata.failure.as_ref().map_or(0, String::len);
        object_size(&self.data) + metadata
    }

    /// Serialize the data object as compact JSON
    pub fn to_json_string(&self) -> String {
        // Map<String, Value> always serializes
        serde_json::to_string(&self.data).unwrap_or_default()
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data && self.metadata == other.metadata
    }
}

fn object_size(map: &Map<String, Value>) -> usize {
    map.iter().map(|(k, v)| k.len() + value_size(v)).sum()
}

fn value_size(value: &Value) -> usize {
    match value {
        Value::Null | Value::Bool(_) => 1,
        Value::Number(_) => 8,
        Value::String(s) => s.len(),
        Value::Array(items) => items.iter().map(value_size).sum::<usize>() + 8,
        Value::Object(map) => object_size(map) + 8,
    }
}
