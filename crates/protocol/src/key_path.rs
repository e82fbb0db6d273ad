//! Normalized key paths into event data
//!
//! A key path addresses a value inside the nested object model of an
//! [`Event`](crate::Event). Paths use `/` as the separator; a leading or
//! trailing `/` is accepted and stripped, so `/span/name`, `span/name` and
//! `span/name/` all normalize to `span/name`.

use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};

use crate::error::{EventError, Result};

/// Separator between path segments
pub const SEPARATOR: char = '/';

/// A parsed, normalized key path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyPath {
    segments: Vec<String>,
}

impl KeyPath {
    /// Parse and normalize a key path
    ///
    /// # Errors
    ///
    /// Returns `EventError::InvalidKey` for an empty path or a path with
    /// empty segments (`a//b`).
    pub fn parse(key: &str) -> Result<Self> {
        let trimmed = key.trim_matches(SEPARATOR);
        if trimmed.is_empty() {
            return Err(EventError::invalid_key(key, "empty key"));
        }

        let mut segments = Vec::new();
        for segment in trimmed.split(SEPARATOR) {
            if segment.is_empty() {
                return Err(EventError::invalid_key(key, "empty segment"));
            }
            segments.push(segment.to_string());
        }

        Ok(Self { segments })
    }

    /// Path segments in order
    #[inline]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Number of segments
    #[inline]
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Look up the value at this path
    pub fn get<'a>(&self, root: &'a Map<String, Value>) -> Result<&'a Value> {
        let (last, parents) = self.split_last();
        let mut current = root;
        for (i, segment) in parents.iter().enumerate() {
            current = match current.get(segment) {
                Some(Value::Object(map)) => map,
                Some(_) => return Err(EventError::NotAnObject(self.prefix(i + 1))),
                None => return Err(EventError::key_not_found(self.to_string())),
            };
        }
        current
            .get(last)
            .ok_or_else(|| EventError::key_not_found(self.to_string()))
    }

    /// Insert a value at this path, creating intermediate objects
    ///
    /// Returns the previous value if one was replaced.
    pub fn put(&self, root: &mut Map<String, Value>, value: Value) -> Result<Option<Value>> {
        let (last, parents) = self.split_last();
        let mut current = root;
        for (i, segment) in parents.iter().enumerate() {
            let entry = current
                .entry(segment.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            current = match entry {
                Value::Object(map) => map,
                _ => return Err(EventError::NotAnObject(self.prefix(i + 1))),
            };
        }
        Ok(current.insert(last.clone(), value))
    }

    /// Remove and return the value at this path
    pub fn delete(&self, root: &mut Map<String, Value>) -> Result<Value> {
        let (last, parents) = self.split_last();
        let mut current = root;
        for (i, segment) in parents.iter().enumerate() {
            current = match current.get_mut(segment) {
                Some(Value::Object(map)) => map,
                Some(_) => return Err(EventError::NotAnObject(self.prefix(i + 1))),
                None => return Err(EventError::key_not_found(self.to_string())),
            };
        }
        current
            .remove(last)
            .ok_or_else(|| EventError::key_not_found(self.to_string()))
    }

    fn split_last(&self) -> (&String, &[String]) {
        // parse() guarantees at least one segment
        let (last, parents) = self
            .segments
            .split_last()
            .unwrap_or_else(|| unreachable!("key path has no segments"));
        (last, parents)
    }

    fn prefix(&self, len: usize) -> String {
        self.segments[..len].join("/")
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

impl FromStr for KeyPath {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
