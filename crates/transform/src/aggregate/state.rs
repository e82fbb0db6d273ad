//! Aggregate state management
//!
//! Groups events by the values of their identification keys and decides
//! when a group closes.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Value, json};
use sluice_protocol::{Event, EventHandle, KeyPath};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

#[cfg(test)]
#[path = "state_test.rs"]
mod tests;

/// Values of the identification keys for one event, `None` where absent
pub type KeyValues = Vec<Option<Value>>;

/// Extract the identification key values of an event
///
/// Returns `None` when the event has none of the keys.
pub fn key_values(event: &Event, keys: &[KeyPath]) -> Option<KeyValues> {
    let values: KeyValues = keys
        .iter()
        .map(|k| event.get_path(k).ok().cloned())
        .collect();

    values.iter().any(Option::is_some).then_some(values)
}

/// Stable string form of key values, used as the group map key
pub fn group_key(values: &KeyValues) -> String {
    // Vec<Option<Value>> always serializes
    serde_json::to_string(values).unwrap_or_default()
}

/// A single group accumulating events
#[derive(Debug)]
pub struct AggregateGroup {
    /// Identification key values shared by every event in the group
    pub key_values: KeyValues,

    /// Event type of the first event
    pub event_type: String,

    /// When the group was opened (monotonic)
    pub opened_at: Instant,

    /// Receive time of the first event
    pub first_seen: DateTime<Utc>,

    /// Receive time of the most recent event
    pub last_seen: DateTime<Utc>,

    /// Number of events in this group
    pub count: u64,

    /// Insertion order, used to emit groups deterministically
    pub sequence: u64,

    handle: Option<EventHandle>,
}

impl AggregateGroup {
    /// Open a group from its first event
    pub fn new(key_values: KeyValues, event: &Event, opened_at: Instant, sequence: u64) -> Self {
        let received = event.metadata().time_received;
        Self {
            key_values,
            event_type: event.event_type().to_string(),
            opened_at,
            first_seen: received,
            last_seen: received,
            count: 1,
            sequence,
            handle: event.handle().map(EventHandle::derive),
        }
    }

    /// Add another event to this group
    pub fn add(&mut self, event: &Event) {
        self.count += 1;

        let received = event.metadata().time_received;
        if received < self.first_seen {
            self.first_seen = received;
        }
        if received > self.last_seen {
            self.last_seen = received;
        }

        if let Some(theirs) = event.handle() {
            match &self.handle {
                Some(ours) => ours.merge(theirs),
                None => self.handle = Some(theirs.derive()),
            }
        }
    }

    /// Whether the group holds `max_events` events
    #[inline]
    pub fn is_full(&self, max_events: u64) -> bool {
        self.count >= max_events
    }

    /// Whether the group's window has elapsed at `now`
    #[inline]
    pub fn is_expired(&self, window: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.opened_at) >= window
    }

    /// Build the aggregated event
    pub fn into_event(self, keys: &[KeyPath]) -> Event {
        let mut event = Event::new(self.event_type);

        for (key, value) in keys.iter().zip(self.key_values) {
            let value = value.unwrap_or(Value::Null);
            if let Err(e) = event.put_path(key, value) {
                tracing::debug!(key = %key, error = %e, "identification key not copied to aggregate");
            }
        }

        let data = event.data_mut();
        data.insert("count".into(), json!(self.count));
        data.insert(
            "first_seen".into(),
            json!(self.first_seen.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        data.insert(
            "last_seen".into(),
            json!(self.last_seen.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );

        match self.handle {
            Some(handle) => event.with_handle(handle),
            None => event,
        }
    }
}

/// State container for all open groups
#[derive(Debug, Default)]
pub struct AggregateState {
    groups: HashMap<String, AggregateGroup>,
    next_sequence: u64,
}

impl AggregateState {
    /// Create new empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an event to its group, opening the group if needed
    ///
    /// Returns (group key, is_new).
    pub fn add(&mut self, values: KeyValues, event: &Event, now: Instant) -> (String, bool) {
        use std::collections::hash_map::Entry;

        let key = group_key(&values);
        match self.groups.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().add(event);
                (key, false)
            }
            Entry::Vacant(entry) => {
                let sequence = self.next_sequence;
                self.next_sequence += 1;
                entry.insert(AggregateGroup::new(values, event, now, sequence));
                (key, true)
            }
        }
    }

    /// Get a group by key
    pub fn get(&self, key: &str) -> Option<&AggregateGroup> {
        self.groups.get(key)
    }

    /// Remove and return a group by key
    pub fn remove(&mut self, key: &str) -> Option<AggregateGroup> {
        self.groups.remove(key)
    }

    /// Remove groups whose window elapsed, oldest first
    pub fn take_expired(&mut self, window: Duration, now: Instant) -> Vec<AggregateGroup> {
        let expired: Vec<String> = self
            .groups
            .iter()
            .filter(|(_, g)| g.is_expired(window, now))
            .map(|(k, _)| k.clone())
            .collect();

        let mut groups: Vec<_> = expired
            .iter()
            .filter_map(|k| self.groups.remove(k))
            .collect();
        groups.sort_by_key(|g| g.sequence);
        groups
    }

    /// Remove every group, oldest first
    pub fn take_all(&mut self) -> Vec<AggregateGroup> {
        let mut groups: Vec<_> = self.groups.drain().map(|(_, g)| g).collect();
        groups.sort_by_key(|g| g.sequence);
        groups
    }

    /// Number of open groups
    #[inline]
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Check if state is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
