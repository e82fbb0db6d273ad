//! Partition keys
//!
//! A partition key is the hash of an event's identification key values.
//! Events with equal values hash equally and so land on the same ring
//! member. Keys are computed per routing decision and never stored.

use serde_json::Value;
use sluice_protocol::{Event, KeyPath};
use xxhash_rust::xxh3::xxh3_64;

/// Hash of an event's identification key values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PartitionKey(u64);

impl PartitionKey {
    /// Compute the key for an event
    ///
    /// Absent keys contribute `null`. Returns `None` when the event has
    /// none of the keys.
    pub fn from_event(event: &Event, keys: &[KeyPath]) -> Option<Self> {
        let values: Vec<Option<&Value>> = keys.iter().map(|k| event.get_path(k).ok()).collect();
        if values.iter().all(Option::is_none) {
            return None;
        }
        // Vec<Option<&Value>> always serializes
        let encoded = serde_json::to_vec(&values).unwrap_or_default();
        Some(Self(xxh3_64(&encoded)))
    }

    /// Position on the hash ring
    #[inline]
    pub fn hash(&self) -> u64 {
        self.0
    }
}
