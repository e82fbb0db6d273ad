//! Consistent hash ring
//!
//! Every member is placed on a 64-bit ring at `virtual_nodes` points
//! (xxh3 of `"{member}#{n}"`). A key belongs to the first point at or after
//! its hash, wrapping around. Members are deduplicated and sorted before
//! placement, so two nodes holding the same member list build identical
//! rings regardless of list order.
//!
//! Adding a member moves only the keys that land on its new points; keys
//! owned by other members stay put.

use xxhash_rust::xxh3::xxh3_64;

#[cfg(test)]
#[path = "ring_test.rs"]
mod tests;

/// Default points per member
pub const DEFAULT_VIRTUAL_NODES: usize = 128;

/// Immutable hash ring over a fixed member list
#[derive(Debug, Clone, Default)]
pub struct HashRing {
    /// (point hash, member index), sorted
    points: Vec<(u64, u32)>,
    members: Vec<String>,
}

impl HashRing {
    /// Build a ring from a member list
    pub fn new<I, S>(members: I, virtual_nodes: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut members: Vec<String> = members.into_iter().map(Into::into).collect();
        members.sort();
        members.dedup();

        let vnodes = virtual_nodes.max(1);
        let mut points = Vec::with_capacity(members.len() * vnodes);
        for (index, member) in members.iter().enumerate() {
            for n in 0..vnodes {
                let point = xxh3_64(format!("{member}#{n}").as_bytes());
                points.push((point, index as u32));
            }
        }
        points.sort_unstable();

        Self { points, members }
    }

    /// Members in sorted order
    pub fn members(&self) -> &[String] {
        &self.members
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, member: &str) -> bool {
        self.members.iter().any(|m| m == member)
    }

    /// Index into [`members`](Self::members) of the member owning `hash`
    pub fn owner_index(&self, hash: u64) -> Option<usize> {
        if self.points.is_empty() {
            return None;
        }
        let at = self.points.partition_point(|(point, _)| *point < hash);
        let (_, index) = self.points[at % self.points.len()];
        Some(index as usize)
    }

    /// Member owning `hash`
    pub fn owner(&self, hash: u64) -> Option<&str> {
        self.owner_index(hash).map(|i| self.members[i].as_str())
    }
}
