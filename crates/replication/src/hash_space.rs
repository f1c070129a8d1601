//! Key-to-segment and segment-to-owner mapping.
//!
//! `HashSpace` holds no mutable state. Every node and client recomputes the
//! same tables from the same inputs, so no coordination message has to carry
//! more than the member list and owner count.

use crate::strategy::{ReplicationStrategy, SimpleStrategy};
use corelib::assignment::OwnershipAssignment;
use corelib::config::CacheConfig;
use corelib::node::{Member, NodeId};
use corelib::partitioner::Partitioner;
use corelib::ring::HashRing;
use corelib::segment::Segment;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Hashing rules of one cache.
#[derive(Debug, Clone)]
pub struct HashSpace {
    partitioner: Arc<dyn Partitioner>,
    num_segments: u32,
    vnodes_per_member: usize,
}

impl HashSpace {
    pub fn new(partitioner: Arc<dyn Partitioner>, num_segments: u32, vnodes_per_member: usize) -> Self {
        Self {
            partitioner,
            num_segments,
            vnodes_per_member,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.partitioner.build(), config.num_segments, config.vnodes_per_member)
    }

    pub fn num_segments(&self) -> u32 {
        self.num_segments
    }

    pub fn partitioner(&self) -> &Arc<dyn Partitioner> {
        &self.partitioner
    }

    /// Segment holding `key`.
    pub fn segment_of(&self, key: &[u8]) -> Segment {
        Segment::for_key(self.partitioner.as_ref(), key, self.num_segments)
    }

    /// Ordered owners of `key` under `assignment`.
    pub fn owners_of<'a>(&self, key: &[u8], assignment: &'a OwnershipAssignment) -> &'a [Member] {
        assignment.owners(self.segment_of(key))
    }

    /// Compute the ownership table for `members`.
    ///
    /// Owner lists are capped at the member count, never padded; with no
    /// members every list is empty. Member order and duplicates in the input
    /// do not affect the result.
    pub fn compute_assignment(&self, members: &[Member], num_owners: usize) -> OwnershipAssignment {
        let by_id: BTreeMap<NodeId, &Member> = members.iter().rev().map(|m| (m.id, m)).collect();
        if by_id.is_empty() {
            return OwnershipAssignment::empty(self.num_segments, num_owners);
        }

        let ring = HashRing::build(by_id.keys().copied(), self.vnodes_per_member);
        let strategy = SimpleStrategy::new(num_owners.min(by_id.len()));

        let owners = Segment::all(self.num_segments)
            .map(|segment| {
                strategy
                    .replicas_for_token(&ring, segment.ring_position(self.num_segments))
                    .into_iter()
                    .filter_map(|id| by_id.get(&id).map(|m| (*m).clone()))
                    .collect()
            })
            .collect();

        OwnershipAssignment::new(num_owners, owners)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corelib::partitioner::Xxh3Partitioner;

    fn space(num_segments: u32) -> HashSpace {
        HashSpace::new(Arc::new(Xxh3Partitioner), num_segments, 32)
    }

    fn m(id: u128) -> Member {
        Member::new(NodeId(id), format!("node{id}"))
    }

    #[test]
    fn test_zero_members_gives_empty_owner_lists() {
        let table = space(8).compute_assignment(&[], 2);
        assert_eq!(table.num_segments(), 8);
        assert!(table.is_empty());
        assert!(space(8).owners_of(b"key", &table).is_empty());
    }

    #[test]
    fn test_owner_count_capped_not_padded() {
        let table = space(8).compute_assignment(&[m(1), m(2)], 3);
        for (_, owners) in table.iter() {
            assert_eq!(owners.len(), 2);
        }
        assert_eq!(table.num_owners(), 3);
    }

    #[test]
    fn test_input_order_irrelevant() {
        let a = space(16).compute_assignment(&[m(1), m(2), m(3)], 2);
        let b = space(16).compute_assignment(&[m(3), m(1), m(2), m(1)], 2);
        assert_eq!(a, b);
    }

    #[test]
    fn test_owners_of_matches_segment() {
        let hs = space(16);
        let table = hs.compute_assignment(&[m(1), m(2), m(3)], 2);
        let segment = hs.segment_of(b"hello");
        assert_eq!(hs.owners_of(b"hello", &table), table.owners(segment));
    }
}
