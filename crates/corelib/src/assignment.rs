//! Segment ownership tables.

use crate::node::Member;
use crate::segment::Segment;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Role of a member for one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnershipRole {
    /// Primary owner: accepts writes first.
    Primary,
    /// Backup owner: holds a replica.
    Backup,
    /// Not an owner.
    None,
}

/// Mapping from each segment to its ordered owner list.
///
/// First owner is the primary, the rest are backups. The table is a pure
/// function of (member list, owner count, hash algorithm); any node knowing
/// those inputs can recompute it and compare.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnershipAssignment {
    num_owners: usize,
    owners: Vec<Vec<Member>>,
}

impl OwnershipAssignment {
    pub fn new(num_owners: usize, owners: Vec<Vec<Member>>) -> Self {
        Self { num_owners, owners }
    }

    /// A table with no owners for any segment.
    pub fn empty(num_segments: u32, num_owners: usize) -> Self {
        Self {
            num_owners,
            owners: vec![Vec::new(); num_segments as usize],
        }
    }

    pub fn num_segments(&self) -> u32 {
        self.owners.len() as u32
    }

    /// Configured owner count; actual lists may be shorter in small clusters.
    pub fn num_owners(&self) -> usize {
        self.num_owners
    }

    /// Ordered owners of `segment`; empty for unknown segments.
    pub fn owners(&self, segment: Segment) -> &[Member] {
        self.owners
            .get(segment.index())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn primary(&self, segment: Segment) -> Option<&Member> {
        self.owners(segment).first()
    }

    pub fn is_owner(&self, segment: Segment, member: &Member) -> bool {
        self.owners(segment).contains(member)
    }

    pub fn role(&self, segment: Segment, member: &Member) -> OwnershipRole {
        match self.owners(segment).iter().position(|m| m == member) {
            Some(0) => OwnershipRole::Primary,
            Some(_) => OwnershipRole::Backup,
            None => OwnershipRole::None,
        }
    }

    /// True if no segment has an owner.
    pub fn is_empty(&self) -> bool {
        self.owners.iter().all(Vec::is_empty)
    }

    /// Segments `member` owns (primary or backup).
    pub fn segments_owned_by<'a>(&'a self, member: &'a Member) -> impl Iterator<Item = Segment> + 'a {
        self.owners
            .iter()
            .enumerate()
            .filter(move |(_, owners)| owners.contains(member))
            .map(|(idx, _)| Segment(idx as u32))
    }

    /// Every member appearing anywhere in the table.
    pub fn members(&self) -> BTreeSet<&Member> {
        self.owners.iter().flatten().collect()
    }

    /// Iterate over `(segment, owners)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (Segment, &[Member])> {
        self.owners
            .iter()
            .enumerate()
            .map(|(idx, owners)| (Segment(idx as u32), owners.as_slice()))
    }

    /// Copy of this table with every owner not in `live` removed.
    ///
    /// Order among the survivors is preserved, so a surviving backup becomes
    /// primary when the primary is dropped.
    pub fn retain_members(&self, live: &[Member]) -> Self {
        Self {
            num_owners: self.num_owners,
            owners: self
                .owners
                .iter()
                .map(|owners| owners.iter().filter(|m| live.contains(m)).cloned().collect())
                .collect(),
        }
    }

    /// Segments whose owner list differs between `self` and `other`.
    pub fn changed_segments(&self, other: &Self) -> Vec<Segment> {
        let len = self.owners.len().max(other.owners.len());
        (0..len as u32)
            .map(Segment)
            .filter(|s| self.owners(*s) != other.owners(*s))
            .collect()
    }

    /// Copy with the owner list of each segment for which `fill` returns
    /// `Some` replaced.
    pub fn with_replaced(&self, mut fill: impl FnMut(Segment, &[Member]) -> Option<Vec<Member>>) -> Self {
        Self {
            num_owners: self.num_owners,
            owners: self
                .iter()
                .map(|(segment, owners)| fill(segment, owners).unwrap_or_else(|| owners.to_vec()))
                .collect(),
        }
    }
}
