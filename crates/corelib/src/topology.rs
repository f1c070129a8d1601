//! Versioned cluster topology snapshots.
//!
//! A [`ClusterTopology`] is produced by the coordinator and consumed by every
//! node and client. It is immutable: each change builds a new value with a
//! strictly greater `topology_id`, which is what lets readers share it behind
//! an `Arc` without locks.

use crate::assignment::OwnershipAssignment;
use crate::node::Member;
use crate::segment::Segment;
use serde::{Deserialize, Serialize};

/// Rebalance phase marker carried by every topology.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Stable,
    Rebalancing,
}

/// Immutable, versioned snapshot of membership and segment ownership.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterTopology {
    topology_id: u64,
    rebalance_id: u64,
    members: Vec<Member>,
    current: OwnershipAssignment,
    pending: Option<OwnershipAssignment>,
    phase: Phase,
}

impl ClusterTopology {
    /// First topology of a cache: id 1, no rebalance yet.
    pub fn initial(members: Vec<Member>, current: OwnershipAssignment) -> Self {
        Self::stable(1, 0, members, current)
    }

    pub fn stable(topology_id: u64, rebalance_id: u64, mut members: Vec<Member>, current: OwnershipAssignment) -> Self {
        members.sort();
        members.dedup();
        Self {
            topology_id,
            rebalance_id,
            members,
            current,
            pending: None,
            phase: Phase::Stable,
        }
    }

    pub fn rebalancing(
        topology_id: u64,
        rebalance_id: u64,
        mut members: Vec<Member>,
        current: OwnershipAssignment,
        pending: OwnershipAssignment,
    ) -> Self {
        members.sort();
        members.dedup();
        Self {
            topology_id,
            rebalance_id,
            members,
            current,
            pending: Some(pending),
            phase: Phase::Rebalancing,
        }
    }

    /// Start a new rebalance campaign from this topology.
    pub fn start_rebalance(&self, members: Vec<Member>, current: OwnershipAssignment, pending: OwnershipAssignment) -> Self {
        Self::rebalancing(self.topology_id + 1, self.rebalance_id + 1, members, current, pending)
    }

    /// Promote the pending assignment to current and return to STABLE.
    ///
    /// A topology without a pending assignment just gets a new id.
    pub fn confirm_rebalance(&self) -> Self {
        let current = self.pending.clone().unwrap_or_else(|| self.current.clone());
        Self::stable(self.topology_id + 1, self.rebalance_id, self.members.clone(), current)
    }

    /// A STABLE successor with a different member list and current table.
    pub fn with_members(&self, members: Vec<Member>, current: OwnershipAssignment) -> Self {
        Self::stable(self.topology_id + 1, self.rebalance_id, members, current)
    }

    pub fn topology_id(&self) -> u64 {
        self.topology_id
    }

    pub fn rebalance_id(&self) -> u64 {
        self.rebalance_id
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn current(&self) -> &OwnershipAssignment {
        &self.current
    }

    pub fn pending(&self) -> Option<&OwnershipAssignment> {
        self.pending.as_ref()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_rebalancing(&self) -> bool {
        self.phase == Phase::Rebalancing
    }

    pub fn num_segments(&self) -> u32 {
        self.current.num_segments()
    }

    pub fn contains_member(&self, member: &Member) -> bool {
        self.members.contains(member)
    }

    /// Owners that serve reads: the current owners until the rebalance is
    /// confirmed.
    pub fn read_owners(&self, segment: Segment) -> &[Member] {
        self.current.owners(segment)
    }

    /// Owners a write must reach: current owners first, then any pending-only
    /// owner receiving the segment during a rebalance.
    pub fn write_owners(&self, segment: Segment) -> Vec<Member> {
        let mut owners = self.current.owners(segment).to_vec();
        if let Some(pending) = &self.pending {
            for member in pending.owners(segment) {
                if !owners.contains(member) {
                    owners.push(member.clone());
                }
            }
        }
        owners
    }

    /// The coordinator of this topology's member list.
    pub fn coordinator(&self) -> Option<&Member> {
        elect_coordinator(&self.members)
    }
}

/// The member with the lowest stable ordering acts as coordinator.
///
/// A pure function over the current view, recomputed on every view change.
pub fn elect_coordinator(members: &[Member]) -> Option<&Member> {
    members.iter().min()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeId;

    fn m(id: u128) -> Member {
        Member::new(NodeId(id), format!("node{id}"))
    }

    #[test]
    fn test_rebalance_cycle_bumps_ids() {
        let current = OwnershipAssignment::new(1, vec![vec![m(1)], vec![m(1)]]);
        let pending = OwnershipAssignment::new(1, vec![vec![m(1)], vec![m(2)]]);
        let t1 = ClusterTopology::initial(vec![m(1)], current.clone());
        assert_eq!((t1.topology_id(), t1.rebalance_id()), (1, 0));

        let t2 = t1.start_rebalance(vec![m(2), m(1)], current, pending.clone());
        assert_eq!((t2.topology_id(), t2.rebalance_id()), (2, 1));
        assert_eq!(t2.members(), &[m(1), m(2)]);
        assert!(t2.is_rebalancing());
        assert_eq!(t2.read_owners(Segment(1)), &[m(1)]);
        assert_eq!(t2.write_owners(Segment(1)), vec![m(1), m(2)]);
        assert_eq!(t2.write_owners(Segment(0)), vec![m(1)]);

        let t3 = t2.confirm_rebalance();
        assert_eq!((t3.topology_id(), t3.rebalance_id()), (3, 1));
        assert_eq!(t3.phase(), Phase::Stable);
        assert_eq!(t3.current(), &pending);
        assert!(t3.pending().is_none());
    }

    #[test]
    fn test_coordinator_is_lowest_member() {
        assert_eq!(elect_coordinator(&[m(3), m(1), m(2)]), Some(&m(1)));
        assert_eq!(elect_coordinator(&[]), None);
    }
}
