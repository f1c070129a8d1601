//! Cluster views as delivered by the membership layer.

use corelib::node::Member;
use corelib::topology::elect_coordinator;
use std::collections::BTreeSet;

/// One agreed-upon membership view.
///
/// Views are numbered; a node ignores any view whose id does not exceed the
/// one it already holds.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClusterView {
    pub id: u64,
    members: Vec<Member>,
}

impl ClusterView {
    pub fn new(id: u64, members: impl IntoIterator<Item = Member>) -> Self {
        let members: BTreeSet<Member> = members.into_iter().collect();
        Self {
            id,
            members: members.into_iter().collect(),
        }
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn contains(&self, member: &Member) -> bool {
        self.members.binary_search(member).is_ok()
    }

    pub fn coordinator(&self) -> Option<&Member> {
        elect_coordinator(&self.members)
    }

    /// Members that joined and left relative to `previous`.
    pub fn diff(&self, previous: &ClusterView) -> (Vec<Member>, Vec<Member>) {
        let joined = self.members.iter().filter(|m| !previous.contains(m)).cloned().collect();
        let left = previous.members.iter().filter(|m| !self.contains(m)).cloned().collect();
        (joined, left)
    }
}
