//! Hash ring data structure.
//!
//! The ring is an immutable, sorted vector of virtual nodes. It is rebuilt
//! from the member list whenever an assignment is computed, never mutated in
//! place, so there is no shared ring object to keep in sync between nodes.

use crate::node::NodeId;
use crate::token::Token;
use crate::vnode::VirtualNode;
use std::collections::{BTreeSet, HashSet};

/// Default number of virtual nodes placed per member.
pub const DEFAULT_VNODES: usize = 256;

/// Immutable consistent hash ring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HashRing {
    /// Sorted by (token, node id).
    vnodes: Vec<VirtualNode>,
    nodes: BTreeSet<NodeId>,
}

impl HashRing {
    /// An empty ring; every lookup returns `None`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a ring placing `vnodes_per_node` virtual nodes for each node.
    ///
    /// Duplicate node ids are placed once.
    pub fn build(node_ids: impl IntoIterator<Item = NodeId>, vnodes_per_node: usize) -> Self {
        let nodes: BTreeSet<NodeId> = node_ids.into_iter().collect();
        let mut vnodes = Vec::with_capacity(nodes.len() * vnodes_per_node);
        for node_id in &nodes {
            vnodes.extend((0..vnodes_per_node).map(|idx| VirtualNode::from_index(*node_id, idx)));
        }
        vnodes.sort_unstable();
        Self { vnodes, nodes }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn token_count(&self) -> usize {
        self.vnodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vnodes.is_empty()
    }

    pub fn contains(&self, node_id: &NodeId) -> bool {
        self.nodes.contains(node_id)
    }

    /// All member ids on the ring, in ascending order.
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().copied()
    }

    /// All (token, node) pairs in ring order.
    pub fn tokens(&self) -> Vec<(Token, NodeId)> {
        self.vnodes.iter().map(|v| (v.token, v.node_id)).collect()
    }

    /// Index of the first vnode at or clockwise after `token`.
    fn first_at_or_after(&self, token: Token) -> usize {
        let idx = self.vnodes.partition_point(|v| v.token < token);
        if idx == self.vnodes.len() {
            0
        } else {
            idx
        }
    }

    /// The node owning the first vnode at or clockwise after `token`.
    pub fn lookup(&self, token: Token) -> Option<NodeId> {
        if self.vnodes.is_empty() {
            return None;
        }
        Some(self.vnodes[self.first_at_or_after(token)].node_id)
    }

    /// Distinct nodes in clockwise order starting at `token`.
    ///
    /// Yields every node on the ring exactly once, then stops.
    pub fn successors(&self, token: Token) -> Successors<'_> {
        let start = if self.vnodes.is_empty() {
            0
        } else {
            self.first_at_or_after(token)
        };
        Successors {
            ring: self,
            start,
            step: 0,
            seen: HashSet::with_capacity(self.nodes.len()),
        }
    }
}

/// Iterator returned by [`HashRing::successors`].
pub struct Successors<'a> {
    ring: &'a HashRing,
    start: usize,
    step: usize,
    seen: HashSet<NodeId>,
}

impl Iterator for Successors<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let len = self.ring.vnodes.len();
        while self.step < len && self.seen.len() < self.ring.nodes.len() {
            let vnode = self.ring.vnodes[(self.start + self.step) % len];
            self.step += 1;
            if self.seen.insert(vnode.node_id) {
                return Some(vnode.node_id);
            }
        }
        None
    }
}
