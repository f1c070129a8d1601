//! Ring placement of members.
//!
//! Every member contributes a fixed set of points to the ring. Segment `s`
//! is owned by the members whose points follow `s`'s ring position, so the
//! segments a member owns are decided by where its points land rather than
//! by how many members exist. A point depends only on the member's
//! persistent id and its index, which keeps two things true:
//!
//! - a joining member only takes segments its own points land in front of
//! - every node derives the same ring from the same member list
//!
//! With a few hundred segments, 16-64 points per member already spread
//! ownership evenly; more points mostly cost ring build time.

use crate::node::NodeId;
use crate::token::Token;
use std::fmt;
use xxhash_rust::xxh3::xxh3_64_with_seed;

/// One of a member's points on the ring.
///
/// Sorts by token, then member id, so colliding tokens still order the same
/// way on every node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtualNode {
    pub token: Token,
    pub node_id: NodeId,
}

impl VirtualNode {
    #[inline]
    pub fn new(token: Token, node_id: NodeId) -> Self {
        Self { token, node_id }
    }

    /// The `index`-th point of `node_id`.
    ///
    /// Seeded XXH3 over the id bytes, independent of the cache's key
    /// partitioner: switching partitioners moves keys between segments but
    /// never moves the ring.
    ///
    /// ```rust
    /// use corelib::{NodeId, VirtualNode};
    ///
    /// let first = VirtualNode::from_index(NodeId(7), 0);
    /// assert_eq!(first, VirtualNode::from_index(NodeId(7), 0));
    /// assert_ne!(first.token(), VirtualNode::from_index(NodeId(7), 1).token());
    /// ```
    pub fn from_index(node_id: NodeId, index: usize) -> Self {
        let token = xxh3_64_with_seed(&node_id.0.to_be_bytes(), index as u64);
        Self::new(Token(token), node_id)
    }

    #[inline]
    pub fn token(&self) -> Token {
        self.token
    }

    #[inline]
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }
}

impl fmt::Display for VirtualNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.node_id, self.token)
    }
}
