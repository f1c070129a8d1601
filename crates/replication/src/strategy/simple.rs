//! Simple replication strategy.
//!
//! Places N owners sequentially around the ring (clockwise from the
//! position).
//!
//! # Algorithm
//!
//! 1. Find the first vnode at or after the position; its member is primary
//! 2. Continue clockwise to find N-1 more distinct members
//! 3. Return member ids, primary first
//!
//! Because a member's vnodes never move, a join only changes the owner list
//! of positions where the newcomer lands among the first N distinct
//! successors, and a leave only those where the leaver was among them.

use crate::strategy::ReplicationStrategy;
use corelib::node::NodeId;
use corelib::ring::HashRing;
use corelib::token::Token;

/// Simple replication strategy: N owners placed sequentially around the ring.
///
/// # Example
///
/// ```rust
/// use corelib::{HashRing, NodeId, Token};
/// use replication::{ReplicationStrategy, SimpleStrategy};
///
/// let ring = HashRing::build([NodeId(1), NodeId(2), NodeId(3)], 16);
/// let owners = SimpleStrategy::new(2).replicas_for_token(&ring, Token(0));
/// assert_eq!(owners.len(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct SimpleStrategy {
    /// Number of owners to pick (including the primary).
    replication_factor: usize,
}

impl SimpleStrategy {
    pub fn new(replication_factor: usize) -> Self {
        Self { replication_factor }
    }
}

impl ReplicationStrategy for SimpleStrategy {
    fn replicas_for_token(&self, ring: &HashRing, token: Token) -> Vec<NodeId> {
        if self.replication_factor == 0 {
            return Vec::new();
        }
        ring.successors(token).take(self.replication_factor).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_strategy_replicas() {
        let ring = HashRing::build([NodeId(1), NodeId(2), NodeId(3)], 4);

        let strategy = SimpleStrategy::new(3);
        let replicas = strategy.replicas_for_token(&ring, Token(12345));

        assert_eq!(replicas.len(), 3);
        let unique: std::collections::HashSet<_> = replicas.iter().collect();
        assert_eq!(unique.len(), 3);
        assert_eq!(Some(replicas[0]), ring.lookup(Token(12345)));
    }

    #[test]
    fn test_capped_by_ring_size() {
        let ring = HashRing::build([NodeId(1), NodeId(2)], 4);
        assert_eq!(SimpleStrategy::new(5).replicas_for_token(&ring, Token(7)).len(), 2);
        assert!(SimpleStrategy::new(2).replicas_for_token(&HashRing::new(), Token(7)).is_empty());
        assert!(SimpleStrategy::new(0).replicas_for_token(&ring, Token(7)).is_empty());
    }
}
