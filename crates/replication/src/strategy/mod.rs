//! Replication strategy abstractions.
//!
//! A replication strategy decides which members own a position on the ring.
//! Segment ownership tables are built by asking the strategy about each
//! segment's ring position.

pub mod simple;

pub use simple::SimpleStrategy;

use corelib::node::NodeId;
use corelib::ring::HashRing;
use corelib::token::Token;

/// Picks the owners of a ring position.
///
/// Implementations must be pure: the same ring and token always produce the
/// same owners in the same order, on every node.
pub trait ReplicationStrategy: Send + Sync + 'static {
    /// Owners for `token`, primary first, without duplicates.
    ///
    /// Returns fewer owners than requested when the ring has fewer members,
    /// and none for an empty ring.
    fn replicas_for_token(&self, ring: &HashRing, token: Token) -> Vec<NodeId>;
}
