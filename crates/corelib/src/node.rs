//! Member identities.
//!
//! Members are the logical participants of a cache cluster. They are ordered
//! by their persistent [`NodeId`], which is what the ring hashes and what the
//! coordinator election compares, so a restarted node keeps both its place on
//! the ring and its election rank.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Persistent identifier of a member, surviving restarts.
///
/// Assigned once per node (e.g. a random UUID) and persisted with its data.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct NodeId(pub u128);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// A cluster member: persistent id plus the address it is reachable at.
///
/// Keep this struct small and cheap to clone; connections and other heavy
/// state live with the transport.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Member {
    pub id: NodeId,
    /// Transport address, e.g. `host:port`.
    pub address: String,
}

impl Member {
    pub fn new(id: NodeId, address: impl Into<String>) -> Self {
        Self {
            id,
            address: address.into(),
        }
    }
}

impl Ord for Member {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id
            .cmp(&other.id)
            .then_with(|| self.address.cmp(&other.address))
    }
}

impl PartialOrd for Member {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{:x}", self.address, self.id.0)
    }
}
