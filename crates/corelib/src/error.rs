//! Error types for the core library.

use crate::node::Member;
use crate::segment::Segment;
use thiserror::Error;

/// Result type alias for the core library.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the topology, rebalance and routing layers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The caller used a topology older than the grace window allows.
    #[error("stale topology: request carried {requested}, node holds {current}")]
    StaleTopology { requested: u64, current: u64 },

    /// The segment currently has no live owner.
    #[error("no owners available for segment {segment}")]
    NoOwnersAvailable { segment: Segment },

    /// A destination never confirmed a transfer task.
    #[error("transfer of segment {segment} to {destination} timed out after {attempts} attempts")]
    TransferTimeout {
        segment: Segment,
        destination: Member,
        attempts: u32,
    },

    /// The client ran out of routing candidates or retry budget.
    #[error("all servers unavailable after {attempts} attempts")]
    AllServersUnavailable { attempts: u32 },

    /// A broadcast carried an id that regresses or duplicates the held one.
    #[error("topology conflict: held {held}, received {received}")]
    TopologyConflict { held: u64, received: u64 },

    /// The request never reached the target.
    #[error("{target} is unreachable")]
    Unreachable { target: Member },

    /// The request may or may not have been delivered.
    #[error("transport failure talking to {target}: {reason}")]
    Transport { target: Member, reason: String },

    /// The target does not own the key under its current topology.
    #[error("{target} does not own the requested key")]
    NotOwner { target: Member },

    /// No cache with that name runs on the target.
    #[error("unknown cache: {0}")]
    UnknownCache(String),

    /// Configuration rejected by validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Application-level failure reported by the server, passed through untouched.
    #[error("remote failure: {0}")]
    Remote(String),

    /// The rebalance a transfer belonged to was superseded.
    #[error("rebalance {rebalance_id} was superseded")]
    Superseded { rebalance_id: u64 },

    /// Saving or loading a persisted topology failed.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Routing-level failures the client retries against another candidate.
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, Error::Unreachable { .. } | Error::Transport { .. })
    }

    /// True when a write sent before this failure may already have been applied.
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Error::Transport { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeId;

    #[test]
    fn test_connection_failure_classification() {
        let target = Member::new(NodeId(1), "a:11222");
        let unreachable = Error::Unreachable {
            target: target.clone(),
        };
        let transport = Error::Transport {
            target,
            reason: "reset".into(),
        };

        assert!(unreachable.is_connection_failure());
        assert!(!unreachable.is_ambiguous());
        assert!(transport.is_connection_failure());
        assert!(transport.is_ambiguous());
        assert!(!Error::Remote("boom".into()).is_connection_failure());
    }
}
