//! Transport-agnostic RPC contracts shared across the workspace.
//!
//! The core never opens sockets itself. It talks to peers through
//! [`Transport::send`] / [`Transport::broadcast`] and serves them through
//! [`RequestHandler::handle`]; wire encoding and connection pooling live
//! behind those traits.

use crate::config::CacheConfig;
use crate::error::Result;
use crate::node::Member;
use crate::segment::Segment;
use crate::topology::ClusterTopology;
use crate::transfer::{ChunkBatch, Cursor, TransferTask};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A keyed cache operation routed by the core.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheOp {
    Get { key: Bytes },
    ContainsKey { key: Bytes },
    Put { key: Bytes, value: Bytes },
    PutIfAbsent { key: Bytes, value: Bytes },
    Remove { key: Bytes },
    /// Apply a named per-entry function on the primary owner.
    Execute { key: Bytes, function: String, argument: Bytes },
}

impl CacheOp {
    pub fn key(&self) -> &Bytes {
        match self {
            CacheOp::Get { key }
            | CacheOp::ContainsKey { key }
            | CacheOp::Put { key, .. }
            | CacheOp::PutIfAbsent { key, .. }
            | CacheOp::Remove { key }
            | CacheOp::Execute { key, .. } => key,
        }
    }

    /// Read-only operations may be served by any owner.
    pub fn is_read_only(&self) -> bool {
        matches!(self, CacheOp::Get { .. } | CacheOp::ContainsKey { .. })
    }
}

/// Everything one member may ask of another.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Request {
    /// Client operation, tagged with the topology the client routed with.
    Cache {
        cache: String,
        topology_id: u64,
        op: CacheOp,
    },
    /// Primary-to-owner propagation of an applied write; `None` removes.
    Replicate {
        cache: String,
        topology_id: u64,
        key: Bytes,
        value: Option<Bytes>,
    },
    /// Destination asks a source for the next chunk of a segment.
    FetchChunk {
        cache: String,
        rebalance_id: u64,
        segment: Segment,
        cursor: Option<Cursor>,
        max_entries: usize,
    },
    /// Coordinator broadcast of a new topology.
    TopologyUpdate {
        cache: String,
        topology: Arc<ClusterTopology>,
    },
    /// Coordinator instructs a destination to pull a segment and report
    /// completion back to `coordinator`.
    StartTransfer {
        cache: String,
        rebalance_id: u64,
        task: TransferTask,
        coordinator: Member,
    },
    /// Destination reports a segment fully received.
    TransferCompleted {
        cache: String,
        rebalance_id: u64,
        segment: Segment,
        destination: Member,
    },
    /// A member starts a cache and asks to be included in its topology.
    CacheJoin {
        cache: String,
        config: CacheConfig,
        member: Member,
    },
    /// A member stops a cache.
    CacheLeave { cache: String, member: Member },
    /// A new coordinator collects what each member holds.
    ClusterStatus,
}

impl Request {
    pub fn cache(&self) -> Option<&str> {
        match self {
            Request::Cache { cache, .. }
            | Request::Replicate { cache, .. }
            | Request::FetchChunk { cache, .. }
            | Request::TopologyUpdate { cache, .. }
            | Request::StartTransfer { cache, .. }
            | Request::TransferCompleted { cache, .. }
            | Request::CacheJoin { cache, .. }
            | Request::CacheLeave { cache, .. } => Some(cache),
            Request::ClusterStatus => None,
        }
    }
}

/// What a member reports about one of its caches.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheStatusReport {
    pub cache: String,
    pub config: CacheConfig,
    pub topology: Option<Arc<ClusterTopology>>,
}

/// Response body.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Reply {
    Value(Option<Bytes>),
    Bool(bool),
    Done,
    Chunk(ChunkBatch),
    Topology(Option<Arc<ClusterTopology>>),
    Status(Vec<CacheStatusReport>),
    /// The request's topology lags the node's by more than the grace window.
    StaleTopology { topology_id: u64 },
    /// The node does not own the key under its current topology.
    NotOwner,
    /// The request belongs to a rebalance the node has moved past.
    StaleRebalance { rebalance_id: u64 },
    UnknownCache,
    /// Application-level failure.
    Failed(String),
}

/// A reply plus the optional topology trailer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Response {
    pub reply: Reply,
    /// Newer topology piggybacked for the caller.
    pub topology: Option<Arc<ClusterTopology>>,
}

impl Response {
    pub fn new(reply: Reply) -> Self {
        Self { reply, topology: None }
    }

    pub fn with_topology(reply: Reply, topology: Option<Arc<ClusterTopology>>) -> Self {
        Self { reply, topology }
    }
}

impl From<Reply> for Response {
    fn from(reply: Reply) -> Self {
        Response::new(reply)
    }
}

/// Outbound half of the RPC layer.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Send one request and wait for its response.
    ///
    /// Fails with [`Error::Unreachable`](crate::Error::Unreachable) when the
    /// request was never delivered and with
    /// [`Error::Transport`](crate::Error::Transport) when its fate is unknown.
    async fn send(&self, target: &Member, request: Request) -> Result<Response>;

    /// Send `request` to every member, collecting individual outcomes.
    async fn broadcast(&self, members: &[Member], request: Request) -> Vec<(Member, Result<Response>)> {
        let mut results = Vec::with_capacity(members.len());
        for member in members {
            let outcome = self.send(member, request.clone()).await;
            results.push((member.clone(), outcome));
        }
        results
    }
}

/// Inbound half of the RPC layer.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn handle(&self, request: Request) -> Response;
}
