//! Cluster membership, topology coordination and cache serving.
//!
//! - [`TopologyCoordinator`]: the elected member's rebalance state machine
//! - [`LocalTopologyManager`]: each node's view of a cache's topology
//! - [`CacheRuntime`]: ownership-checked operations and write propagation
//! - [`CacheManager`]: per-node registry and request dispatch
//! - [`LocalCluster`]: an in-process cluster over [`LocalTransport`]

pub mod coordinator;
pub mod functions;
pub mod local;
pub mod local_cluster;
pub mod manager;
pub mod membership;
pub mod persistence;
pub mod runtime;
pub mod transport;

pub use coordinator::{CoordinatorEvent, CoordinatorHandle, TopologyCoordinator};
pub use functions::{EntryFunction, FunctionRegistry};
pub use local::{ApplyOutcome, LocalTopologyManager};
pub use local_cluster::LocalCluster;
pub use manager::{CacheHandle, CacheManager};
pub use membership::ClusterView;
pub use persistence::{FileTopologyStore, MemoryTopologyStore, TopologyStore};
pub use runtime::CacheRuntime;
pub use transport::LocalTransport;
