//! Topology-aware client for the partitioned cache.
//!
//! The client keeps the newest topology it has seen per cache and computes
//! owners locally, so most operations reach an owner on the first send.

pub mod config;
pub mod retry;
pub mod router;
pub mod topology_cache;

pub use config::ClientConfig;
pub use retry::RetryState;
pub use router::ClientRouter;
pub use topology_cache::ClientTopologyCache;
