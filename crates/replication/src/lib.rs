//! Segment ownership for the partitioned cache.
//!
//! This crate turns a member list into segment ownership:
//! - Pluggable replication strategies picking owners on the ring
//! - `HashSpace`: key → segment → owners, and full table computation
//! - Transfer planning between two ownership tables

pub mod hash_space;
pub mod plan;
pub mod strategy;

pub use hash_space::HashSpace;
pub use plan::{plan_transfers, TransferPlan};
pub use strategy::{ReplicationStrategy, SimpleStrategy};
