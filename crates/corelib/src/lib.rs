//! Core library for the partitioned cache cluster.
//!
//! This crate provides the shared data model of the topology subsystem:
//! - Member identities and the coordinator election rule
//! - Tokens, partitioners, virtual nodes and the hash ring
//! - Segments and segment ownership tables
//! - Versioned cluster topologies and state transfer units
//! - Cache configuration and the error taxonomy
//! - Transport-agnostic RPC contracts

pub mod assignment;
pub mod config;
pub mod error;
pub mod network;
pub mod node;
pub mod partitioner;
pub mod ring;
pub mod segment;
pub mod token;
pub mod topology;
pub mod transfer;
pub mod vnode;

pub use assignment::{OwnershipAssignment, OwnershipRole};
pub use config::CacheConfig;
pub use error::{Error, Result};
pub use network::{CacheOp, CacheStatusReport, Reply, Request, RequestHandler, Response, Transport};
pub use node::{Member, NodeId};
pub use partitioner::{Partitioner, PartitionerKind};
pub use ring::HashRing;
pub use segment::Segment;
pub use token::Token;
pub use topology::{elect_coordinator, ClusterTopology, Phase};
pub use transfer::{ChunkBatch, Cursor, TransferTask};
pub use vnode::VirtualNode;
