//! Segment state transfer.
//!
//! This crate moves segment contents between members during a rebalance:
//! - [`SegmentStore`]: per-segment, key-ordered data container of a node
//! - [`ChunkSender`]: stateless chunk serving on the source side
//! - [`pull_segment`]: resumable, cancellable pull loop on the destination
//! - [`StateTransferEngine`]: ties both sides to the topology lifecycle

pub mod engine;
pub mod receiver;
pub mod sender;
pub mod store;

pub use engine::StateTransferEngine;
pub use receiver::{pull_segment, InboundSegment, InboundStatus, PullSettings, TransferTag};
pub use sender::ChunkSender;
pub use store::SegmentStore;
