//! Consistent hash ring implementation.
//!
//! The ring places virtual nodes and provides clockwise lookups used to pick
//! the owners of each segment.

#[allow(clippy::module_inception)]
pub mod ring;

pub use ring::{HashRing, Successors, DEFAULT_VNODES};
