//! Partitioner abstraction for consistent hashing.
//!
//! Partitioners are responsible for converting keys into tokens that can be
//! placed on the hash ring. Which one a cache uses is a configuration choice.

pub mod sip;
pub mod traits;
pub mod xxh3;

pub use sip::SipPartitioner;
pub use traits::Partitioner;
pub use xxh3::Xxh3Partitioner;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Configurable partitioner selection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartitionerKind {
    #[default]
    Xxh3,
    Siphash,
}

impl PartitionerKind {
    pub fn build(self) -> Arc<dyn Partitioner> {
        match self {
            PartitionerKind::Xxh3 => Arc::new(Xxh3Partitioner),
            PartitionerKind::Siphash => Arc::new(SipPartitioner),
        }
    }
}
