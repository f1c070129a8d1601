//! State transfer units.

use crate::node::Member;
use crate::segment::Segment;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Resume position inside a segment stream.
///
/// Opaque to the destination: it only ever hands back what the source gave it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cursor(Bytes);

impl Cursor {
    pub fn new(position: Bytes) -> Self {
        Self(position)
    }

    pub fn position(&self) -> &Bytes {
        &self.0
    }
}

/// One unit of outstanding state movement for a rebalance.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransferTask {
    pub segment: Segment,
    pub source: Member,
    pub destination: Member,
    /// Where to resume; `None` streams the segment from the start.
    pub cursor: Option<Cursor>,
}

impl TransferTask {
    pub fn new(segment: Segment, source: Member, destination: Member) -> Self {
        Self {
            segment,
            source,
            destination,
            cursor: None,
        }
    }
}

impl fmt::Display for TransferTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "segment {} {} -> {}", self.segment, self.source, self.destination)
    }
}

/// One chunk of a segment stream.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkBatch {
    pub entries: Vec<(Bytes, Bytes)>,
    /// Cursor for the next request; `None` marks the final chunk.
    pub next: Option<Cursor>,
}

impl ChunkBatch {
    pub fn is_last(&self) -> bool {
        self.next.is_none()
    }
}
