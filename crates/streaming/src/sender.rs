//! Source side of a segment stream.

use crate::store::SegmentStore;
use corelib::network::Reply;
use corelib::segment::Segment;
use corelib::transfer::Cursor;
use tracing::trace;

/// Serves chunk requests for segments this node holds.
///
/// The source keeps no per-stream state: the cursor a destination sends back
/// is the last key it received, so any source holding the segment can resume
/// any stream.
#[derive(Debug, Clone, Copy)]
pub struct ChunkSender<'a> {
    store: &'a SegmentStore,
}

impl<'a> ChunkSender<'a> {
    pub fn new(store: &'a SegmentStore) -> Self {
        Self { store }
    }

    pub fn serve(&self, segment: Segment, cursor: Option<&Cursor>, max_entries: usize) -> Reply {
        let batch = self.store.read_chunk(segment, cursor, max_entries.max(1));
        trace!(
            segment = %segment,
            entries = batch.entries.len(),
            last = batch.is_last(),
            "serving chunk"
        );
        Reply::Chunk(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_zero_max_entries_still_makes_progress() {
        let store = SegmentStore::new();
        store.put(Segment(0), Bytes::from_static(b"a"), Bytes::from_static(b"1"));
        store.put(Segment(0), Bytes::from_static(b"b"), Bytes::from_static(b"2"));

        match ChunkSender::new(&store).serve(Segment(0), None, 0) {
            Reply::Chunk(batch) => {
                assert_eq!(batch.entries.len(), 1);
                assert!(!batch.is_last());
            }
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[test]
    fn test_unknown_segment_is_an_empty_final_chunk() {
        let store = SegmentStore::new();
        match ChunkSender::new(&store).serve(Segment(9), None, 10) {
            Reply::Chunk(batch) => assert!(batch.entries.is_empty() && batch.is_last()),
            other => panic!("unexpected reply {other:?}"),
        }
    }
}
