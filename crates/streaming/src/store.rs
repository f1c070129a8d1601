//! Per-node segment storage.
//!
//! Entries are grouped by segment so that a whole segment can be streamed,
//! committed or dropped without scanning the rest of the node's data. Keys
//! within a segment are kept sorted, which makes the last key of a chunk a
//! valid resume cursor.

use bytes::Bytes;
use corelib::segment::Segment;
use corelib::transfer::{ChunkBatch, Cursor};
use dashmap::DashMap;
use std::collections::{BTreeMap, HashSet};
use std::ops::Bound;

/// In-memory data container of one cache on one node.
#[derive(Debug, Default)]
pub struct SegmentStore {
    segments: DashMap<Segment, BTreeMap<Bytes, Bytes>>,
}

impl SegmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, segment: Segment, key: &[u8]) -> Option<Bytes> {
        self.segments.get(&segment).and_then(|s| s.get(key).cloned())
    }

    pub fn contains(&self, segment: Segment, key: &[u8]) -> bool {
        self.segments
            .get(&segment)
            .map(|s| s.contains_key(key))
            .unwrap_or(false)
    }

    /// Insert or overwrite; returns the previous value.
    pub fn put(&self, segment: Segment, key: Bytes, value: Bytes) -> Option<Bytes> {
        self.segments.entry(segment).or_default().insert(key, value)
    }

    /// Insert only if absent; returns the existing value otherwise.
    pub fn put_if_absent(&self, segment: Segment, key: Bytes, value: Bytes) -> Option<Bytes> {
        let mut entries = self.segments.entry(segment).or_default();
        match entries.get(&key) {
            Some(existing) => Some(existing.clone()),
            None => {
                entries.insert(key, value);
                None
            }
        }
    }

    pub fn remove(&self, segment: Segment, key: &[u8]) -> Option<Bytes> {
        self.segments.get_mut(&segment).and_then(|mut s| s.remove(key))
    }

    /// Write `value`, or remove the key when `value` is `None`.
    pub fn apply(&self, segment: Segment, key: Bytes, value: Option<Bytes>) -> Option<Bytes> {
        match value {
            Some(value) => self.put(segment, key, value),
            None => self.remove(segment, &key),
        }
    }

    /// Atomically replace the value of `key` with `f(current)`.
    ///
    /// Returns `(previous, new)`.
    pub fn compute(
        &self,
        segment: Segment,
        key: Bytes,
        f: impl FnOnce(Option<&Bytes>) -> Option<Bytes>,
    ) -> (Option<Bytes>, Option<Bytes>) {
        let mut entries = self.segments.entry(segment).or_default();
        let previous = entries.get(&key).cloned();
        let next = f(previous.as_ref());
        match &next {
            Some(value) => {
                entries.insert(key, value.clone());
            }
            None => {
                entries.remove(&key);
            }
        }
        (previous, next)
    }

    /// Up to `max_entries` entries of `segment` strictly after `cursor`.
    pub fn read_chunk(&self, segment: Segment, cursor: Option<&Cursor>, max_entries: usize) -> ChunkBatch {
        let Some(entries) = self.segments.get(&segment) else {
            return ChunkBatch::default();
        };
        let lower = match cursor {
            Some(cursor) => Bound::Excluded(cursor.position().clone()),
            None => Bound::Unbounded,
        };

        let mut chunk: Vec<(Bytes, Bytes)> = entries
            .range((lower, Bound::Unbounded))
            .take(max_entries.saturating_add(1))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let next = if chunk.len() > max_entries {
            chunk.truncate(max_entries);
            chunk.last().map(|(k, _)| Cursor::new(k.clone()))
        } else {
            None
        };
        ChunkBatch { entries: chunk, next }
    }

    /// Insert received entries, leaving keys in `skip` untouched.
    pub fn merge(&self, segment: Segment, entries: Vec<(Bytes, Bytes)>, skip: &HashSet<Bytes>) -> usize {
        let mut target = self.segments.entry(segment).or_default();
        let mut applied = 0;
        for (key, value) in entries {
            if skip.contains(&key) {
                continue;
            }
            target.insert(key, value);
            applied += 1;
        }
        applied
    }

    pub fn segment_len(&self, segment: Segment) -> usize {
        self.segments.get(&segment).map(|s| s.len()).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.segments.iter().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Segments holding at least one entry, ascending.
    pub fn segments(&self) -> Vec<Segment> {
        let mut segments: Vec<Segment> = self
            .segments
            .iter()
            .filter(|s| !s.is_empty())
            .map(|s| *s.key())
            .collect();
        segments.sort();
        segments
    }

    /// Drop every segment for which `keep` is false; returns entries dropped.
    pub fn retain_segments(&self, keep: impl Fn(Segment) -> bool) -> usize {
        let mut dropped = 0;
        self.segments.retain(|segment, entries| {
            if keep(*segment) {
                true
            } else {
                dropped += entries.len();
                false
            }
        });
        dropped
    }
}
