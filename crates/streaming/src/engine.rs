//! Per-cache state transfer engine.
//!
//! Each node runs one [`StateTransferEngine`] per cache. As a source it serves
//! chunks out of its [`SegmentStore`]; as a destination it pulls the segments
//! the coordinator assigned to it, stages them, and commits them once the last
//! chunk arrives. Writes mirrored to this node while a segment is still
//! streaming win over the streamed values for the same key.

use crate::receiver::{pull_segment, InboundSegment, InboundStatus, PullSettings, TransferTag};
use crate::sender::ChunkSender;
use crate::store::SegmentStore;
use bytes::Bytes;
use corelib::config::CacheConfig;
use corelib::error::Error;
use corelib::network::{Reply, Request, Transport};
use corelib::node::Member;
use corelib::segment::Segment;
use corelib::topology::ClusterTopology;
use corelib::transfer::{Cursor, TransferTask};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const DEFAULT_BACKOFF: Duration = Duration::from_millis(50);

pub struct StateTransferEngine {
    cache: String,
    local: Member,
    store: Arc<SegmentStore>,
    transport: Arc<dyn Transport>,
    settings: PullSettings,
    tag: watch::Sender<TransferTag>,
    inbound: Mutex<HashMap<Segment, Arc<InboundSegment>>>,
    /// Keys written through mirroring while their segment was inbound.
    touched: Mutex<HashMap<Segment, HashSet<Bytes>>>,
}

impl StateTransferEngine {
    pub fn new(
        cache: impl Into<String>,
        local: Member,
        store: Arc<SegmentStore>,
        transport: Arc<dyn Transport>,
        config: &CacheConfig,
    ) -> Arc<Self> {
        let (tag, _) = watch::channel(TransferTag::default());
        Arc::new(Self {
            cache: cache.into(),
            local,
            store,
            transport,
            settings: PullSettings {
                chunk_size: config.chunk_size,
                fetch_retries: config.fetch_retries,
                backoff: DEFAULT_BACKOFF,
            },
            tag,
            inbound: Mutex::new(HashMap::new()),
            touched: Mutex::new(HashMap::new()),
        })
    }

    pub fn store(&self) -> &Arc<SegmentStore> {
        &self.store
    }

    pub fn tag(&self) -> TransferTag {
        *self.tag.borrow()
    }

    /// React to a newly installed topology.
    ///
    /// Inbound state of any other rebalance is discarded and running pulls of
    /// it stop at their next chunk. Mirrored-write bookkeeping only lives as
    /// long as its rebalance. Segments this node neither owns nor is about to
    /// own are dropped, whatever the phase.
    pub fn on_topology(&self, topology: &ClusterTopology) {
        let next = TransferTag {
            rebalance_id: topology.rebalance_id(),
            active: topology.is_rebalancing(),
        };
        // Held across the swap so a commit sees either the old tag and
        // finishes first, or the new one and backs off.
        let mut touched = self.touched.lock();
        let previous = self.tag.send_replace(next);

        if previous != next {
            touched.clear();
            let mut inbound = self.inbound.lock();
            let before = inbound.len();
            inbound.retain(|_, segment| next.admits(segment.rebalance_id()));
            if inbound.len() < before {
                debug!(
                    cache = %self.cache,
                    discarded = before - inbound.len(),
                    rebalance_id = next.rebalance_id,
                    "discarded inbound segments of an earlier rebalance"
                );
            }
        }

        let local = &self.local;
        let current = topology.current();
        let pending = topology.pending();
        let dropped = self
            .store
            .retain_segments(|s| current.is_owner(s, local) || pending.is_some_and(|p| p.is_owner(s, local)));
        drop(touched);
        if dropped > 0 {
            info!(
                cache = %self.cache,
                topology_id = topology.topology_id(),
                entries = dropped,
                "dropped entries of segments no longer owned"
            );
        }
    }

    /// Handle a `StartTransfer` from the coordinator.
    ///
    /// Re-delivery is harmless: a running pull is left alone, a completed one
    /// re-sends its acknowledgement and a failed one resumes from its cursor.
    pub fn start_transfer(self: &Arc<Self>, rebalance_id: u64, task: TransferTask, coordinator: Member) -> Reply {
        let inbound = {
            // The tag is checked under the map lock: `on_topology` swaps the
            // tag before it prunes the map, so nothing admitted here can
            // outlive that pruning.
            let mut map = self.inbound.lock();
            let tag = self.tag();
            if !tag.admits(rebalance_id) {
                debug!(
                    cache = %self.cache,
                    requested = rebalance_id,
                    held = tag.rebalance_id,
                    "refusing transfer for a rebalance not in progress here"
                );
                return Reply::StaleRebalance {
                    rebalance_id: tag.rebalance_id,
                };
            }
            let fresh = || Arc::new(InboundSegment::new(task.segment, rebalance_id, task.cursor.clone()));
            let entry = map.entry(task.segment).or_insert_with(fresh);
            if entry.rebalance_id() != rebalance_id {
                *entry = fresh();
            }
            Arc::clone(entry)
        };

        match inbound.try_start() {
            InboundStatus::Running => {}
            InboundStatus::Completed => {
                let engine = Arc::clone(self);
                tokio::spawn(async move {
                    engine.acknowledge(rebalance_id, task.segment, &coordinator).await;
                });
            }
            InboundStatus::Pending | InboundStatus::Failed => {
                let engine = Arc::clone(self);
                tokio::spawn(async move {
                    engine.run_transfer(inbound, task, coordinator).await;
                });
            }
        }
        Reply::Done
    }

    async fn run_transfer(self: Arc<Self>, inbound: Arc<InboundSegment>, task: TransferTask, coordinator: Member) {
        let rebalance_id = inbound.rebalance_id();
        let cancel = self.tag.subscribe();
        debug!(cache = %self.cache, task = %task, rebalance_id, "starting segment pull");

        match pull_segment(
            self.transport.as_ref(),
            &self.cache,
            &task,
            &inbound,
            &self.settings,
            &cancel,
        )
        .await
        {
            Ok(_) => {
                if !self.commit(&inbound) {
                    return;
                }
                self.acknowledge(rebalance_id, task.segment, &coordinator).await;
            }
            Err(Error::Superseded { .. }) => {
                inbound.set_status(InboundStatus::Failed);
                let mut map = self.inbound.lock();
                if map.get(&task.segment).is_some_and(|held| Arc::ptr_eq(held, &inbound)) {
                    map.remove(&task.segment);
                }
                debug!(cache = %self.cache, task = %task, rebalance_id, "pull cancelled");
            }
            Err(e) => {
                inbound.set_status(InboundStatus::Failed);
                warn!(cache = %self.cache, task = %task, error = %e, "segment pull failed, awaiting re-issue");
            }
        }
    }

    /// Move staged entries into the store, skipping keys written by mirroring
    /// in the meantime. Returns false if the rebalance was superseded first.
    fn commit(&self, inbound: &InboundSegment) -> bool {
        let segment = inbound.segment();
        let touched = self.touched.lock();
        if !self.tag().admits(inbound.rebalance_id()) {
            return false;
        }
        let entries = inbound.take_staged();
        let received = entries.len();
        let empty = HashSet::new();
        let skip = touched.get(&segment).unwrap_or(&empty);
        let applied = self.store.merge(segment, entries, skip);
        inbound.set_status(InboundStatus::Completed);
        debug!(
            cache = %self.cache,
            segment = %segment,
            received,
            applied,
            "committed inbound segment"
        );
        true
    }

    async fn acknowledge(&self, rebalance_id: u64, segment: Segment, coordinator: &Member) {
        let request = Request::TransferCompleted {
            cache: self.cache.clone(),
            rebalance_id,
            segment,
            destination: self.local.clone(),
        };
        if let Err(e) = self.transport.send(coordinator, request).await {
            warn!(
                cache = %self.cache,
                segment = %segment,
                coordinator = %coordinator,
                error = %e,
                "failed to report transfer completion"
            );
        }
    }

    /// Serve a chunk to a destination, unless it belongs to an older rebalance.
    pub fn serve_chunk(&self, rebalance_id: u64, segment: Segment, cursor: Option<&Cursor>, max_entries: usize) -> Reply {
        let held = self.tag().rebalance_id;
        if rebalance_id < held {
            return Reply::StaleRebalance { rebalance_id: held };
        }
        ChunkSender::new(&self.store).serve(segment, cursor, max_entries)
    }

    /// Apply a write mirrored to this node as a pending owner.
    ///
    /// The key is remembered so a later commit of the streamed segment does
    /// not overwrite it with an older value.
    pub fn apply_mirrored_write(&self, segment: Segment, key: Bytes, value: Option<Bytes>) {
        let mut touched = self.touched.lock();
        touched.entry(segment).or_default().insert(key.clone());
        self.store.apply(segment, key, value);
    }

    pub fn inbound_status(&self, segment: Segment) -> Option<InboundStatus> {
        self.inbound.lock().get(&segment).map(|s| s.status())
    }

    pub fn is_receiving(&self, segment: Segment) -> bool {
        matches!(
            self.inbound_status(segment),
            Some(InboundStatus::Pending | InboundStatus::Running)
        )
    }
}

impl std::fmt::Debug for StateTransferEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateTransferEngine")
            .field("cache", &self.cache)
            .field("local", &self.local)
            .field("tag", &self.tag())
            .finish_non_exhaustive()
    }
}
