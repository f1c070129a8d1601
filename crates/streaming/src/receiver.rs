//! Destination side of a segment stream.
//!
//! An [`InboundSegment`] stages everything received for one segment of one
//! rebalance. Nothing becomes visible in the store until the final chunk has
//! arrived and the engine commits the staged entries.

use bytes::Bytes;
use corelib::error::{Error, Result};
use corelib::network::{Reply, Request, Response, Transport};
use corelib::segment::Segment;
use corelib::transfer::{ChunkBatch, Cursor, TransferTask};
use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Which rebalance transfers currently belong to.
///
/// Broadcast to every running pull through a `watch` channel; a pull whose
/// rebalance no longer matches stops at its next chunk boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferTag {
    pub rebalance_id: u64,
    /// False once the topology is STABLE.
    pub active: bool,
}

impl TransferTag {
    pub fn admits(&self, rebalance_id: u64) -> bool {
        self.active && self.rebalance_id == rebalance_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundStatus {
    Pending,
    Running,
    Failed,
    Completed,
}

#[derive(Debug)]
struct InboundState {
    status: InboundStatus,
    cursor: Option<Cursor>,
    staged: Vec<(Bytes, Bytes)>,
    chunks: usize,
}

/// Receive buffer of one segment for one rebalance.
#[derive(Debug)]
pub struct InboundSegment {
    segment: Segment,
    rebalance_id: u64,
    state: Mutex<InboundState>,
}

impl InboundSegment {
    pub fn new(segment: Segment, rebalance_id: u64, cursor: Option<Cursor>) -> Self {
        Self {
            segment,
            rebalance_id,
            state: Mutex::new(InboundState {
                status: InboundStatus::Pending,
                cursor,
                staged: Vec::new(),
                chunks: 0,
            }),
        }
    }

    pub fn segment(&self) -> Segment {
        self.segment
    }

    pub fn rebalance_id(&self) -> u64 {
        self.rebalance_id
    }

    pub fn status(&self) -> InboundStatus {
        self.state.lock().status
    }

    pub fn cursor(&self) -> Option<Cursor> {
        self.state.lock().cursor.clone()
    }

    pub fn staged_len(&self) -> usize {
        self.state.lock().staged.len()
    }

    /// Move to RUNNING unless a pull is already running or has finished.
    ///
    /// Returns the status observed before the call.
    pub fn try_start(&self) -> InboundStatus {
        let mut state = self.state.lock();
        let observed = state.status;
        if matches!(observed, InboundStatus::Pending | InboundStatus::Failed) {
            state.status = InboundStatus::Running;
        }
        observed
    }

    pub(crate) fn set_status(&self, status: InboundStatus) {
        self.state.lock().status = status;
    }

    fn stage(&self, batch: ChunkBatch) {
        let mut state = self.state.lock();
        state.staged.extend(batch.entries);
        state.chunks += 1;
        if let Some(next) = batch.next {
            state.cursor = Some(next);
        }
    }

    pub(crate) fn take_staged(&self) -> Vec<(Bytes, Bytes)> {
        std::mem::take(&mut self.state.lock().staged)
    }
}

/// Pull settings shared by every stream of a cache.
#[derive(Debug, Clone)]
pub struct PullSettings {
    pub chunk_size: usize,
    pub fetch_retries: u32,
    pub backoff: Duration,
}

/// Pull `task.segment` from `task.source` into `inbound` until the final
/// chunk arrives.
///
/// Connection failures are retried from the last acknowledged cursor up to
/// `fetch_retries` consecutive times. The pull ends with
/// [`Error::Superseded`] as soon as `cancel` stops admitting its rebalance or
/// the source reports it has moved on.
pub async fn pull_segment(
    transport: &dyn Transport,
    cache: &str,
    task: &TransferTask,
    inbound: &InboundSegment,
    settings: &PullSettings,
    cancel: &watch::Receiver<TransferTag>,
) -> Result<usize> {
    let rebalance_id = inbound.rebalance_id();
    let superseded = Error::Superseded { rebalance_id };
    let mut failures = 0u32;

    loop {
        if !cancel.borrow().admits(rebalance_id) {
            return Err(superseded);
        }

        let request = Request::FetchChunk {
            cache: cache.to_owned(),
            rebalance_id,
            segment: task.segment,
            cursor: inbound.cursor(),
            max_entries: settings.chunk_size,
        };

        let failure = match transport.send(&task.source, request).await {
            Ok(Response {
                reply: Reply::Chunk(batch),
                ..
            }) => {
                // The tag may have moved while the request was in flight.
                if !cancel.borrow().admits(rebalance_id) {
                    return Err(superseded);
                }
                failures = 0;
                let last = batch.is_last();
                inbound.stage(batch);
                if last {
                    let staged = inbound.staged_len();
                    debug!(task = %task, entries = staged, "segment fully received");
                    return Ok(staged);
                }
                continue;
            }
            Ok(Response {
                reply: Reply::StaleRebalance { rebalance_id: seen },
                ..
            }) => {
                debug!(task = %task, source_rebalance = seen, "source moved past this rebalance");
                return Err(superseded);
            }
            Ok(Response { reply, .. }) => Error::Remote(format!("unexpected reply to chunk request: {reply:?}")),
            Err(e) => e,
        };

        failures += 1;
        if failures > settings.fetch_retries {
            return Err(failure);
        }
        warn!(task = %task, attempt = failures, error = %failure, "chunk request failed, resuming from last cursor");
        tokio::time::sleep(settings.backoff * failures).await;
    }
}
