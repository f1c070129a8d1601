//! Transfer planning.
//!
//! Given the current and pending tables of a rebalance, enumerate the
//! [`TransferTask`]s: one per segment × destination pair where the
//! destination owns the segment in the pending table but not in the current
//! one.

use corelib::assignment::OwnershipAssignment;
use corelib::segment::Segment;
use corelib::transfer::TransferTask;

/// Tasks of one rebalance plus the segments nothing can be fetched for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferPlan {
    pub tasks: Vec<TransferTask>,
    /// Segments gaining owners while having no current owner to copy from.
    pub orphaned: Vec<Segment>,
}

impl TransferPlan {
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Enumerate the transfer tasks that move `current` to `pending`.
///
/// The source of every task is the segment's current primary, which applies
/// writes before anyone else.
pub fn plan_transfers(current: &OwnershipAssignment, pending: &OwnershipAssignment) -> TransferPlan {
    let mut plan = TransferPlan::default();
    for (segment, new_owners) in pending.iter() {
        let old_owners = current.owners(segment);
        let incoming: Vec<_> = new_owners.iter().filter(|m| !old_owners.contains(m)).collect();
        if incoming.is_empty() {
            continue;
        }
        match old_owners.first() {
            Some(source) => plan.tasks.extend(
                incoming
                    .into_iter()
                    .map(|destination| TransferTask::new(segment, source.clone(), destination.clone())),
            ),
            None => plan.orphaned.push(segment),
        }
    }
    plan
}
