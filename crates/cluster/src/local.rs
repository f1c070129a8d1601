//! Node-side holder of the installed topology of one cache.
//!
//! Readers load the current snapshot lock-free through `ArcSwapOption`;
//! installs are serialized so the id check and the swap happen atomically.

use crate::persistence::TopologyStore;
use arc_swap::ArcSwapOption;
use corelib::error::{Error, Result};
use corelib::node::Member;
use corelib::segment::Segment;
use corelib::topology::ClusterTopology;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of offering a topology to the local manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Same id and content as the held topology.
    Duplicate,
    /// Older than the held topology; ignored.
    Stale { held: u64 },
    /// Same id as the held topology but different content; ignored.
    Conflict { held: u64 },
}

pub struct LocalTopologyManager {
    cache: String,
    grace: u64,
    current: ArcSwapOption<ClusterTopology>,
    /// Last topology persisted before a restart; a floor for accepted ids.
    restored: Option<Arc<ClusterTopology>>,
    install: Mutex<()>,
    store: Arc<dyn TopologyStore>,
}

impl LocalTopologyManager {
    pub fn new(cache: impl Into<String>, grace: u64, store: Arc<dyn TopologyStore>) -> Self {
        let cache = cache.into();
        let restored = match store.load(&cache) {
            Ok(restored) => restored.map(Arc::new),
            Err(e) => {
                warn!(cache = %cache, error = %e, "ignoring unreadable persisted topology");
                None
            }
        };
        if let Some(t) = &restored {
            debug!(cache = %cache, topology_id = t.topology_id(), "restored persisted topology");
        }
        Self {
            cache,
            grace,
            current: ArcSwapOption::empty(),
            restored,
            install: Mutex::new(()),
            store,
        }
    }

    /// Install `topology` if it is newer than the held one.
    pub fn apply(&self, topology: Arc<ClusterTopology>) -> ApplyOutcome {
        let _install = self.install.lock();
        let received = topology.topology_id();

        if let Some(held) = self.current.load_full() {
            let held_id = held.topology_id();
            if received < held_id {
                debug!(cache = %self.cache, held = held_id, received, "ignoring stale topology");
                return ApplyOutcome::Stale { held: held_id };
            }
            if received == held_id {
                if *held == *topology {
                    return ApplyOutcome::Duplicate;
                }
                let conflict = Error::TopologyConflict { held: held_id, received };
                warn!(cache = %self.cache, error = %conflict, "two topologies share an id, keeping the held one");
                return ApplyOutcome::Conflict { held: held_id };
            }
        } else if let Some(restored) = &self.restored {
            if received < restored.topology_id() {
                return ApplyOutcome::Stale {
                    held: restored.topology_id(),
                };
            }
        }

        self.current.store(Some(Arc::clone(&topology)));
        if let Err(e) = self.store.save(&self.cache, &topology) {
            warn!(cache = %self.cache, error = %e, "failed to persist topology");
        }
        debug!(
            cache = %self.cache,
            topology_id = received,
            rebalance_id = topology.rebalance_id(),
            phase = ?topology.phase(),
            "installed topology"
        );
        ApplyOutcome::Applied
    }

    pub fn current(&self) -> Option<Arc<ClusterTopology>> {
        self.current.load_full()
    }

    /// Id of the installed topology, 0 before the first install.
    pub fn current_topology_id(&self) -> u64 {
        self.current.load().as_ref().map(|t| t.topology_id()).unwrap_or(0)
    }

    /// What this node reports to a coordinator taking over.
    pub fn status_topology(&self) -> Option<Arc<ClusterTopology>> {
        self.current().or_else(|| self.restored.clone())
    }

    pub fn is_owner(&self, segment: Segment, member: &Member) -> bool {
        self.current
            .load()
            .as_ref()
            .map(|t| t.current().is_owner(segment, member))
            .unwrap_or(false)
    }

    /// Read owners of `segment` under the installed topology.
    pub fn owners_of(&self, segment: Segment) -> Vec<Member> {
        self.current
            .load()
            .as_ref()
            .map(|t| t.read_owners(segment).to_vec())
            .unwrap_or_default()
    }

    /// Reject requests routed with a topology older than the grace window.
    pub fn check_request(&self, requested: u64) -> Result<()> {
        let current = self.current_topology_id();
        if current > requested.saturating_add(self.grace) {
            return Err(Error::StaleTopology { requested, current });
        }
        Ok(())
    }

    pub fn forget(&self) {
        if let Err(e) = self.store.remove(&self.cache) {
            warn!(cache = %self.cache, error = %e, "failed to remove persisted topology");
        }
    }
}

impl std::fmt::Debug for LocalTopologyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTopologyManager")
            .field("cache", &self.cache)
            .field("topology_id", &self.current_topology_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryTopologyStore;
    use corelib::assignment::OwnershipAssignment;
    use corelib::node::NodeId;

    fn m(id: u128) -> Member {
        Member::new(NodeId(id), format!("node{id}"))
    }

    fn topology(id: u64, owner: u128) -> Arc<ClusterTopology> {
        let current = OwnershipAssignment::new(1, vec![vec![m(owner)]; 2]);
        Arc::new(ClusterTopology::stable(id, 0, vec![m(owner)], current))
    }

    fn manager() -> LocalTopologyManager {
        LocalTopologyManager::new("users", 1, Arc::new(MemoryTopologyStore::new()))
    }

    #[test]
    fn test_ids_never_regress() {
        let ltm = manager();
        assert_eq!(ltm.apply(topology(5, 1)), ApplyOutcome::Applied);
        assert_eq!(ltm.apply(topology(3, 1)), ApplyOutcome::Stale { held: 5 });
        assert_eq!(ltm.apply(topology(5, 1)), ApplyOutcome::Duplicate);
        assert_eq!(ltm.apply(topology(5, 2)), ApplyOutcome::Conflict { held: 5 });
        assert!(ltm.is_owner(Segment(0), &m(1)));
        assert_eq!(ltm.apply(topology(6, 2)), ApplyOutcome::Applied);
        assert_eq!(ltm.current_topology_id(), 6);
        assert_eq!(ltm.owners_of(Segment(1)), vec![m(2)]);
    }

    #[test]
    fn test_concurrent_installs_keep_the_highest() {
        let ltm = Arc::new(manager());
        let handles: Vec<_> = (1..=32u64)
            .map(|id| {
                let ltm = Arc::clone(&ltm);
                std::thread::spawn(move || {
                    ltm.apply(topology(id, 1));
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(ltm.current_topology_id(), 32);
    }

    #[test]
    fn test_grace_window() {
        let ltm = manager();
        ltm.apply(topology(6, 1));
        assert!(ltm.check_request(6).is_ok());
        assert!(ltm.check_request(5).is_ok());
        assert_eq!(
            ltm.check_request(4),
            Err(Error::StaleTopology { requested: 4, current: 6 })
        );
    }

    #[test]
    fn test_restored_topology_is_a_floor() {
        let store: Arc<dyn TopologyStore> = Arc::new(MemoryTopologyStore::new());
        store.save("users", &topology(9, 1)).unwrap();
        let ltm = LocalTopologyManager::new("users", 1, store);

        assert!(ltm.current().is_none());
        assert_eq!(ltm.status_topology().map(|t| t.topology_id()), Some(9));
        assert_eq!(ltm.apply(topology(4, 1)), ApplyOutcome::Stale { held: 9 });
        assert_eq!(ltm.apply(topology(10, 1)), ApplyOutcome::Applied);
    }
}
