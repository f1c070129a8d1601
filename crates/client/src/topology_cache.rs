//! Topologies the client has learned, per cache.

use corelib::node::Member;
use corelib::topology::ClusterTopology;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// Holds the newest topology seen for each cache.
///
/// Entries are replaced wholesale and only by a strictly newer topology, so
/// an operation routing with a snapshot never observes a half-updated one.
#[derive(Debug)]
pub struct ClientTopologyCache {
    initial_servers: Vec<Member>,
    topologies: DashMap<String, Arc<ClusterTopology>>,
}

impl ClientTopologyCache {
    pub fn new(initial_servers: Vec<Member>) -> Self {
        Self {
            initial_servers,
            topologies: DashMap::new(),
        }
    }

    pub fn topology(&self, cache: &str) -> Option<Arc<ClusterTopology>> {
        self.topologies.get(cache).map(|t| Arc::clone(t.value()))
    }

    pub fn topology_id(&self, cache: &str) -> u64 {
        self.topologies.get(cache).map(|t| t.topology_id()).unwrap_or(0)
    }

    /// Install `topology` if it is newer than the held one.
    pub fn offer(&self, cache: &str, topology: Arc<ClusterTopology>) -> bool {
        match self.topologies.entry(cache.to_owned()) {
            Entry::Occupied(mut held) => {
                if topology.topology_id() <= held.get().topology_id() {
                    return false;
                }
                debug!(
                    cache = %cache,
                    from = held.get().topology_id(),
                    to = topology.topology_id(),
                    "client topology updated"
                );
                held.insert(topology);
                true
            }
            Entry::Vacant(slot) => {
                debug!(cache = %cache, topology_id = topology.topology_id(), "client topology learned");
                slot.insert(topology);
                true
            }
        }
    }

    /// Servers worth contacting for `cache`: the topology's members if known,
    /// plus the configured initial servers.
    pub fn servers(&self, cache: &str) -> Vec<Member> {
        let mut servers: Vec<Member> = self
            .topology(cache)
            .map(|t| t.members().to_vec())
            .unwrap_or_default();
        for server in &self.initial_servers {
            if !servers.contains(server) {
                servers.push(server.clone());
            }
        }
        servers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corelib::assignment::OwnershipAssignment;
    use corelib::node::NodeId;

    fn m(id: u128) -> Member {
        Member::new(NodeId(id), format!("node{id}"))
    }

    fn topology(id: u64) -> Arc<ClusterTopology> {
        let current = OwnershipAssignment::new(1, vec![vec![m(2)]]);
        Arc::new(ClusterTopology::stable(id, 0, vec![m(2)], current))
    }

    #[test]
    fn test_only_newer_topologies_replace() {
        let cache = ClientTopologyCache::new(vec![m(1)]);
        assert_eq!(cache.servers("users"), vec![m(1)]);
        assert!(cache.offer("users", topology(5)));
        assert!(!cache.offer("users", topology(5)));
        assert!(!cache.offer("users", topology(4)));
        assert!(cache.offer("users", topology(6)));
        assert_eq!(cache.topology_id("users"), 6);
        assert_eq!(cache.topology_id("other"), 0);
        assert_eq!(cache.servers("users"), vec![m(2), m(1)]);
    }
}
