//! A whole cluster inside one process.
//!
//! Members are [`CacheManager`]s wired together by a [`LocalTransport`]; the
//! harness plays the membership layer, issuing a new [`ClusterView`] to every
//! live member whenever one joins, leaves or crashes. A crashed member can be
//! restarted under the same id and finds the topologies it persisted.

use crate::manager::{CacheHandle, CacheManager};
use crate::membership::ClusterView;
use crate::persistence::{FileTopologyStore, MemoryTopologyStore, TopologyStore};
use crate::transport::LocalTransport;
use corelib::config::CacheConfig;
use corelib::error::{Error, Result};
use corelib::network::RequestHandler;
use corelib::node::{Member, NodeId};
use corelib::topology::ClusterTopology;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

const BASE_PORT: u128 = 11_222;

pub struct LocalCluster {
    transport: Arc<LocalTransport>,
    nodes: BTreeMap<NodeId, Arc<CacheManager>>,
    /// Outlive their node so a restart can pick them up again.
    stores: BTreeMap<NodeId, Arc<dyn TopologyStore>>,
    topology_dir: Option<PathBuf>,
    view_id: u64,
    next_id: u128,
    tick: Duration,
}

impl LocalCluster {
    pub fn new() -> Self {
        Self {
            transport: Arc::new(LocalTransport::new()),
            nodes: BTreeMap::new(),
            stores: BTreeMap::new(),
            topology_dir: None,
            view_id: 0,
            next_id: 1,
            tick: Duration::from_millis(20),
        }
    }

    /// A cluster of `size` members. Must be called within a Tokio runtime.
    pub fn start(size: usize) -> Self {
        let mut cluster = Self::new();
        for _ in 0..size {
            cluster.add_node();
        }
        cluster
    }

    /// Persist topologies as files, one directory per member, under `dir`.
    pub fn with_topology_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.topology_dir = Some(dir.into());
        self
    }

    pub fn transport(&self) -> Arc<LocalTransport> {
        Arc::clone(&self.transport)
    }

    pub fn members(&self) -> Vec<Member> {
        self.nodes.values().map(|m| m.local().clone()).collect()
    }

    pub fn manager(&self, member: &Member) -> Option<&Arc<CacheManager>> {
        self.nodes.get(&member.id)
    }

    pub fn managers(&self) -> impl Iterator<Item = &Arc<CacheManager>> {
        self.nodes.values()
    }

    pub fn coordinator(&self) -> Option<Member> {
        self.nodes.values().next().and_then(|m| m.coordinator())
    }

    pub fn add_node(&mut self) -> Member {
        let id = self.next_id;
        self.next_id += 1;
        let member = Member::new(NodeId(id), format!("127.0.0.1:{}", BASE_PORT + id));
        let store = self.open_store(member.id);
        self.stores.insert(member.id, Arc::clone(&store));
        self.spawn_node(&member, store);
        info!(member = %member, "node joined");
        self.install_view();
        member
    }

    /// Bring a crashed or departed member back under its old id, with the
    /// topology store it had before.
    pub fn restart(&mut self, member: &Member) -> Result<()> {
        if self.nodes.contains_key(&member.id) {
            return Err(Error::Internal(format!("{member} is still running")));
        }
        let store = self
            .stores
            .get(&member.id)
            .cloned()
            .ok_or_else(|| Error::Internal(format!("{member} never ran in this cluster")))?;
        self.spawn_node(member, store);
        info!(member = %member, "node restarted");
        self.install_view();
        Ok(())
    }

    pub fn topology_store(&self, member: &Member) -> Option<Arc<dyn TopologyStore>> {
        self.stores.get(&member.id).cloned()
    }

    fn open_store(&self, id: NodeId) -> Arc<dyn TopologyStore> {
        let Some(dir) = &self.topology_dir else {
            return Arc::new(MemoryTopologyStore::new());
        };
        match FileTopologyStore::open(dir.join(id.to_string())) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                warn!(node = %id, error = %e, "topology directory unusable, keeping topologies in memory");
                Arc::new(MemoryTopologyStore::new())
            }
        }
    }

    fn spawn_node(&mut self, member: &Member, store: Arc<dyn TopologyStore>) {
        let manager = Arc::new(
            CacheManager::new(member.clone(), self.transport.clone(), store).with_coordinator_tick(self.tick),
        );
        let handler: Arc<dyn RequestHandler> = manager.clone();
        self.transport.register(member, handler);
        self.nodes.insert(member.id, manager);
    }

    /// Take `member` down without any goodbye.
    pub fn crash(&mut self, member: &Member) -> bool {
        let Some(manager) = self.nodes.remove(&member.id) else {
            return false;
        };
        self.transport.set_down(member, true);
        manager.shutdown();
        info!(member = %member, "node crashed");
        self.install_view();
        true
    }

    /// Stop every cache on `member`, then remove it from the view.
    pub async fn leave(&mut self, member: &Member) -> Result<()> {
        let manager = self
            .nodes
            .get(&member.id)
            .cloned()
            .ok_or_else(|| Error::Internal(format!("{member} is not in the cluster")))?;
        for name in manager.cache_names() {
            manager.stop_cache(&name).await?;
        }
        self.nodes.remove(&member.id);
        self.transport.deregister(member);
        manager.shutdown();
        info!(member = %member, "node left");
        self.install_view();
        Ok(())
    }

    fn install_view(&mut self) {
        self.view_id += 1;
        let view = ClusterView::new(self.view_id, self.members());
        for manager in self.nodes.values() {
            manager.on_view_change(view.clone());
        }
    }

    /// Start `name` on every member, one after another.
    pub async fn start_cache(&self, name: &str, config: CacheConfig) -> Result<()> {
        for manager in self.nodes.values() {
            manager.start_cache(name, config.clone()).await?;
        }
        Ok(())
    }

    pub async fn start_cache_on(&self, member: &Member, name: &str, config: CacheConfig) -> Result<CacheHandle> {
        let manager = self
            .manager(member)
            .ok_or_else(|| Error::Internal(format!("{member} is not in the cluster")))?;
        manager.start_cache(name, config).await
    }

    /// Members currently holding `key` of `name` in their local store.
    pub fn holders(&self, name: &str, key: &[u8]) -> Vec<Member> {
        self.nodes
            .values()
            .filter_map(|manager| {
                let runtime = manager.runtime(name)?;
                let segment = runtime.hash_space().segment_of(key);
                runtime
                    .store()
                    .contains(segment, key)
                    .then(|| manager.local().clone())
            })
            .collect()
    }

    /// Wait until every member running `name` holds the same STABLE topology
    /// and that topology lists exactly those members.
    pub async fn wait_for_stable(&self, name: &str, timeout: Duration) -> Result<Arc<ClusterTopology>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(topology) = self.agreed_topology(name) {
                return Ok(topology);
            }
            if Instant::now() >= deadline {
                return Err(Error::Internal(format!("cache {name} not stable after {timeout:?}")));
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn agreed_topology(&self, name: &str) -> Option<Arc<ClusterTopology>> {
        let mut running = Vec::new();
        let mut agreed: Option<Arc<ClusterTopology>> = None;
        for manager in self.nodes.values() {
            let Some(runtime) = manager.runtime(name) else {
                continue;
            };
            let topology = runtime.topology()?;
            if topology.is_rebalancing() {
                return None;
            }
            match &agreed {
                Some(held) if held.topology_id() != topology.topology_id() => return None,
                Some(_) => {}
                None => agreed = Some(topology),
            }
            running.push(manager.local().clone());
        }

        let agreed = agreed?;
        let coordinator = self.coordinator().and_then(|c| self.manager(&c).cloned())?;
        let latest = coordinator.coordinator_handle()?.topology(name)?;
        (latest.topology_id() == agreed.topology_id() && agreed.members() == running.as_slice()).then_some(agreed)
    }
}

impl Default for LocalCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LocalCluster {
    fn drop(&mut self) {
        for manager in self.nodes.values() {
            manager.shutdown();
        }
    }
}
