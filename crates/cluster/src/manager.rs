//! Per-node registry of running caches.
//!
//! The [`CacheManager`] is what the transport delivers requests to. It routes
//! each request to the named cache's runtime, forwards coordination requests
//! to the local coordinator when this node holds that role, and starts or
//! stops the coordinator as views change.

use crate::coordinator::{CoordinatorHandle, TopologyCoordinator, DEFAULT_TICK};
use crate::functions::FunctionRegistry;
use crate::membership::ClusterView;
use crate::persistence::TopologyStore;
use crate::runtime::CacheRuntime;
use async_trait::async_trait;
use corelib::config::CacheConfig;
use corelib::error::{Error, Result};
use corelib::network::{CacheStatusReport, Reply, Request, RequestHandler, Response, Transport};
use corelib::node::Member;
use corelib::topology::ClusterTopology;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Non-owning reference to a running cache.
///
/// Stays valid to hold after the cache stops; every access then fails with
/// [`Error::UnknownCache`].
#[derive(Debug, Clone)]
pub struct CacheHandle {
    name: String,
    runtime: Weak<CacheRuntime>,
}

impl CacheHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.runtime.strong_count() > 0
    }

    pub fn runtime(&self) -> Result<Arc<CacheRuntime>> {
        self.runtime
            .upgrade()
            .ok_or_else(|| Error::UnknownCache(self.name.clone()))
    }

    pub fn topology(&self) -> Option<Arc<ClusterTopology>> {
        self.runtime.upgrade().and_then(|r| r.topology())
    }

    /// Entries held on this node.
    pub fn local_len(&self) -> usize {
        self.runtime.upgrade().map(|r| r.store().len()).unwrap_or(0)
    }
}

pub struct CacheManager {
    local: Member,
    transport: Arc<dyn Transport>,
    persistence: Arc<dyn TopologyStore>,
    functions: Arc<FunctionRegistry>,
    caches: DashMap<String, Arc<CacheRuntime>>,
    view: RwLock<ClusterView>,
    coordinator: Mutex<Option<CoordinatorHandle>>,
    tick: Duration,
}

impl CacheManager {
    pub fn new(local: Member, transport: Arc<dyn Transport>, persistence: Arc<dyn TopologyStore>) -> Self {
        Self {
            local,
            transport,
            persistence,
            functions: Arc::new(FunctionRegistry::new()),
            caches: DashMap::new(),
            view: RwLock::new(ClusterView::default()),
            coordinator: Mutex::new(None),
            tick: DEFAULT_TICK,
        }
    }

    pub fn with_coordinator_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn local(&self) -> &Member {
        &self.local
    }

    pub fn functions(&self) -> &Arc<FunctionRegistry> {
        &self.functions
    }

    pub fn view(&self) -> ClusterView {
        self.view.read().clone()
    }

    pub fn coordinator(&self) -> Option<Member> {
        self.view.read().coordinator().cloned()
    }

    pub fn is_coordinator(&self) -> bool {
        self.coordinator().as_ref() == Some(&self.local)
    }

    pub fn coordinator_handle(&self) -> Option<CoordinatorHandle> {
        self.coordinator.lock().clone().filter(|h| h.is_running())
    }

    /// Install a new view: elect the coordinator, start or stop the local
    /// coordinator, and re-announce every cache to a new coordinator.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn on_view_change(&self, view: ClusterView) {
        let previous = {
            let mut held = self.view.write();
            if view.id <= held.id {
                debug!(local = %self.local, view_id = view.id, held = held.id, "ignoring old view");
                return;
            }
            std::mem::replace(&mut *held, view.clone())
        };
        let old_coordinator = previous.coordinator().cloned();
        let new_coordinator = view.coordinator().cloned();

        {
            let mut handle = self.coordinator.lock();
            if new_coordinator.as_ref() == Some(&self.local) {
                match handle.as_ref().filter(|h| h.is_running()).cloned() {
                    Some(running) => {
                        if let Err(e) = running.view_change(view.clone()) {
                            warn!(local = %self.local, error = %e, "failed to forward view to coordinator");
                        }
                    }
                    None => {
                        info!(local = %self.local, view_id = view.id, "becoming coordinator");
                        *handle = Some(TopologyCoordinator::spawn(
                            self.local.clone(),
                            Arc::clone(&self.transport),
                            view.clone(),
                            self.tick,
                        ));
                    }
                }
            } else if let Some(stale) = handle.take() {
                info!(local = %self.local, "handing over coordinator role");
                stale.shutdown();
            }
        }

        if old_coordinator != new_coordinator {
            if let Some(coordinator) = new_coordinator {
                self.rejoin_all(coordinator);
            }
        }
    }

    /// Announce every running cache to a newly elected coordinator.
    fn rejoin_all(&self, coordinator: Member) {
        for entry in self.caches.iter() {
            let runtime = Arc::clone(entry.value());
            let transport = Arc::clone(&self.transport);
            let local = self.local.clone();
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                if let Err(e) = send_join(transport.as_ref(), &local, &coordinator, &runtime).await {
                    warn!(cache = %runtime.name(), coordinator = %coordinator, error = %e, "re-join failed");
                }
            });
        }
    }

    /// Start `name` on this node and join it to the cluster.
    pub async fn start_cache(&self, name: &str, config: CacheConfig) -> Result<CacheHandle> {
        config.validate()?;
        if let Some(existing) = self.caches.get(name) {
            return Ok(handle(name, existing.value()));
        }
        let coordinator = self
            .coordinator()
            .ok_or_else(|| Error::Internal("no cluster view installed".into()))?;

        let runtime = Arc::new(CacheRuntime::new(
            name,
            self.local.clone(),
            config,
            Arc::clone(&self.transport),
            Arc::clone(&self.persistence),
            Arc::clone(&self.functions),
        ));
        self.caches.insert(name.to_owned(), Arc::clone(&runtime));

        match send_join(self.transport.as_ref(), &self.local, &coordinator, &runtime).await {
            Ok(()) => {
                info!(cache = %name, local = %self.local, "cache started");
                Ok(handle(name, &runtime))
            }
            Err(e) => {
                self.caches.remove(name);
                Err(e)
            }
        }
    }

    /// Stop `name` on this node and tell the coordinator.
    pub async fn stop_cache(&self, name: &str) -> Result<()> {
        let (_, runtime) = self
            .caches
            .remove(name)
            .ok_or_else(|| Error::UnknownCache(name.to_owned()))?;

        if let Some(coordinator) = self.coordinator() {
            let request = Request::CacheLeave {
                cache: name.to_owned(),
                member: self.local.clone(),
            };
            if let Err(e) = self.transport.send(&coordinator, request).await {
                warn!(cache = %name, coordinator = %coordinator, error = %e, "failed to announce leave");
            }
        }
        runtime.shutdown();
        info!(cache = %name, local = %self.local, "cache stopped");
        Ok(())
    }

    pub fn cache(&self, name: &str) -> Option<CacheHandle> {
        self.caches.get(name).map(|r| handle(name, r.value()))
    }

    pub fn runtime(&self, name: &str) -> Option<Arc<CacheRuntime>> {
        self.caches.get(name).map(|r| Arc::clone(r.value()))
    }

    pub fn cache_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Stop the local coordinator, if any.
    pub fn shutdown(&self) {
        if let Some(handle) = self.coordinator.lock().take() {
            handle.shutdown();
        }
    }

    fn status(&self) -> Vec<CacheStatusReport> {
        self.caches.iter().map(|e| e.value().status_report()).collect()
    }

    fn not_coordinator(&self) -> Response {
        Reply::Failed(format!("{} is not the coordinator", self.local)).into()
    }
}

fn handle(name: &str, runtime: &Arc<CacheRuntime>) -> CacheHandle {
    CacheHandle {
        name: name.to_owned(),
        runtime: Arc::downgrade(runtime),
    }
}

async fn send_join(transport: &dyn Transport, local: &Member, coordinator: &Member, runtime: &CacheRuntime) -> Result<()> {
    let request = Request::CacheJoin {
        cache: runtime.name().to_owned(),
        config: runtime.config().clone(),
        member: local.clone(),
    };
    match transport.send(coordinator, request).await?.reply {
        Reply::Topology(Some(topology)) => {
            runtime.apply_topology(topology);
            Ok(())
        }
        Reply::Failed(reason) => Err(Error::Remote(reason)),
        other => Err(Error::Internal(format!("unexpected join reply: {other:?}"))),
    }
}

#[async_trait]
impl RequestHandler for CacheManager {
    async fn handle(&self, request: Request) -> Response {
        match request {
            Request::ClusterStatus => Reply::Status(self.status()).into(),
            Request::CacheJoin { cache, config, member } => {
                let Some(coordinator) = self.coordinator_handle() else {
                    return self.not_coordinator();
                };
                match coordinator.join(cache, config, member).await {
                    Ok(topology) => Reply::Topology(Some(topology)).into(),
                    Err(e) => Reply::Failed(e.to_string()).into(),
                }
            }
            Request::CacheLeave { cache, member } => match self.coordinator_handle() {
                Some(coordinator) => match coordinator.leave(cache, member) {
                    Ok(()) => Reply::Done.into(),
                    Err(e) => Reply::Failed(e.to_string()).into(),
                },
                None => self.not_coordinator(),
            },
            Request::TransferCompleted {
                cache,
                rebalance_id,
                segment,
                destination,
            } => match self.coordinator_handle() {
                Some(coordinator) => match coordinator.transfer_completed(cache, rebalance_id, segment, destination) {
                    Ok(()) => Reply::Done.into(),
                    Err(e) => Reply::Failed(e.to_string()).into(),
                },
                None => self.not_coordinator(),
            },
            request => {
                let Some(runtime) = request.cache().and_then(|name| self.runtime(name)) else {
                    return Reply::UnknownCache.into();
                };
                match request {
                    Request::Cache { topology_id, op, .. } => runtime.handle_op(topology_id, op).await,
                    Request::Replicate {
                        topology_id, key, value, ..
                    } => runtime.apply_replicated(topology_id, key, value).into(),
                    Request::FetchChunk {
                        rebalance_id,
                        segment,
                        cursor,
                        max_entries,
                        ..
                    } => runtime
                        .engine()
                        .serve_chunk(rebalance_id, segment, cursor.as_ref(), max_entries)
                        .into(),
                    Request::TopologyUpdate { topology, .. } => {
                        runtime.apply_topology(topology);
                        Reply::Done.into()
                    }
                    Request::StartTransfer {
                        rebalance_id,
                        task,
                        coordinator,
                        ..
                    } => runtime.engine().start_transfer(rebalance_id, task, coordinator).into(),
                    other => Reply::Failed(format!("unroutable request: {other:?}")).into(),
                }
            }
        }
    }
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("local", &self.local)
            .field("caches", &self.cache_names())
            .field("view_id", &self.view.read().id)
            .finish_non_exhaustive()
    }
}
