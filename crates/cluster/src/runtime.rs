//! One running cache on one node.
//!
//! Serves keyed operations against the installed topology: reads on any
//! current owner, writes on the current primary only. After a write is
//! applied locally it is propagated to the other current owners and mirrored
//! to pending owners that are still receiving the segment.

use crate::functions::FunctionRegistry;
use crate::local::{ApplyOutcome, LocalTopologyManager};
use crate::persistence::TopologyStore;
use bytes::Bytes;
use corelib::config::CacheConfig;
use corelib::network::{CacheOp, CacheStatusReport, Reply, Request, Response, Transport};
use corelib::node::Member;
use corelib::segment::Segment;
use corelib::topology::ClusterTopology;
use replication::HashSpace;
use std::sync::Arc;
use streaming::{SegmentStore, StateTransferEngine};
use tracing::{debug, warn};

const WRITE_STRIPES: usize = 64;

pub struct CacheRuntime {
    name: String,
    local: Member,
    config: CacheConfig,
    hash_space: HashSpace,
    topology: LocalTopologyManager,
    engine: Arc<StateTransferEngine>,
    transport: Arc<dyn Transport>,
    functions: Arc<FunctionRegistry>,
    /// Keeps apply-then-propagate of one key in order.
    write_locks: Vec<tokio::sync::Mutex<()>>,
    /// Keeps topology installs and engine notifications in the same order.
    install: parking_lot::Mutex<()>,
}

impl CacheRuntime {
    pub fn new(
        name: impl Into<String>,
        local: Member,
        config: CacheConfig,
        transport: Arc<dyn Transport>,
        persistence: Arc<dyn TopologyStore>,
        functions: Arc<FunctionRegistry>,
    ) -> Self {
        let name = name.into();
        let store = Arc::new(SegmentStore::new());
        let engine = StateTransferEngine::new(name.clone(), local.clone(), store, Arc::clone(&transport), &config);
        Self {
            topology: LocalTopologyManager::new(name.clone(), config.stale_topology_grace, persistence),
            hash_space: HashSpace::from_config(&config),
            name,
            local,
            config,
            engine,
            transport,
            functions,
            write_locks: (0..WRITE_STRIPES).map(|_| tokio::sync::Mutex::new(())).collect(),
            install: parking_lot::Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn hash_space(&self) -> &HashSpace {
        &self.hash_space
    }

    pub fn topology(&self) -> Option<Arc<ClusterTopology>> {
        self.topology.current()
    }

    pub fn topology_manager(&self) -> &LocalTopologyManager {
        &self.topology
    }

    pub fn engine(&self) -> &Arc<StateTransferEngine> {
        &self.engine
    }

    pub fn store(&self) -> &Arc<SegmentStore> {
        self.engine.store()
    }

    pub fn apply_topology(&self, topology: Arc<ClusterTopology>) -> ApplyOutcome {
        let _install = self.install.lock();
        let outcome = self.topology.apply(Arc::clone(&topology));
        if outcome == ApplyOutcome::Applied {
            self.engine.on_topology(&topology);
        }
        outcome
    }

    pub fn status_report(&self) -> CacheStatusReport {
        CacheStatusReport {
            cache: self.name.clone(),
            config: self.config.clone(),
            topology: self.topology.status_topology(),
        }
    }

    /// Serve a client operation routed with `topology_id`.
    pub async fn handle_op(&self, topology_id: u64, op: CacheOp) -> Response {
        let Some(topology) = self.topology.current() else {
            return Reply::NotOwner.into();
        };
        if self.topology.check_request(topology_id).is_err() {
            return Response::with_topology(
                Reply::StaleTopology {
                    topology_id: topology.topology_id(),
                },
                Some(topology),
            );
        }
        let trailer = (topology_id < topology.topology_id()).then(|| Arc::clone(&topology));
        let segment = self.hash_space.segment_of(op.key());

        let permitted = if op.is_read_only() {
            topology.current().is_owner(segment, &self.local)
        } else {
            topology.current().primary(segment) == Some(&self.local)
        };
        if !permitted {
            return Response::with_topology(Reply::NotOwner, Some(topology));
        }

        let reply = match op {
            CacheOp::Get { key } => Reply::Value(self.store().get(segment, &key)),
            CacheOp::ContainsKey { key } => Reply::Bool(self.store().contains(segment, &key)),
            write => self.write(segment, write).await,
        };
        Response::with_topology(reply, trailer)
    }

    async fn write(&self, segment: Segment, op: CacheOp) -> Reply {
        let key = op.key().clone();
        let _ordered = self.write_locks[self.stripe(&key)].lock().await;
        let store = self.store();

        let (reply, propagate) = match op {
            CacheOp::Put { key, value } => {
                let previous = store.put(segment, key, value.clone());
                (Reply::Value(previous), Some(Some(value)))
            }
            CacheOp::PutIfAbsent { key, value } => match store.put_if_absent(segment, key, value.clone()) {
                Some(existing) => (Reply::Value(Some(existing)), None),
                None => (Reply::Value(None), Some(Some(value))),
            },
            CacheOp::Remove { key } => {
                let previous = store.remove(segment, &key);
                let propagate = previous.is_some().then_some(None);
                (Reply::Value(previous), propagate)
            }
            CacheOp::Execute { key, function, argument } => {
                let Some(f) = self.functions.get(&function) else {
                    return Reply::Failed(format!("unknown function: {function}"));
                };
                let (_, next) = store.compute(segment, key, |current| f(current, &argument));
                (Reply::Value(next.clone()), Some(next))
            }
            CacheOp::Get { .. } | CacheOp::ContainsKey { .. } => {
                return Reply::Failed("read-only operation routed as a write".into());
            }
        };

        if let Some(value) = propagate {
            self.propagate(segment, key, value).await;
        }
        reply
    }

    /// Send an applied write to every other write owner.
    ///
    /// Targets are resolved after the local apply so a topology installed in
    /// between is taken into account.
    async fn propagate(&self, segment: Segment, key: Bytes, value: Option<Bytes>) {
        let Some(topology) = self.topology.current() else {
            return;
        };
        let targets: Vec<Member> = topology
            .write_owners(segment)
            .into_iter()
            .filter(|m| *m != self.local)
            .collect();
        if targets.is_empty() {
            return;
        }

        let request = Request::Replicate {
            cache: self.name.clone(),
            topology_id: topology.topology_id(),
            key,
            value,
        };
        for (target, outcome) in self.transport.broadcast(&targets, request).await {
            match outcome {
                Ok(Response { reply: Reply::Done, .. }) => {}
                Ok(Response { reply, .. }) => {
                    debug!(cache = %self.name, target = %target, ?reply, "replica declined write")
                }
                Err(e) => warn!(cache = %self.name, target = %target, error = %e, "failed to propagate write"),
            }
        }
    }

    /// Apply a write propagated by the primary.
    pub fn apply_replicated(&self, topology_id: u64, key: Bytes, value: Option<Bytes>) -> Reply {
        let segment = self.hash_space.segment_of(&key);
        let held = self.topology.current();
        let is_current_owner = held
            .as_ref()
            .map(|t| t.current().is_owner(segment, &self.local))
            .unwrap_or(false);

        if is_current_owner {
            self.store().apply(segment, key, value);
            return Reply::Done;
        }

        let is_write_owner = held
            .as_ref()
            .map(|t| t.write_owners(segment).contains(&self.local))
            .unwrap_or(false);
        let sender_is_ahead = held.as_ref().map(|t| topology_id > t.topology_id()).unwrap_or(true);
        if is_write_owner || sender_is_ahead {
            self.engine.apply_mirrored_write(segment, key, value);
            Reply::Done
        } else {
            Reply::NotOwner
        }
    }

    /// Tear down local state when the cache stops on this node.
    pub fn shutdown(&self) {
        self.topology.forget();
        let dropped = self.store().retain_segments(|_| false);
        debug!(cache = %self.name, entries = dropped, "cache stopped");
    }

    fn stripe(&self, key: &[u8]) -> usize {
        self.hash_space.partitioner().partition(key).0 as usize % self.write_locks.len()
    }
}

impl std::fmt::Debug for CacheRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheRuntime")
            .field("name", &self.name)
            .field("local", &self.local)
            .field("topology", &self.topology)
            .finish_non_exhaustive()
    }
}
