//! Cluster-wide topology coordinator.
//!
//! Exactly one member, the lowest in the current view, runs a
//! [`TopologyCoordinator`]. It is an actor: every input (cache joins and
//! leaves, view changes, transfer confirmations, timer ticks) arrives on one
//! channel and is processed to completion before the next, so per-cache state
//! needs no locking. Other components talk to it through a cloneable
//! [`CoordinatorHandle`].
//!
//! A rebalance goes through two broadcasts: the REBALANCING topology (pending
//! table attached), then, once every transfer task is confirmed, the STABLE
//! topology promoting the pending table. A membership change during a
//! rebalance supersedes it with a new one computed from the latest view.

use crate::membership::ClusterView;
use corelib::config::CacheConfig;
use corelib::error::{Error, Result};
use corelib::network::{Reply, Request, Response, Transport};
use corelib::node::{Member, NodeId};
use corelib::segment::Segment;
use corelib::topology::ClusterTopology;
use corelib::transfer::TransferTask;
use dashmap::DashMap;
use replication::{plan_transfers, HashSpace};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Default interval at which transfer deadlines are checked.
pub const DEFAULT_TICK: Duration = Duration::from_millis(100);

/// Input of the coordinator actor.
#[derive(Debug)]
pub enum CoordinatorEvent {
    Join {
        cache: String,
        config: CacheConfig,
        member: Member,
        reply: oneshot::Sender<Result<Arc<ClusterTopology>>>,
    },
    Leave {
        cache: String,
        member: Member,
    },
    ViewChange(ClusterView),
    TransferCompleted {
        cache: String,
        rebalance_id: u64,
        segment: Segment,
        destination: Member,
    },
    Tick,
    Shutdown,
}

/// Cloneable front end of a running coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::UnboundedSender<CoordinatorEvent>,
    topologies: Arc<DashMap<String, Arc<ClusterTopology>>>,
}

impl CoordinatorHandle {
    pub async fn join(&self, cache: String, config: CacheConfig, member: Member) -> Result<Arc<ClusterTopology>> {
        let (reply, rx) = oneshot::channel();
        self.send(CoordinatorEvent::Join {
            cache,
            config,
            member,
            reply,
        })?;
        rx.await
            .map_err(|_| Error::Internal("coordinator stopped before answering".into()))?
    }

    pub fn leave(&self, cache: String, member: Member) -> Result<()> {
        self.send(CoordinatorEvent::Leave { cache, member })
    }

    pub fn view_change(&self, view: ClusterView) -> Result<()> {
        self.send(CoordinatorEvent::ViewChange(view))
    }

    pub fn transfer_completed(&self, cache: String, rebalance_id: u64, segment: Segment, destination: Member) -> Result<()> {
        self.send(CoordinatorEvent::TransferCompleted {
            cache,
            rebalance_id,
            segment,
            destination,
        })
    }

    /// Latest topology the coordinator produced for `cache`.
    pub fn topology(&self, cache: &str) -> Option<Arc<ClusterTopology>> {
        self.topologies.get(cache).map(|t| Arc::clone(t.value()))
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(CoordinatorEvent::Shutdown);
    }

    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }

    fn send(&self, event: CoordinatorEvent) -> Result<()> {
        self.tx
            .send(event)
            .map_err(|_| Error::Internal("coordinator is not running".into()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RebalanceState {
    Stable,
    Rebalancing,
}

#[derive(Debug)]
struct PendingTask {
    task: TransferTask,
    attempts: u32,
    deadline: Instant,
}

/// Coordinator-side record of one cache.
#[derive(Debug)]
struct CacheStatus {
    config: CacheConfig,
    hash_space: HashSpace,
    /// Members that joined the cache and are in the view.
    members: BTreeSet<Member>,
    /// Members dropped from ownership after repeatedly failing transfers.
    excluded: BTreeSet<Member>,
    topology: Arc<ClusterTopology>,
    state: RebalanceState,
    tasks: HashMap<(Segment, NodeId), PendingTask>,
}

impl CacheStatus {
    fn new(config: CacheConfig, members: BTreeSet<Member>, topology: Arc<ClusterTopology>) -> Self {
        Self {
            hash_space: HashSpace::from_config(&config),
            config,
            members,
            excluded: BTreeSet::new(),
            state: if topology.is_rebalancing() {
                RebalanceState::Rebalancing
            } else {
                RebalanceState::Stable
            },
            topology,
            tasks: HashMap::new(),
        }
    }

    fn owners(&self) -> Vec<Member> {
        self.members.difference(&self.excluded).cloned().collect()
    }
}

pub struct TopologyCoordinator {
    local: Member,
    transport: Arc<dyn Transport>,
    view: ClusterView,
    caches: BTreeMap<String, CacheStatus>,
    rx: mpsc::UnboundedReceiver<CoordinatorEvent>,
    deferred: VecDeque<CoordinatorEvent>,
    topologies: Arc<DashMap<String, Arc<ClusterTopology>>>,
    tick: Duration,
}

impl TopologyCoordinator {
    pub fn new(local: Member, transport: Arc<dyn Transport>, view: ClusterView, tick: Duration) -> (Self, CoordinatorHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let topologies = Arc::new(DashMap::new());
        let coordinator = Self {
            local,
            transport,
            view,
            caches: BTreeMap::new(),
            rx,
            deferred: VecDeque::new(),
            topologies: Arc::clone(&topologies),
            tick,
        };
        (coordinator, CoordinatorHandle { tx, topologies })
    }

    /// Start the actor on the current runtime.
    pub fn spawn(local: Member, transport: Arc<dyn Transport>, view: ClusterView, tick: Duration) -> CoordinatorHandle {
        let (coordinator, handle) = Self::new(local, transport, view, tick);
        tokio::spawn(coordinator.run());
        handle
    }

    pub async fn run(mut self) {
        info!(coordinator = %self.local, view_id = self.view.id, "coordinator starting");
        self.take_over().await;

        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let event = match self.deferred.pop_front() {
                Some(event) => event,
                None => tokio::select! {
                    event = self.rx.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                    _ = ticker.tick() => CoordinatorEvent::Tick,
                },
            };

            match event {
                CoordinatorEvent::Join {
                    cache,
                    config,
                    member,
                    reply,
                } => {
                    let result = self.on_join(&cache, config, member).await;
                    let _ = reply.send(result);
                }
                CoordinatorEvent::Leave { cache, member } => self.on_leave(&cache, &member).await,
                CoordinatorEvent::ViewChange(view) => {
                    let view = self.coalesce_views(view);
                    self.on_view_change(view).await;
                }
                CoordinatorEvent::TransferCompleted {
                    cache,
                    rebalance_id,
                    segment,
                    destination,
                } => {
                    self.on_transfer_completed(&cache, rebalance_id, segment, &destination)
                        .await
                }
                CoordinatorEvent::Tick => self.check_deadlines().await,
                CoordinatorEvent::Shutdown => break,
            }
        }
        info!(coordinator = %self.local, "coordinator stopped");
    }

    /// Fold every queued view change into the latest one.
    ///
    /// Other queued events keep their order and run after the view change.
    fn coalesce_views(&mut self, mut latest: ClusterView) -> ClusterView {
        while let Ok(event) = self.rx.try_recv() {
            match event {
                CoordinatorEvent::ViewChange(view) if view.id > latest.id => latest = view,
                CoordinatorEvent::ViewChange(_) => {}
                other => self.deferred.push_back(other),
            }
        }
        latest
    }

    /// Rebuild per-cache state from what the members report.
    ///
    /// For each cache the topology with the highest id wins; the cache is then
    /// recomputed against the live members so ids continue from there.
    async fn take_over(&mut self) {
        let members = self.view.members().to_vec();
        let responses = self.transport.broadcast(&members, Request::ClusterStatus).await;

        let mut recovered: BTreeMap<String, (CacheConfig, BTreeSet<Member>, Option<Arc<ClusterTopology>>)> =
            BTreeMap::new();
        for (member, outcome) in responses {
            let reports = match outcome {
                Ok(Response {
                    reply: Reply::Status(reports),
                    ..
                }) => reports,
                Ok(Response { reply, .. }) => {
                    debug!(member = %member, ?reply, "unexpected status reply");
                    continue;
                }
                Err(e) => {
                    debug!(member = %member, error = %e, "member did not report status");
                    continue;
                }
            };
            for report in reports {
                let entry = recovered
                    .entry(report.cache)
                    .or_insert_with(|| (report.config, BTreeSet::new(), None));
                entry.1.insert(member.clone());
                if let Some(topology) = report.topology {
                    let newer = entry.2.as_ref().map_or(true, |held| topology.topology_id() > held.topology_id());
                    if newer {
                        entry.2 = Some(topology);
                    }
                }
            }
        }

        for (name, (config, members, topology)) in recovered {
            let topology = match topology {
                Some(topology) => topology,
                None => {
                    let hash_space = HashSpace::from_config(&config);
                    let owners: Vec<Member> = members.iter().cloned().collect();
                    let current = hash_space.compute_assignment(&owners, config.num_owners);
                    Arc::new(ClusterTopology::initial(owners, current))
                }
            };
            info!(
                cache = %name,
                members = members.len(),
                topology_id = topology.topology_id(),
                "recovered cache status"
            );
            self.caches
                .insert(name.clone(), CacheStatus::new(config, members, topology));
            self.rebalance(&name, true).await;
        }
    }

    async fn on_join(&mut self, name: &str, config: CacheConfig, member: Member) -> Result<Arc<ClusterTopology>> {
        config.validate()?;
        let Some(status) = self.caches.get_mut(name) else {
            let hash_space = HashSpace::from_config(&config);
            let current = hash_space.compute_assignment(std::slice::from_ref(&member), config.num_owners);
            let topology = Arc::new(ClusterTopology::initial(vec![member.clone()], current));
            info!(cache = %name, member = %member, "cache created");
            self.caches.insert(
                name.to_owned(),
                CacheStatus::new(config, BTreeSet::from([member]), Arc::clone(&topology)),
            );
            self.publish(name).await;
            return Ok(topology);
        };

        if status.config != config {
            warn!(cache = %name, member = %member, "joining member uses a different configuration, keeping the cluster's");
        }
        let excluded = status.excluded.remove(&member);
        let added = status.members.insert(member.clone());
        if added || excluded {
            info!(cache = %name, member = %member, "member joined cache");
            self.rebalance(name, false).await;
        }
        self.caches
            .get(name)
            .map(|s| Arc::clone(&s.topology))
            .ok_or_else(|| Error::UnknownCache(name.to_owned()))
    }

    async fn on_leave(&mut self, name: &str, member: &Member) {
        let Some(status) = self.caches.get_mut(name) else {
            return;
        };
        status.excluded.remove(member);
        if !status.members.remove(member) {
            return;
        }
        info!(cache = %name, member = %member, "member left cache");
        if status.members.is_empty() {
            self.caches.remove(name);
            self.topologies.remove(name);
            return;
        }
        self.rebalance(name, false).await;
    }

    async fn on_view_change(&mut self, view: ClusterView) {
        if view.id <= self.view.id {
            return;
        }
        let (joined, left) = view.diff(&self.view);
        info!(view_id = view.id, ?joined, ?left, "coordinator view changed");
        self.view = view;

        let mut affected = Vec::new();
        let mut emptied = Vec::new();
        for (name, status) in self.caches.iter_mut() {
            let before = status.members.len();
            status.members.retain(|m| self.view.contains(m));
            status.excluded.retain(|m| self.view.contains(m));
            if status.members.is_empty() {
                emptied.push(name.clone());
            } else if status.members.len() != before {
                affected.push(name.clone());
            }
        }
        for name in emptied {
            warn!(cache = %name, "every member of the cache left the view");
            self.caches.remove(&name);
            self.topologies.remove(&name);
        }
        for name in affected {
            self.rebalance(&name, false).await;
        }
    }

    async fn on_transfer_completed(&mut self, name: &str, rebalance_id: u64, segment: Segment, destination: &Member) {
        let Some(status) = self.caches.get_mut(name) else {
            return;
        };
        if status.state != RebalanceState::Rebalancing || status.topology.rebalance_id() != rebalance_id {
            debug!(cache = %name, rebalance_id, segment = %segment, "ignoring confirmation of an old rebalance");
            return;
        }
        if status.tasks.remove(&(segment, destination.id)).is_none() {
            return;
        }
        debug!(
            cache = %name,
            segment = %segment,
            destination = %destination,
            remaining = status.tasks.len(),
            "transfer confirmed"
        );
        if status.tasks.is_empty() {
            self.confirm(name).await;
        }
    }

    /// Promote the pending table once every task is confirmed.
    async fn confirm(&mut self, name: &str) {
        let Some(status) = self.caches.get_mut(name) else {
            return;
        };
        status.topology = Arc::new(status.topology.confirm_rebalance());
        status.state = RebalanceState::Stable;
        info!(
            cache = %name,
            topology_id = status.topology.topology_id(),
            rebalance_id = status.topology.rebalance_id(),
            "rebalance complete"
        );
        self.publish(name).await;
    }

    /// Recompute ownership from the live members.
    ///
    /// Any rebalance in progress is superseded. `force` publishes even when
    /// nothing changed, which a coordinator taking over needs.
    async fn rebalance(&mut self, name: &str, force: bool) {
        let Some(status) = self.caches.get_mut(name) else {
            return;
        };
        let members = status.owners();
        let held = Arc::clone(&status.topology);
        let live_current = held.current().retain_members(&members);
        let target = status.hash_space.compute_assignment(&members, status.config.num_owners);

        let plan = plan_transfers(&live_current, &target);
        if !plan.orphaned.is_empty() {
            error!(
                cache = %name,
                segments = plan.orphaned.len(),
                "segments lost every owner, their new owners start empty"
            );
        }
        // Nothing can be streamed for orphaned segments; hand them to their
        // new owners right away.
        let current = live_current.with_replaced(|segment, owners| {
            owners.is_empty().then(|| target.owners(segment).to_vec())
        });
        let plan = plan_transfers(&current, &target);

        let next = if current == target {
            let unchanged = !held.is_rebalancing() && *held.current() == current && held.members() == members.as_slice();
            if unchanged {
                if force {
                    self.publish(name).await;
                }
                return;
            }
            if held.is_rebalancing() {
                ClusterTopology::stable(held.topology_id() + 1, held.rebalance_id() + 1, members, current)
            } else {
                held.with_members(members, current)
            }
        } else if plan.is_empty() {
            ClusterTopology::stable(held.topology_id() + 1, held.rebalance_id() + 1, members, target)
        } else {
            held.start_rebalance(members, current, target)
        };

        if held.is_rebalancing() {
            info!(cache = %name, superseded = held.rebalance_id(), "rebalance superseded");
        }
        status.tasks.clear();
        status.topology = Arc::new(next);
        status.state = if status.topology.is_rebalancing() {
            RebalanceState::Rebalancing
        } else {
            RebalanceState::Stable
        };

        if status.state == RebalanceState::Rebalancing {
            let deadline = Instant::now() + status.config.transfer_timeout;
            status.tasks = plan
                .tasks
                .into_iter()
                .map(|task| {
                    (
                        (task.segment, task.destination.id),
                        PendingTask {
                            task,
                            attempts: 1,
                            deadline,
                        },
                    )
                })
                .collect();
            info!(
                cache = %name,
                topology_id = status.topology.topology_id(),
                rebalance_id = status.topology.rebalance_id(),
                tasks = status.tasks.len(),
                "rebalance started"
            );
        }

        self.publish(name).await;
        self.issue_all(name).await;
    }

    /// Broadcast the cache's topology to every joined member and wait for
    /// their acknowledgements.
    async fn publish(&mut self, name: &str) {
        let Some(status) = self.caches.get(name) else {
            return;
        };
        let topology = Arc::clone(&status.topology);
        self.topologies.insert(name.to_owned(), Arc::clone(&topology));

        let targets: Vec<Member> = status.members.iter().cloned().collect();
        let request = Request::TopologyUpdate {
            cache: name.to_owned(),
            topology: Arc::clone(&topology),
        };
        for (member, outcome) in self.transport.broadcast(&targets, request).await {
            if let Err(e) = outcome {
                warn!(
                    cache = %name,
                    member = %member,
                    topology_id = topology.topology_id(),
                    error = %e,
                    "topology broadcast failed"
                );
            }
        }
    }

    async fn issue_all(&mut self, name: &str) {
        let Some(status) = self.caches.get(name) else {
            return;
        };
        let tasks: Vec<TransferTask> = status.tasks.values().map(|t| t.task.clone()).collect();
        for task in tasks {
            self.issue(name, task).await;
        }
    }

    async fn issue(&self, name: &str, task: TransferTask) {
        let Some(status) = self.caches.get(name) else {
            return;
        };
        let rebalance_id = status.topology.rebalance_id();
        let destination = task.destination.clone();
        let request = Request::StartTransfer {
            cache: name.to_owned(),
            rebalance_id,
            task,
            coordinator: self.local.clone(),
        };
        match self.transport.send(&destination, request).await {
            Ok(Response { reply: Reply::Done, .. }) => {}
            Ok(Response { reply, .. }) => {
                debug!(cache = %name, destination = %destination, ?reply, "transfer not started, will re-issue")
            }
            Err(e) => warn!(cache = %name, destination = %destination, error = %e, "failed to issue transfer"),
        }
    }

    /// Re-issue overdue tasks; exclude destinations that exhausted retries.
    async fn check_deadlines(&mut self) {
        let now = Instant::now();
        let names: Vec<String> = self
            .caches
            .iter()
            .filter(|(_, s)| s.state == RebalanceState::Rebalancing)
            .map(|(name, _)| name.clone())
            .collect();

        for name in names {
            let mut reissue = Vec::new();
            let mut exclude = BTreeSet::new();
            if let Some(status) = self.caches.get_mut(&name) {
                let timeout = status.config.transfer_timeout;
                let max_retries = status.config.max_transfer_retries;
                for pending in status.tasks.values_mut().filter(|t| t.deadline <= now) {
                    if pending.attempts > max_retries {
                        let err = Error::TransferTimeout {
                            segment: pending.task.segment,
                            destination: pending.task.destination.clone(),
                            attempts: pending.attempts,
                        };
                        warn!(cache = %name, error = %err, "excluding unresponsive destination");
                        exclude.insert(pending.task.destination.clone());
                    } else {
                        pending.attempts += 1;
                        pending.deadline = now + timeout;
                        reissue.push(pending.task.clone());
                    }
                }
                status.excluded.extend(exclude.iter().cloned());
            }

            if !exclude.is_empty() {
                self.rebalance(&name, false).await;
                continue;
            }
            for task in reissue {
                debug!(cache = %name, task = %task, "re-issuing overdue transfer");
                self.issue(&name, task).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use corelib::network::CacheStatusReport;
    use parking_lot::Mutex;

    fn m(id: u128) -> Member {
        Member::new(NodeId(id), format!("node{id}"))
    }

    /// Acknowledges everything and records what was sent.
    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<(Member, Request)>>,
        status: Mutex<Vec<(Member, Vec<CacheStatusReport>)>>,
    }

    impl RecordingTransport {
        fn topologies_sent_to(&self, member: &Member) -> Vec<Arc<ClusterTopology>> {
            self.sent
                .lock()
                .iter()
                .filter(|(to, _)| to == member)
                .filter_map(|(_, r)| match r {
                    Request::TopologyUpdate { topology, .. } => Some(Arc::clone(topology)),
                    _ => None,
                })
                .collect()
        }

        fn start_transfers(&self) -> Vec<TransferTask> {
            self.sent
                .lock()
                .iter()
                .filter_map(|(_, r)| match r {
                    Request::StartTransfer { task, .. } => Some(task.clone()),
                    _ => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn send(&self, target: &Member, request: Request) -> Result<Response> {
            if matches!(request, Request::ClusterStatus) {
                let reports = self
                    .status
                    .lock()
                    .iter()
                    .find(|(m, _)| m == target)
                    .map(|(_, r)| r.clone())
                    .unwrap_or_default();
                return Ok(Reply::Status(reports).into());
            }
            self.sent.lock().push((target.clone(), request));
            Ok(Reply::Done.into())
        }
    }

    fn config() -> CacheConfig {
        CacheConfig {
            num_segments: 8,
            vnodes_per_member: 16,
            transfer_timeout: Duration::from_millis(50),
            max_transfer_retries: 1,
            ..Default::default()
        }
    }

    fn coordinator(transport: Arc<RecordingTransport>, members: &[Member]) -> TopologyCoordinator {
        let view = ClusterView::new(1, members.iter().cloned());
        TopologyCoordinator::new(m(1), transport, view, DEFAULT_TICK).0
    }

    #[tokio::test]
    async fn test_first_join_creates_stable_topology() {
        let transport = Arc::new(RecordingTransport::default());
        let mut c = coordinator(transport.clone(), &[m(1)]);

        let topology = c.on_join("users", config(), m(1)).await.unwrap();
        assert_eq!(topology.topology_id(), 1);
        assert!(!topology.is_rebalancing());
        assert!(topology.current().iter().all(|(_, owners)| owners == [m(1)]));
        assert_eq!(transport.topologies_sent_to(&m(1)).len(), 1);
    }

    #[tokio::test]
    async fn test_join_rebalances_and_confirms() {
        let transport = Arc::new(RecordingTransport::default());
        let mut c = coordinator(transport.clone(), &[m(1), m(2)]);
        c.on_join("users", config(), m(1)).await.unwrap();

        let rebalancing = c.on_join("users", config(), m(2)).await.unwrap();
        assert!(rebalancing.is_rebalancing());
        assert_eq!((rebalancing.topology_id(), rebalancing.rebalance_id()), (2, 1));

        let tasks = transport.start_transfers();
        assert!(!tasks.is_empty());
        assert!(tasks.iter().all(|t| t.destination == m(2) && t.source == m(1)));

        for task in &tasks {
            c.on_transfer_completed("users", 1, task.segment, &m(2)).await;
        }
        let stable = c.topologies.get("users").map(|t| Arc::clone(t.value())).unwrap();
        assert_eq!((stable.topology_id(), stable.rebalance_id()), (3, 1));
        assert!(!stable.is_rebalancing());
        assert_eq!(stable.current(), rebalancing.pending().unwrap());
        assert_eq!(transport.topologies_sent_to(&m(2)).last(), Some(&stable));
    }

    #[tokio::test]
    async fn test_view_change_supersedes_rebalance() {
        let transport = Arc::new(RecordingTransport::default());
        let mut c = coordinator(transport.clone(), &[m(1), m(2), m(3)]);
        c.on_join("users", config(), m(1)).await.unwrap();
        c.on_join("users", config(), m(2)).await.unwrap();
        let first = c.topologies.get("users").map(|t| Arc::clone(t.value())).unwrap();
        assert!(first.is_rebalancing());

        c.on_view_change(ClusterView::new(2, [m(1), m(3)])).await;
        let after = c.topologies.get("users").map(|t| Arc::clone(t.value())).unwrap();
        assert!(after.topology_id() > first.topology_id());
        assert!(after.rebalance_id() > first.rebalance_id());
        assert!(!after.is_rebalancing());
        assert_eq!(after.members(), &[m(1)]);

        // Confirmations of the superseded rebalance are ignored.
        c.on_transfer_completed("users", first.rebalance_id(), Segment(0), &m(2)).await;
        let unchanged = c.topologies.get("users").map(|t| t.topology_id()).unwrap();
        assert_eq!(unchanged, after.topology_id());
    }

    #[tokio::test]
    async fn test_unresponsive_destination_is_excluded() {
        let transport = Arc::new(RecordingTransport::default());
        let mut c = coordinator(transport.clone(), &[m(1), m(2)]);
        c.on_join("users", config(), m(1)).await.unwrap();
        c.on_join("users", config(), m(2)).await.unwrap();
        let issued = transport.start_transfers().len();

        tokio::time::sleep(Duration::from_millis(60)).await;
        c.check_deadlines().await;
        assert_eq!(transport.start_transfers().len(), issued * 2, "first timeout re-issues");

        tokio::time::sleep(Duration::from_millis(60)).await;
        c.check_deadlines().await;
        let topology = c.topologies.get("users").map(|t| Arc::clone(t.value())).unwrap();
        assert!(!topology.is_rebalancing());
        assert_eq!(topology.members(), &[m(1)]);
        assert!(!topology.current().members().contains(&m(2)));
    }

    #[tokio::test]
    async fn test_take_over_continues_from_highest_id() {
        let transport = Arc::new(RecordingTransport::default());
        let current = HashSpace::from_config(&config()).compute_assignment(&[m(1), m(2), m(3)], 2);
        let old = Arc::new(ClusterTopology::stable(7, 2, vec![m(1), m(2), m(3)], current.clone()));
        let older = Arc::new(ClusterTopology::stable(6, 2, vec![m(1), m(2), m(3)], current));
        let report = |t: &Arc<ClusterTopology>| CacheStatusReport {
            cache: "users".into(),
            config: config(),
            topology: Some(Arc::clone(t)),
        };
        *transport.status.lock() = vec![(m(2), vec![report(&old)]), (m(3), vec![report(&older)])];

        // The former coordinator m(1) is gone.
        let view = ClusterView::new(5, [m(2), m(3)]);
        let (mut c, _handle) = TopologyCoordinator::new(m(2), transport.clone(), view, DEFAULT_TICK);
        c.take_over().await;

        let topology = c.topologies.get("users").map(|t| Arc::clone(t.value())).unwrap();
        assert!(topology.topology_id() > 7);
        assert_eq!(topology.members(), &[m(2), m(3)]);
        assert!(topology.current().iter().all(|(_, owners)| !owners.is_empty()));
        assert!(!topology.current().members().contains(&m(1)));
    }

    #[tokio::test]
    async fn test_handle_round_trip() {
        let transport = Arc::new(RecordingTransport::default());
        let handle = TopologyCoordinator::spawn(m(1), transport, ClusterView::new(1, [m(1)]), DEFAULT_TICK);

        let topology = handle.join("users".into(), config(), m(1)).await.unwrap();
        assert_eq!(handle.topology("users"), Some(topology));
        assert!(matches!(
            handle.join("bad".into(), CacheConfig { num_segments: 3, ..config() }, m(1)).await,
            Err(Error::InvalidConfig(_))
        ));

        handle.shutdown();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_running());
    }
}
