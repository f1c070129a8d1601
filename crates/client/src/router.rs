//! Topology-aware request routing.
//!
//! Every operation goes to the primary owner of the key's segment first.
//! Reads move on to the other owners once the primary has failed; writes only
//! ever leave the primary for a server that can hand out a newer topology.
//! Every response may carry a newer topology which replaces the cached one;
//! `StaleTopology` and `NotOwner` replies make the client re-plan against it.

use crate::config::ClientConfig;
use crate::retry::RetryState;
use crate::topology_cache::ClientTopologyCache;
use bytes::Bytes;
use corelib::error::{Error, Result};
use corelib::network::{CacheOp, Reply, Request, Transport};
use corelib::node::Member;
use corelib::partitioner::Partitioner;
use corelib::segment::Segment;
use corelib::topology::ClusterTopology;
use std::sync::Arc;
use tracing::{debug, trace};

pub struct ClientRouter {
    transport: Arc<dyn Transport>,
    config: ClientConfig,
    partitioner: Arc<dyn Partitioner>,
    topologies: ClientTopologyCache,
}

impl ClientRouter {
    pub fn new(transport: Arc<dyn Transport>, servers: Vec<Member>, config: ClientConfig) -> Self {
        Self {
            partitioner: config.partitioner.build(),
            topologies: ClientTopologyCache::new(servers),
            transport,
            config,
        }
    }

    pub fn topologies(&self) -> &ClientTopologyCache {
        &self.topologies
    }

    /// Route `op` on `cache` until it succeeds or the retry budget runs out.
    pub async fn execute(&self, cache: &str, op: CacheOp) -> Result<Reply> {
        let write = !op.is_read_only();
        let mut retry = RetryState::new(self.config.retry_budget);

        while retry.begin_attempt() {
            let topology = self.topologies.topology(cache);
            let Some(target) = self.pick_target(cache, op.key(), write, topology.as_deref(), &retry)? else {
                break;
            };
            let topology_id = topology.as_ref().map(|t| t.topology_id()).unwrap_or(0);
            trace!(cache = %cache, target = %target, topology_id, attempt = retry.attempts(), "sending");

            let request = Request::Cache {
                cache: cache.to_owned(),
                topology_id,
                op: op.clone(),
            };
            let response = match self.transport.send(&target, request).await {
                Ok(response) => response,
                Err(e) if e.is_connection_failure() => {
                    debug!(cache = %cache, target = %target, error = %e, "send failed, retrying");
                    retry.record(&target, e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            if let Some(newer) = response.topology {
                self.topologies.offer(cache, newer);
            }
            match response.reply {
                Reply::StaleTopology { topology_id: held } => {
                    retry.record(
                        &target,
                        Error::StaleTopology {
                            requested: topology_id,
                            current: held,
                        },
                    );
                }
                Reply::NotOwner => retry.record(&target, Error::NotOwner { target: target.clone() }),
                Reply::UnknownCache => return Err(Error::UnknownCache(cache.to_owned())),
                Reply::Failed(reason) => return Err(Error::Remote(reason)),
                reply => return Ok(reply),
            }
        }
        Err(retry.into_error())
    }

    /// Choose where the next attempt goes.
    ///
    /// Owners are preferred; once they have all failed, any other known
    /// server is used, if only to learn a newer topology from its reply.
    fn pick_target(
        &self,
        cache: &str,
        key: &[u8],
        write: bool,
        topology: Option<&ClusterTopology>,
        retry: &RetryState,
    ) -> Result<Option<Member>> {
        let usable = |m: &&Member| !retry.has_failed(m) && !retry.excludes(m, write);

        if let Some(topology) = topology {
            let segment = Segment::for_key(self.partitioner.as_ref(), key, topology.num_segments());
            let owners = topology.read_owners(segment);
            if owners.is_empty() {
                return Err(Error::NoOwnersAvailable { segment });
            }
            // The primary first; reads fall back to the backups in order.
            let preferred = if write { &owners[..1] } else { owners };
            if let Some(target) = preferred.iter().find(usable) {
                return Ok(Some(target.clone()));
            }
        }

        let servers = self.topologies.servers(cache);
        let fallback: Vec<&Member> = servers.iter().filter(usable).collect();
        if fallback.is_empty() {
            // Every server failed once; a write still must not go back to an
            // ambiguous target.
            let retryable: Vec<&Member> = servers.iter().filter(|m| !retry.excludes(m, write)).collect();
            if retryable.is_empty() {
                return Ok(None);
            }
            return Ok(Some(retryable[fastrand::usize(..retryable.len())].clone()));
        }
        Ok(Some(fallback[fastrand::usize(..fallback.len())].clone()))
    }

    pub async fn get(&self, cache: &str, key: impl Into<Bytes>) -> Result<Option<Bytes>> {
        into_value(self.execute(cache, CacheOp::Get { key: key.into() }).await?)
    }

    pub async fn contains_key(&self, cache: &str, key: impl Into<Bytes>) -> Result<bool> {
        match self.execute(cache, CacheOp::ContainsKey { key: key.into() }).await? {
            Reply::Bool(found) => Ok(found),
            other => Err(unexpected(other)),
        }
    }

    /// Returns the previous value.
    pub async fn put(&self, cache: &str, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Result<Option<Bytes>> {
        let op = CacheOp::Put {
            key: key.into(),
            value: value.into(),
        };
        into_value(self.execute(cache, op).await?)
    }

    /// Returns the existing value if there was one, in which case nothing
    /// was written.
    pub async fn put_if_absent(
        &self,
        cache: &str,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
    ) -> Result<Option<Bytes>> {
        let op = CacheOp::PutIfAbsent {
            key: key.into(),
            value: value.into(),
        };
        into_value(self.execute(cache, op).await?)
    }

    /// Returns the removed value.
    pub async fn remove(&self, cache: &str, key: impl Into<Bytes>) -> Result<Option<Bytes>> {
        into_value(self.execute(cache, CacheOp::Remove { key: key.into() }).await?)
    }

    /// Run a registered entry function on the key's primary; returns the new value.
    pub async fn invoke(
        &self,
        cache: &str,
        key: impl Into<Bytes>,
        function: impl Into<String>,
        argument: impl Into<Bytes>,
    ) -> Result<Option<Bytes>> {
        let op = CacheOp::Execute {
            key: key.into(),
            function: function.into(),
            argument: argument.into(),
        };
        into_value(self.execute(cache, op).await?)
    }
}

fn into_value(reply: Reply) -> Result<Option<Bytes>> {
    match reply {
        Reply::Value(value) => Ok(value),
        other => Err(unexpected(other)),
    }
}

fn unexpected(reply: Reply) -> Error {
    Error::Internal(format!("unexpected reply: {reply:?}"))
}

impl std::fmt::Debug for ClientRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRouter")
            .field("config", &self.config)
            .field("topologies", &self.topologies)
            .finish_non_exhaustive()
    }
}
