//! Client routing against a scripted transport.
//!
//! # Test Strategy
//!
//! 1. **Stale topology**: a `StaleTopology` reply with a newer trailer makes
//!    the client resend a write with the new id to the new primary
//! 2. **Budget**: an unreachable cluster costs exactly `retry_budget` sends
//! 3. **Ownership**: reads and writes go to the primary first, reads fall back
//!    to backups; empty owner lists fail fast
//! 4. **Ambiguity**: a write is never re-sent to a target whose failure was
//!    ambiguous, and running out of targets reports unavailability

use async_trait::async_trait;
use bytes::Bytes;
use client::{ClientConfig, ClientRouter};
use corelib::assignment::OwnershipAssignment;
use corelib::error::{Error, Result};
use corelib::network::{CacheOp, Reply, Request, Response, Transport};
use corelib::node::{Member, NodeId};
use corelib::segment::Segment;
use corelib::topology::ClusterTopology;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

const CACHE: &str = "users";

fn m(id: u128) -> Member {
    Member::new(NodeId(id), format!("node{id}"))
}

/// Answers sends from a script and records what was sent where.
#[derive(Default)]
struct ScriptedTransport {
    script: Mutex<VecDeque<Result<Response>>>,
    sent: Mutex<Vec<(Member, u64, CacheOp)>>,
}

impl ScriptedTransport {
    fn new(script: Vec<Result<Response>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            sent: Mutex::new(Vec::new()),
        })
    }

    fn sent(&self) -> Vec<(Member, u64, CacheOp)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, target: &Member, request: Request) -> Result<Response> {
        let Request::Cache { topology_id, op, .. } = request else {
            panic!("client sent a non-cache request");
        };
        self.sent.lock().push((target.clone(), topology_id, op));
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(Error::Unreachable { target: target.clone() }))
    }
}

/// One segment owned by `owners`, in order.
fn topology(id: u64, owners: &[Member]) -> Arc<ClusterTopology> {
    let current = OwnershipAssignment::new(owners.len().max(1), vec![owners.to_vec()]);
    let mut members = owners.to_vec();
    members.push(m(9));
    Arc::new(ClusterTopology::stable(id, 0, members, current))
}

fn router(transport: Arc<ScriptedTransport>, budget: u32) -> ClientRouter {
    let config = ClientConfig {
        retry_budget: budget,
        ..Default::default()
    };
    ClientRouter::new(transport, vec![m(1)], config)
}

fn key() -> Bytes {
    Bytes::from_static(b"alice")
}

#[tokio::test]
async fn test_stale_reply_replans_write_with_newer_topology() {
    let newer = topology(6, &[m(2)]);
    let transport = ScriptedTransport::new(vec![
        Ok(Response::with_topology(
            Reply::StaleTopology { topology_id: 6 },
            Some(Arc::clone(&newer)),
        )),
        Ok(Reply::Value(None).into()),
    ]);
    let client = router(transport.clone(), 10);
    client.topologies().offer(CACHE, topology(5, &[m(1)]));

    let previous = client.put(CACHE, key(), Bytes::from_static(b"v")).await.unwrap();
    assert_eq!(previous, None);

    let sent = transport.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!((sent[0].0.clone(), sent[0].1), (m(1), 5));
    assert_eq!((sent[1].0.clone(), sent[1].1), (m(2), 6));
    assert!(matches!(sent[1].2, CacheOp::Put { .. }));
    assert_eq!(client.topologies().topology_id(CACHE), 6);
}

#[tokio::test]
async fn test_reads_go_to_primary_first() {
    for _ in 0..20 {
        let transport = ScriptedTransport::new(vec![Ok(Reply::Value(None).into())]);
        let client = router(transport.clone(), 3);
        client.topologies().offer(CACHE, topology(3, &[m(2), m(3)]));

        client.get(CACHE, key()).await.unwrap();
        assert_eq!(transport.sent()[0].0, m(2));
    }
}

#[tokio::test]
async fn test_reads_fall_back_to_backup_after_primary_fails() {
    let transport = ScriptedTransport::new(vec![
        Err(Error::Unreachable { target: m(2) }),
        Ok(Reply::Value(Some(Bytes::from_static(b"v"))).into()),
    ]);
    let client = router(transport.clone(), 3);
    client.topologies().offer(CACHE, topology(3, &[m(2), m(3)]));

    let value = client.get(CACHE, key()).await.unwrap();
    assert_eq!(value, Some(Bytes::from_static(b"v")));
    let targets: Vec<Member> = transport.sent().into_iter().map(|(target, _, _)| target).collect();
    assert_eq!(targets, vec![m(2), m(3)]);
}

#[tokio::test]
async fn test_budget_bounds_sends() {
    let transport = ScriptedTransport::new(Vec::new());
    let client = router(transport.clone(), 3);
    client.topologies().offer(CACHE, topology(1, &[m(1), m(2)]));

    let err = client.get(CACHE, key()).await.unwrap_err();
    assert_eq!(err, Error::AllServersUnavailable { attempts: 3 });
    assert_eq!(transport.sent().len(), 3);
}

#[tokio::test]
async fn test_without_topology_any_known_server_is_tried() {
    let transport = ScriptedTransport::new(vec![Ok(Response::with_topology(
        Reply::Value(None),
        Some(topology(2, &[m(1)])),
    ))]);
    let client = router(transport.clone(), 3);

    assert_eq!(client.get(CACHE, key()).await.unwrap(), None);
    assert_eq!(transport.sent()[0].0, m(1));
    assert_eq!(transport.sent()[0].1, 0);
    assert_eq!(client.topologies().topology_id(CACHE), 2);
}

#[tokio::test]
async fn test_writes_go_to_primary() {
    let transport = ScriptedTransport::new(vec![Ok(Reply::Value(None).into())]);
    let client = router(transport.clone(), 3);
    client.topologies().offer(CACHE, topology(3, &[m(2), m(3)]));

    client.put(CACHE, key(), Bytes::from_static(b"v")).await.unwrap();
    assert_eq!(transport.sent()[0].0, m(2));
}

#[tokio::test]
async fn test_segment_without_owners_fails_fast() {
    let transport = ScriptedTransport::new(Vec::new());
    let client = router(transport.clone(), 3);
    client.topologies().offer(CACHE, topology(3, &[]));

    let err = client.get(CACHE, key()).await.unwrap_err();
    assert_eq!(err, Error::NoOwnersAvailable { segment: Segment(0) });
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn test_ambiguous_write_is_not_resent_to_the_same_target() {
    let transport = ScriptedTransport::new(vec![
        Err(Error::Transport {
            target: m(2),
            reason: "connection reset".into(),
        }),
        Ok(Reply::NotOwner.into()),
    ]);
    let client = router(transport.clone(), 2);
    client.topologies().offer(CACHE, topology(3, &[m(2), m(3)]));

    let err = client.put(CACHE, key(), Bytes::from_static(b"v")).await.unwrap_err();
    assert_eq!(err, Error::AllServersUnavailable { attempts: 2 });
    let sent = transport.sent();
    assert_eq!(sent[0].0, m(2));
    assert_ne!(sent[1].0, m(2));
}

#[tokio::test]
async fn test_remote_failure_passes_through() {
    let transport = ScriptedTransport::new(vec![Ok(Reply::Failed("unknown function: nope".into()).into())]);
    let client = router(transport.clone(), 3);
    client.topologies().offer(CACHE, topology(1, &[m(1)]));

    let err = client
        .invoke(CACHE, key(), "nope", Bytes::new())
        .await
        .unwrap_err();
    assert_eq!(err, Error::Remote("unknown function: nope".into()));
    assert_eq!(transport.sent().len(), 1);
}
