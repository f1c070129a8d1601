//! Command implementations.

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use client::{ClientConfig, ClientRouter};
use cluster::LocalCluster;
use corelib::assignment::OwnershipRole;
use corelib::config::CacheConfig;
use corelib::node::{Member, NodeId};
use replication::HashSpace;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::info;

const CACHE: &str = "default";
const STABLE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
pub struct SegmentRow {
    pub segment: u32,
    pub owners: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct AssignmentReport {
    pub num_owners: usize,
    pub num_segments: u32,
    pub segments: Vec<SegmentRow>,
    pub load: Vec<MemberLoad>,
}

/// Segments one member owns, split by role.
#[derive(Debug, Serialize)]
pub struct MemberLoad {
    pub member: String,
    pub primary: usize,
    pub backup: usize,
}

#[derive(Debug, Serialize)]
pub struct SimulationStep {
    pub event: String,
    pub topology_id: u64,
    pub rebalance_id: u64,
    pub members: usize,
}

#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub keys: usize,
    pub steps: Vec<SimulationStep>,
    pub verified: bool,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum CommandResult {
    Assignment(AssignmentReport),
    Simulation(SimulationReport),
}

impl CommandResult {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("serializing result")
    }
}

impl fmt::Display for CommandResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandResult::Assignment(report) => {
                writeln!(
                    f,
                    "{} segments, {} owners each",
                    report.num_segments, report.num_owners
                )?;
                for row in &report.segments {
                    writeln!(f, "{:>6}  {}", row.segment, row.owners.join(", "))?;
                }
                writeln!(f)?;
                for load in &report.load {
                    writeln!(
                        f,
                        "{}: primary for {}, backup for {}",
                        load.member, load.primary, load.backup
                    )?;
                }
                Ok(())
            }
            CommandResult::Simulation(report) => {
                for step in &report.steps {
                    writeln!(
                        f,
                        "{:<24} topology {:>3}  rebalance {:>3}  members {}",
                        step.event, step.topology_id, step.rebalance_id, step.members
                    )?;
                }
                writeln!(
                    f,
                    "{} keys {}",
                    report.keys,
                    if report.verified { "verified" } else { "NOT verified" }
                )
            }
        }
    }
}

fn member(i: usize) -> Member {
    Member::new(NodeId(i as u128), format!("node{i}"))
}

pub fn assign(config: &CacheConfig, members: usize) -> Result<CommandResult> {
    config.validate()?;
    let members: Vec<Member> = (1..=members).map(member).collect();
    let table = HashSpace::from_config(config).compute_assignment(&members, config.num_owners);

    let segments = table
        .iter()
        .map(|(segment, owners)| SegmentRow {
            segment: segment.0,
            owners: owners.iter().map(|m| m.address.clone()).collect(),
        })
        .collect();
    let load = members
        .iter()
        .map(|m| {
            let (primary, backup) = table
                .segments_owned_by(m)
                .partition::<Vec<_>, _>(|s| table.role(*s, m) == OwnershipRole::Primary);
            MemberLoad {
                member: m.address.clone(),
                primary: primary.len(),
                backup: backup.len(),
            }
        })
        .collect();

    Ok(CommandResult::Assignment(AssignmentReport {
        num_owners: config.num_owners,
        num_segments: config.num_segments,
        segments,
        load,
    }))
}

pub async fn simulate(
    config: &CacheConfig,
    initial: usize,
    joins: usize,
    crashes: usize,
    keys: usize,
) -> Result<CommandResult> {
    if initial == 0 {
        bail!("a simulation needs at least one initial member");
    }
    if crashes >= initial + joins {
        bail!("crashing {crashes} of {} members leaves nobody", initial + joins);
    }

    let mut cluster = LocalCluster::start(initial);
    cluster.start_cache(CACHE, config.clone()).await?;
    let mut steps = Vec::new();
    let mut record = |event: String, topology: &corelib::topology::ClusterTopology| {
        info!(event = %event, topology_id = topology.topology_id(), "simulation step");
        steps.push(SimulationStep {
            event,
            topology_id: topology.topology_id(),
            rebalance_id: topology.rebalance_id(),
            members: topology.members().len(),
        });
    };
    record(
        format!("start {initial} members"),
        &*cluster.wait_for_stable(CACHE, STABLE_TIMEOUT).await?,
    );

    let client = ClientRouter::new(cluster.transport(), cluster.members(), ClientConfig {
        partitioner: config.partitioner,
        ..Default::default()
    });
    for i in 0..keys {
        client.put(CACHE, key(i), value(i)).await?;
    }

    for _ in 0..joins {
        let joined = cluster.add_node();
        cluster.start_cache_on(&joined, CACHE, config.clone()).await?;
        record(
            format!("join {}", joined.address),
            &*cluster.wait_for_stable(CACHE, STABLE_TIMEOUT).await?,
        );
    }
    for _ in 0..crashes {
        let Some(victim) = cluster.members().last().cloned() else {
            break;
        };
        cluster.crash(&victim);
        record(
            format!("crash {}", victim.address),
            &*cluster.wait_for_stable(CACHE, STABLE_TIMEOUT).await?,
        );
    }

    let mut verified = true;
    for i in 0..keys {
        if client.get(CACHE, key(i)).await? != Some(value(i)) {
            verified = false;
        }
    }
    Ok(CommandResult::Simulation(SimulationReport { keys, steps, verified }))
}

fn key(i: usize) -> Bytes {
    Bytes::from(format!("key-{i}"))
}

fn value(i: usize) -> Bytes {
    Bytes::from(format!("value-{i}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assign_covers_every_segment() {
        let config = CacheConfig {
            num_segments: 8,
            ..Default::default()
        };
        let CommandResult::Assignment(report) = assign(&config, 3).unwrap() else {
            panic!("expected an assignment");
        };
        assert_eq!(report.segments.len(), 8);
        assert!(report.segments.iter().all(|row| row.owners.len() == 2));
        assert_eq!(report.load.iter().map(|l| l.primary).sum::<usize>(), 8);
        assert_eq!(report.load.iter().map(|l| l.backup).sum::<usize>(), 8);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_simulation_verifies_keys() {
        let config = CacheConfig {
            num_segments: 16,
            vnodes_per_member: 16,
            ..Default::default()
        };
        let CommandResult::Simulation(report) = simulate(&config, 2, 1, 1, 50).await.unwrap() else {
            panic!("expected a simulation");
        };
        assert!(report.verified);
        assert_eq!(report.steps.len(), 3);
        assert!(report.steps.windows(2).all(|w| w[0].topology_id < w[1].topology_id));
    }
}
