//! Per-cache clustering configuration.

use crate::error::{Error, Result};
use crate::partitioner::PartitionerKind;
use crate::ring::DEFAULT_VNODES;
use crate::segment::DEFAULT_NUM_SEGMENTS;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Clustering settings of one cache.
///
/// Every field has a default, so a config file only needs to name what it
/// overrides.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Owners per segment, primary included.
    pub num_owners: usize,
    /// Number of segments; must be a power of two.
    pub num_segments: u32,
    /// Virtual nodes each member places on the ring.
    pub vnodes_per_member: usize,
    /// Maximum entries per state transfer chunk.
    pub chunk_size: usize,
    /// How long the coordinator waits for a destination to confirm a task.
    #[serde(with = "duration_millis")]
    pub transfer_timeout: Duration,
    /// Task re-issues before the destination is excluded.
    pub max_transfer_retries: u32,
    /// Chunk re-requests a destination makes before giving up on a task.
    pub fetch_retries: u32,
    /// How many topology ids a request may lag before it is rejected.
    pub stale_topology_grace: u64,
    pub partitioner: PartitionerKind,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            num_owners: 2,
            num_segments: DEFAULT_NUM_SEGMENTS,
            vnodes_per_member: DEFAULT_VNODES,
            chunk_size: 20,
            transfer_timeout: Duration::from_secs(30),
            max_transfer_retries: 3,
            fetch_retries: 3,
            stale_topology_grace: 1,
            partitioner: PartitionerKind::default(),
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_owners == 0 {
            return Err(Error::InvalidConfig("num_owners must be at least 1".into()));
        }
        if self.num_segments == 0 || !self.num_segments.is_power_of_two() {
            return Err(Error::InvalidConfig(format!(
                "num_segments must be a power of two, got {}",
                self.num_segments
            )));
        }
        if self.vnodes_per_member == 0 {
            return Err(Error::InvalidConfig("vnodes_per_member must be at least 1".into()));
        }
        if self.chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk_size must be at least 1".into()));
        }
        Ok(())
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(CacheConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_values() {
        let bad = [
            CacheConfig {
                num_owners: 0,
                ..Default::default()
            },
            CacheConfig {
                num_segments: 100,
                ..Default::default()
            },
            CacheConfig {
                num_segments: 0,
                ..Default::default()
            },
            CacheConfig {
                chunk_size: 0,
                ..Default::default()
            },
        ];
        for config in bad {
            assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
        }
    }
}
