//! Client routing settings.

use corelib::partitioner::PartitionerKind;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Total sends one operation may make, the first included.
    pub retry_budget: u32,
    /// Must match the servers' partitioner.
    pub partitioner: PartitionerKind,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            retry_budget: 10,
            partitioner: PartitionerKind::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: ClientConfig = serde_json::from_str(r#"{"retry_budget": 3}"#).unwrap();
        assert_eq!(config.retry_budget, 3);
        assert_eq!(config.partitioner, PartitionerKind::default());
    }
}
