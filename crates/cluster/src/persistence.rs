//! Durable record of the last installed topology per cache.
//!
//! A restarted member reports what it persisted when a new coordinator
//! collects cluster status, so topology ids keep increasing across restarts.

use corelib::error::{Error, Result};
use corelib::topology::ClusterTopology;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Debug;
use std::fs;
use std::path::{Path, PathBuf};

pub trait TopologyStore: Send + Sync + Debug + 'static {
    fn save(&self, cache: &str, topology: &ClusterTopology) -> Result<()>;
    fn load(&self, cache: &str) -> Result<Option<ClusterTopology>>;
    fn remove(&self, cache: &str) -> Result<()>;
}

/// Keeps topologies in process memory only.
#[derive(Debug, Default)]
pub struct MemoryTopologyStore {
    topologies: Mutex<HashMap<String, ClusterTopology>>,
}

impl MemoryTopologyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TopologyStore for MemoryTopologyStore {
    fn save(&self, cache: &str, topology: &ClusterTopology) -> Result<()> {
        self.topologies.lock().insert(cache.to_owned(), topology.clone());
        Ok(())
    }

    fn load(&self, cache: &str) -> Result<Option<ClusterTopology>> {
        Ok(self.topologies.lock().get(cache).cloned())
    }

    fn remove(&self, cache: &str) -> Result<()> {
        self.topologies.lock().remove(cache);
        Ok(())
    }
}

/// One bincode file per cache under a directory.
#[derive(Debug, Clone)]
pub struct FileTopologyStore {
    dir: PathBuf,
}

impl FileTopologyStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| Error::Persistence(format!("{}: {e}", dir.display())))?;
        Ok(Self { dir })
    }

    fn path(&self, cache: &str) -> PathBuf {
        self.dir.join(format!("{cache}.topology"))
    }
}

impl TopologyStore for FileTopologyStore {
    fn save(&self, cache: &str, topology: &ClusterTopology) -> Result<()> {
        let bytes = bincode::serialize(topology).map_err(|e| Error::Persistence(e.to_string()))?;
        let path = self.path(cache);
        let tmp = path.with_extension("topology.tmp");
        fs::write(&tmp, bytes).map_err(|e| Error::Persistence(format!("{}: {e}", tmp.display())))?;
        fs::rename(&tmp, &path).map_err(|e| Error::Persistence(format!("{}: {e}", path.display())))
    }

    fn load(&self, cache: &str) -> Result<Option<ClusterTopology>> {
        let path = self.path(cache);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Persistence(format!("{}: {e}", path.display()))),
        };
        bincode::deserialize(&bytes)
            .map(Some)
            .map_err(|e| Error::Persistence(format!("{}: {e}", path.display())))
    }

    fn remove(&self, cache: &str) -> Result<()> {
        match fs::remove_file(self.path(cache)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Persistence(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corelib::assignment::OwnershipAssignment;
    use corelib::node::{Member, NodeId};

    fn topology() -> ClusterTopology {
        let a = Member::new(NodeId(1), "node1");
        let current = OwnershipAssignment::new(1, vec![vec![a.clone()]; 4]);
        ClusterTopology::stable(7, 3, vec![a], current)
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTopologyStore::open(dir.path()).unwrap();
        assert_eq!(store.load("users").unwrap(), None);
        store.save("users", &topology()).unwrap();

        let reopened = FileTopologyStore::open(dir.path()).unwrap();
        assert_eq!(reopened.load("users").unwrap(), Some(topology()));
        reopened.remove("users").unwrap();
        reopened.remove("users").unwrap();
        assert_eq!(reopened.load("users").unwrap(), None);
    }

    #[test]
    fn test_corrupt_file_is_a_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTopologyStore::open(dir.path()).unwrap();
        fs::write(dir.path().join("users.topology"), b"garbage").unwrap();
        assert!(matches!(store.load("users"), Err(Error::Persistence(_))));
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryTopologyStore::new();
        store.save("users", &topology()).unwrap();
        assert_eq!(store.load("users").unwrap().map(|t| t.topology_id()), Some(7));
    }
}
