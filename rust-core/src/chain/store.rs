use crate::chain::block::Block;
use crate::fingerprint::Hash;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistedSnapshot {
    pub height: u64,
    pub tip_hash: Hash,
    pub blocks: Vec<Block>,
}

pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> io::Result<Self> {
        fs::create_dir_all(&data_dir)?;
        Ok(Self {
            path: data_dir.as_ref().join("ledger_snapshot.json"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> io::Result<Option<PersistedSnapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = fs::read(&self.path)?;
        let snap = serde_json::from_slice::<PersistedSnapshot>(&data)?;
        Ok(Some(snap))
    }

    /// Write-then-rename so a crash never leaves a half-written snapshot.
    pub fn save(&self, snapshot: &PersistedSnapshot) -> io::Result<()> {
        let data = serde_json::to_vec_pretty(snapshot)?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, data)?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}
