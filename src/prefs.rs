//! Typed key-value preferences persisted as one JSON file under the storage root.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{StoryError, StoryResult};
use crate::util::write_atomic;

pub const PREFS_FILE: &str = "prefs.json";

/// Every preference the service knows about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrefKey {
    /// Owner scope of the last session, used when no profile or identity is available.
    LastOwnerId,
    /// Where the authoring UI should reopen.
    ResumeScene,
}

pub struct Prefs {
    path: PathBuf,
    values: Mutex<BTreeMap<PrefKey, String>>,
}

impl Prefs {
    /// Open the prefs file under `storage_root`. A missing file is an empty store;
    /// an unreadable one is logged and replaced on the next write.
    pub async fn open(storage_root: &Path) -> Self {
        let path = storage_root.join(PREFS_FILE);
        let values = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<BTreeMap<PrefKey, String>>(&bytes) {
                Ok(v) => v,
                Err(e) => {
                    warn!(target: "story_vault", path = %path.display(), error = %e, "Ignoring corrupt prefs file");
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!(target: "story_vault", path = %path.display(), error = %e, "Failed to read prefs file");
                BTreeMap::new()
            }
        };
        Self { path, values: Mutex::new(values) }
    }

    pub async fn get(&self, key: PrefKey) -> Option<String> {
        self.values.lock().await.get(&key).cloned()
    }

    pub async fn set(&self, key: PrefKey, value: impl Into<String>) -> StoryResult<()> {
        let mut values = self.values.lock().await;
        values.insert(key, value.into());
        self.flush(&values).await
    }

    pub async fn remove(&self, key: PrefKey) -> StoryResult<()> {
        let mut values = self.values.lock().await;
        if values.remove(&key).is_some() {
            self.flush(&values).await?;
        }
        Ok(())
    }

    async fn flush(&self, values: &BTreeMap<PrefKey, String>) -> StoryResult<()> {
        let json = serde_json::to_vec_pretty(values)
            .map_err(|e| StoryError::Corrupt { path: self.path.clone(), source: e })?;
        write_atomic(&self.path, &json).await?;
        debug!(target: "story_vault", keys = values.len(), "Prefs saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn values_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let prefs = Prefs::open(dir.path()).await;
        assert_eq!(prefs.get(PrefKey::LastOwnerId).await, None);

        prefs.set(PrefKey::LastOwnerId, "teacherA").await.unwrap();
        prefs.set(PrefKey::ResumeScene, "editor").await.unwrap();
        prefs.remove(PrefKey::ResumeScene).await.unwrap();

        let reopened = Prefs::open(dir.path()).await;
        assert_eq!(reopened.get(PrefKey::LastOwnerId).await.as_deref(), Some("teacherA"));
        assert_eq!(reopened.get(PrefKey::ResumeScene).await, None);
    }

    #[tokio::test]
    async fn corrupt_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(PREFS_FILE), b"{not json").unwrap();
        let prefs = Prefs::open(dir.path()).await;
        assert_eq!(prefs.get(PrefKey::LastOwnerId).await, None);
    }
}
