//! Owner-scoped local durable store: one slot-array snapshot and one published list per owner.
//!
//!   {root}/{owner}/TeacherStories/stories.json
//!   {root}/{owner}/TeacherStories/published_stories.json
//!
//! Writes for one owner are serialised through a per-owner mutex and land via temp file + rename.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::domain::{OwnerScope, PublishedStoryRecord, StoryRecord};
use crate::error::{StoryError, StoryResult};
use crate::util::write_atomic;

pub const STORIES_DIR: &str = "TeacherStories";
pub const STORIES_FILE: &str = "stories.json";
pub const PUBLISHED_FILE: &str = "published_stories.json";

#[derive(Serialize, Deserialize)]
struct SlotFile {
    #[serde(default)]
    slots: Vec<Option<StoryRecord>>,
}

pub struct LocalStore {
    root: PathBuf,
    locks: Mutex<HashMap<OwnerScope, Arc<Mutex<()>>>>,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), locks: Mutex::new(HashMap::new()) }
    }

    pub fn stories_path(&self, owner: &OwnerScope) -> PathBuf {
        self.root.join(owner.as_str()).join(STORIES_DIR).join(STORIES_FILE)
    }

    pub fn published_path(&self, owner: &OwnerScope) -> PathBuf {
        self.root.join(owner.as_str()).join(STORIES_DIR).join(PUBLISHED_FILE)
    }

    async fn lock_for(&self, owner: &OwnerScope) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(owner.clone()).or_default().clone()
    }

    /// Read the slot array for `owner`, seated into `slot_count` slots. `None` if no file exists.
    pub async fn read_slots(
        &self,
        owner: &OwnerScope,
        slot_count: usize,
    ) -> StoryResult<Option<Vec<Option<StoryRecord>>>> {
        let path = self.stories_path(owner);
        let Some(bytes) = read_optional(&path).await? else {
            return Ok(None);
        };
        let file: SlotFile =
            serde_json::from_slice(&bytes).map_err(|e| StoryError::Corrupt { path: path.clone(), source: e })?;
        if file.slots.len() > slot_count {
            warn!(target: "repository", %owner, found = file.slots.len(), slot_count, "Slot file longer than slot count");
        }
        Ok(Some(seat_slots(file.slots.into_iter().flatten(), slot_count)))
    }

    pub async fn write_slots(&self, owner: &OwnerScope, slots: &[Option<StoryRecord>]) -> StoryResult<()> {
        let path = self.stories_path(owner);
        let json = serde_json::to_vec_pretty(&SlotFile { slots: slots.to_vec() })
            .map_err(|e| StoryError::Corrupt { path: path.clone(), source: e })?;
        let lock = self.lock_for(owner).await;
        let _held = lock.lock().await;
        write_atomic(&path, &json).await?;
        debug!(target: "repository", %owner, path = %path.display(), "Slot file written");
        Ok(())
    }

    pub async fn read_published(&self, owner: &OwnerScope) -> StoryResult<Vec<PublishedStoryRecord>> {
        let path = self.published_path(owner);
        match read_optional(&path).await? {
            Some(bytes) => serde_json::from_slice(&bytes).map_err(|e| StoryError::Corrupt { path, source: e }),
            None => Ok(Vec::new()),
        }
    }

    pub async fn write_published(&self, owner: &OwnerScope, published: &[PublishedStoryRecord]) -> StoryResult<()> {
        let path = self.published_path(owner);
        let json = serde_json::to_vec_pretty(published)
            .map_err(|e| StoryError::Corrupt { path: path.clone(), source: e })?;
        let lock = self.lock_for(owner).await;
        let _held = lock.lock().await;
        write_atomic(&path, &json).await
    }
}

async fn read_optional(path: &Path) -> StoryResult<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoryError::io(path, e)),
    }
}

/// Place records into a fixed-length slot array by their `slot_index`.
/// Records whose index is out of range or already taken move to the first free slot;
/// anything left over once every slot is full is dropped with a warning.
pub fn seat_slots(records: impl IntoIterator<Item = StoryRecord>, slot_count: usize) -> Vec<Option<StoryRecord>> {
    let mut slots: Vec<Option<StoryRecord>> = vec![None; slot_count];
    let mut displaced = Vec::new();
    for rec in records {
        match slots.get_mut(rec.slot_index) {
            Some(slot) if slot.is_none() => *slot = Some(rec),
            _ => displaced.push(rec),
        }
    }
    for mut rec in displaced {
        match slots.iter().position(Option::is_none) {
            Some(free) => {
                warn!(target: "repository", story_id = %rec.id, from = rec.slot_index, to = free, "Re-seating story");
                rec.slot_index = free;
                slots[free] = Some(rec);
            }
            None => {
                warn!(target: "repository", story_id = %rec.id, slot = rec.slot_index, "No free slot; dropping story");
            }
        }
    }
    slots
}
