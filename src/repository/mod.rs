//! Story repository: the owner-scoped slot array, the selection cursor, and the orchestration
//! of local saves, remote publishes, loads and soft deletes.
//!
//! Rules this module keeps:
//!   - Slots never shift. Deleting sets the slot to `None`.
//!   - Local writes are the fallback of last resort; their failures are returned.
//!   - Remote failures degrade to local-only behavior and are logged.
//!   - No lock is held across remote I/O. After each remote await the owner scope is read
//!     again, and nothing is committed if it moved.

pub mod documents;
pub mod local;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::assets::AssetCacheResolver;
use crate::domain::{AssetKind, AssetReference, OwnerScope, PublishedStoryRecord, StoryEdit, StoryRecord};
use crate::error::{StoryError, StoryResult};
use crate::identity::IdentityProvider;
use crate::prefs::{PrefKey, Prefs};
use crate::remote::{DocumentStore, RemoteError, SubCollection, OWNER_FIELD, STORIES_COLLECTION};
use crate::util::now_rfc3339;

use self::documents::{dialogue_fields, question_fields, record_from_documents, story_fields};
use self::local::{seat_slots, LocalStore};

const EVENT_CAPACITY: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadSource {
    Remote,
    Local,
    Empty,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoadStatus {
    Loaded { source: LoadSource, stories: usize },
    /// Another load was running; this request was dropped, not queued.
    AlreadyLoading,
    /// Same owner, already loaded.
    Unchanged,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PublishOutcome {
    #[serde(rename_all = "camelCase")]
    Published { story_id: String },
    /// Saved locally; the cloud write did not happen.
    LocalOnly { reason: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RepositoryEvent {
    ScopeChanged { owner: OwnerScope },
    Loaded { owner: OwnerScope, source: LoadSource, stories: usize },
    Saved { owner: OwnerScope },
    Published { owner: OwnerScope, story_id: String },
    Deleted { owner: OwnerScope, slot_index: usize },
}

struct RepoState {
    owner: OwnerScope,
    slots: Vec<Option<StoryRecord>>,
    current_index: Option<usize>,
    published: Vec<PublishedStoryRecord>,
    loaded: bool,
}

impl RepoState {
    fn empty(owner: OwnerScope, slot_count: usize) -> Self {
        Self { owner, slots: vec![None; slot_count], current_index: None, published: Vec::new(), loaded: false }
    }

    fn record(&self, slot_index: usize) -> StoryResult<&StoryRecord> {
        self.slots
            .get(slot_index)
            .and_then(Option::as_ref)
            .ok_or_else(|| StoryError::NotFound(format!("no story in slot {slot_index}")))
    }

    fn record_mut(&mut self, slot_index: usize) -> StoryResult<&mut StoryRecord> {
        self.slots
            .get_mut(slot_index)
            .and_then(Option::as_mut)
            .ok_or_else(|| StoryError::NotFound(format!("no story in slot {slot_index}")))
    }
}

/// Clears the in-flight flag however the load ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Assign id and timestamps where absent; `touch` also refreshes `updated_at`.
fn stamp(record: &mut StoryRecord, touch: bool) {
    let now = now_rfc3339();
    if record.id.is_empty() {
        record.id = Uuid::new_v4().to_string();
    }
    if record.created_at.trim().is_empty() {
        record.created_at = now.clone();
    }
    if touch || record.updated_at.trim().is_empty() {
        record.updated_at = now;
    }
}

fn encoded(v: Result<Value, serde_json::Error>) -> StoryResult<Value> {
    v.map_err(|e| StoryError::Remote(RemoteError::Malformed(e.to_string())))
}

fn local_only(reason: impl Into<String>) -> PublishOutcome {
    PublishOutcome::LocalOnly { reason: reason.into() }
}

pub struct StoryRepository {
    slot_count: usize,
    local: LocalStore,
    assets: AssetCacheResolver,
    documents: Option<Arc<dyn DocumentStore>>,
    identity: Arc<dyn IdentityProvider>,
    prefs: Option<Arc<Prefs>>,
    state: RwLock<RepoState>,
    load_in_flight: AtomicBool,
    save_lock: Mutex<()>,
    events: broadcast::Sender<RepositoryEvent>,
}

impl StoryRepository {
    /// Local-only repository under the resolver's storage root, scoped to `"default"` until
    /// `set_owner_scope` is called.
    pub fn new(slot_count: usize, assets: AssetCacheResolver, identity: Arc<dyn IdentityProvider>) -> Self {
        let slot_count = slot_count.max(1);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            slot_count,
            local: LocalStore::new(assets.storage_root()),
            assets,
            documents: None,
            identity,
            prefs: None,
            state: RwLock::new(RepoState::empty(OwnerScope::default(), slot_count)),
            load_in_flight: AtomicBool::new(false),
            save_lock: Mutex::new(()),
            events,
        }
    }

    /// Enable remote load, publish and ownership-checked delete through `documents`.
    pub fn with_documents(mut self, documents: Arc<dyn DocumentStore>) -> Self {
        self.documents = Some(documents);
        self
    }

    /// Remember each new owner scope as the last-known owner in `prefs`.
    pub fn with_prefs(mut self, prefs: Arc<Prefs>) -> Self {
        self.prefs = Some(prefs);
        self
    }

    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    pub fn assets(&self) -> &AssetCacheResolver {
        &self.assets
    }

    pub fn has_remote(&self) -> bool {
        self.documents.is_some()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RepositoryEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: RepositoryEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn check_slot(&self, slot_index: usize) -> StoryResult<()> {
        if slot_index < self.slot_count {
            Ok(())
        } else {
            Err(StoryError::InvalidSlot { index: slot_index, count: self.slot_count })
        }
    }

    pub async fn owner_scope(&self) -> OwnerScope {
        self.state.read().await.owner.clone()
    }

    pub async fn is_loaded(&self) -> bool {
        self.state.read().await.loaded
    }

    // --- Scope and loading ---

    /// Switch to `owner`, clearing every piece of state from the previous scope, then load.
    /// A repeat call for the loaded (or loading) scope does nothing.
    #[instrument(level = "info", target = "repository", skip(self), fields(%owner))]
    pub async fn set_owner_scope(&self, owner: OwnerScope) -> StoryResult<LoadStatus> {
        {
            let mut st = self.state.write().await;
            if st.owner == owner && (st.loaded || self.load_in_flight.load(Ordering::Acquire)) {
                debug!(target: "repository", %owner, "Owner scope unchanged");
                return Ok(LoadStatus::Unchanged);
            }
            if st.owner != owner {
                info!(target: "repository", from = %st.owner, to = %owner, "Owner scope changed; clearing stories");
            }
            *st = RepoState::empty(owner.clone(), self.slot_count);
        }
        if let Some(prefs) = &self.prefs {
            if let Err(e) = prefs.set(PrefKey::LastOwnerId, owner.as_str()).await {
                warn!(target: "repository", error = %e, "Failed to remember last owner");
            }
        }
        self.emit(RepositoryEvent::ScopeChanged { owner });
        self.load_all().await
    }

    /// Load the slot array for the current scope: remote when signed in and configured,
    /// else the local file, else empty. A concurrent call is dropped, not queued.
    #[instrument(level = "info", target = "repository", skip(self))]
    pub async fn load_all(&self) -> StoryResult<LoadStatus> {
        loop {
            if self
                .load_in_flight
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                info!(target: "repository", "Load already in flight; ignoring request");
                return Ok(LoadStatus::AlreadyLoading);
            }
            let result = {
                let _in_flight = InFlight(&self.load_in_flight);
                self.load_until_stable().await
            };
            // A scope switch that landed after our commit but before the flag cleared
            // found the flag set and skipped its own load; pick it up here.
            if result.is_ok() && !self.is_loaded().await {
                continue;
            }
            return result;
        }
    }

    async fn load_until_stable(&self) -> StoryResult<LoadStatus> {
        loop {
            let owner = self.owner_scope().await;
            let (slots, published, source) = self.fetch_for(&owner).await?;

            let mut st = self.state.write().await;
            if st.owner != owner {
                warn!(target: "repository", loaded_for = %owner, current = %st.owner, "Owner scope changed during load; reloading");
                continue;
            }
            let stories = slots.iter().flatten().filter(|r| r.is_persisted()).count();
            st.slots = slots;
            st.published = published;
            st.loaded = true;
            if let Some(i) = st.current_index {
                if st.slots.get(i).map_or(true, Option::is_none) {
                    st.current_index = None;
                }
            }
            drop(st);

            info!(target: "repository", %owner, ?source, stories, "Stories loaded");
            self.emit(RepositoryEvent::Loaded { owner, source, stories });
            return Ok(LoadStatus::Loaded { source, stories });
        }
    }

    async fn fetch_for(
        &self,
        owner: &OwnerScope,
    ) -> StoryResult<(Vec<Option<StoryRecord>>, Vec<PublishedStoryRecord>, LoadSource)> {
        if let Some(documents) = self.documents.as_ref().filter(|_| self.identity.is_authenticated()) {
            match self.fetch_remote(documents.as_ref(), owner).await {
                Ok(remote) => {
                    // The remote copy is authoritative here; unreadable local files only lose
                    // their local-only work.
                    let local = match self.local.read_slots(owner, self.slot_count).await {
                        Ok(local) => local.unwrap_or_default(),
                        Err(e) => {
                            error!(target: "repository", %owner, error = %e, "Unreadable slot file; keeping remote stories only");
                            Vec::new()
                        }
                    };
                    let published = match self.local.read_published(owner).await {
                        Ok(published) => published,
                        Err(e) => {
                            error!(target: "repository", %owner, error = %e, "Unreadable published list; starting empty");
                            Vec::new()
                        }
                    };
                    let slots = self.merge_local_only(remote, local);
                    self.local.write_slots(owner, &slots).await?;
                    return Ok((slots, published, LoadSource::Remote));
                }
                Err(e) => {
                    warn!(target: "repository", %owner, error = %e, "Remote load failed; using local file");
                }
            }
        }

        let published = self.local.read_published(owner).await?;
        Ok(match self.local.read_slots(owner, self.slot_count).await? {
            Some(slots) => (slots, published, LoadSource::Local),
            None => (vec![None; self.slot_count], published, LoadSource::Empty),
        })
    }

    /// Remote records take their slots; drafts and never-published local stories keep theirs
    /// (or move to a free slot) so a load never throws away local work.
    fn merge_local_only(&self, remote: Vec<StoryRecord>, local: Vec<Option<StoryRecord>>) -> Vec<Option<StoryRecord>> {
        let remote_ids: HashSet<String> = remote.iter().map(|r| r.id.clone()).collect();
        let local_only = local
            .into_iter()
            .flatten()
            .filter(|r| r.id.is_empty() || !remote_ids.contains(&r.id));
        seat_slots(remote.into_iter().chain(local_only), self.slot_count)
    }

    async fn fetch_remote(&self, documents: &dyn DocumentStore, owner: &OwnerScope) -> StoryResult<Vec<StoryRecord>> {
        let docs = documents.query_eq(STORIES_COLLECTION, OWNER_FIELD, owner.as_str()).await?;
        let mut records = Vec::with_capacity(docs.len());
        for doc in docs {
            // The query filter is not trusted on its own.
            if doc.str_field(OWNER_FIELD) != Some(owner.as_str()) {
                warn!(target: "repository", %owner, story_id = %doc.id, found = ?doc.str_field(OWNER_FIELD), "Discarding story owned by another scope");
                continue;
            }
            let dialogues = documents.list(&SubCollection::Dialogues.path(&doc.id)).await?;
            let questions = documents.list(&SubCollection::Questions.path(&doc.id)).await?;
            match record_from_documents(&doc, &dialogues, &questions) {
                Ok(rec) => records.push(rec),
                Err(e) => warn!(target: "repository", story_id = %doc.id, error = %e, "Skipping malformed story document"),
            }
        }
        debug!(target: "repository", %owner, count = records.len(), "Remote stories fetched");
        Ok(records)
    }

    // --- Reads ---

    /// Persisted stories, loading first if nothing has been loaded for this scope yet.
    pub async fn stories(&self) -> StoryResult<Vec<StoryRecord>> {
        if !self.is_loaded().await {
            self.load_all().await?;
        }
        Ok(self.list_stories().await)
    }

    /// Persisted stories in slot order. Drafts are not stories yet.
    pub async fn list_stories(&self) -> Vec<StoryRecord> {
        let st = self.state.read().await;
        st.slots.iter().flatten().filter(|r| r.is_persisted()).cloned().collect()
    }

    /// Full slot array, drafts and empty slots included.
    pub async fn slots(&self) -> Vec<Option<StoryRecord>> {
        self.state.read().await.slots.clone()
    }

    pub async fn story(&self, slot_index: usize) -> Option<StoryRecord> {
        let st = self.state.read().await;
        st.slots.get(slot_index).cloned().flatten()
    }

    pub async fn published_stories(&self) -> Vec<PublishedStoryRecord> {
        self.state.read().await.published.clone()
    }

    pub async fn current_index(&self) -> Option<usize> {
        self.state.read().await.current_index
    }

    pub async fn current_story(&self) -> Option<StoryRecord> {
        let st = self.state.read().await;
        st.current_index.and_then(|i| st.slots.get(i).cloned().flatten())
    }

    /// Point the cursor at a saved story.
    pub async fn select_story(&self, slot_index: usize) -> StoryResult<StoryRecord> {
        self.check_slot(slot_index)?;
        let mut st = self.state.write().await;
        let rec = st.record(slot_index)?;
        if rec.is_draft() {
            return Err(StoryError::NotFound(format!("slot {slot_index} holds an unsaved draft")));
        }
        let rec = rec.clone();
        st.current_index = Some(slot_index);
        Ok(rec)
    }

    pub async fn clear_selection(&self) {
        self.state.write().await.current_index = None;
    }

    // --- Authoring ---

    /// Put a fresh draft into an empty (or draft) slot and select it. Nothing is written.
    #[instrument(level = "info", target = "repository", skip(self))]
    pub async fn create_draft(&self, slot_index: usize) -> StoryResult<StoryRecord> {
        self.check_slot(slot_index)?;
        let mut st = self.state.write().await;
        if st.slots[slot_index].as_ref().is_some_and(StoryRecord::is_persisted) {
            return Err(StoryError::SlotOccupied(slot_index));
        }
        let draft = StoryRecord::draft(slot_index);
        st.slots[slot_index] = Some(draft.clone());
        st.current_index = Some(slot_index);
        debug!(target: "repository", owner = %st.owner, slot = slot_index, "Draft created");
        Ok(draft)
    }

    /// Apply an edit in memory. Durable only after `commit_story` or `save_local`.
    pub async fn update_story(&self, slot_index: usize, edit: StoryEdit) -> StoryResult<StoryRecord> {
        self.check_slot(slot_index)?;
        let mut st = self.state.write().await;
        let rec = st.record_mut(slot_index)?;
        edit.apply(rec);
        Ok(rec.clone())
    }

    /// The teacher's "save": stamp id and timestamps, then write the local file.
    /// This is where a draft becomes a story.
    #[instrument(level = "info", target = "repository", skip(self))]
    pub async fn commit_story(&self, slot_index: usize) -> StoryResult<StoryRecord> {
        self.check_slot(slot_index)?;
        let rec = {
            let mut st = self.state.write().await;
            let rec = st.record_mut(slot_index)?;
            stamp(rec, true);
            rec.clone()
        };
        self.save_local().await?;
        info!(target: "repository", story_id = %rec.id, slot = slot_index, "Story saved locally");
        Ok(rec)
    }

    /// Write the whole slot array to the owner's local file. Never touches the remote store.
    #[instrument(level = "debug", target = "repository", skip(self))]
    pub async fn save_local(&self) -> StoryResult<()> {
        let owner = self.owner_scope().await;
        self.persist(&owner, false).await?;
        self.emit(RepositoryEvent::Saved { owner });
        Ok(())
    }

    /// Snapshot and write under one lock so writes land in snapshot order.
    async fn persist(&self, owner: &OwnerScope, with_published: bool) -> StoryResult<()> {
        let _serial = self.save_lock.lock().await;
        let (slots, published) = {
            let st = self.state.read().await;
            if &st.owner != owner {
                return Err(StoryError::NotReady(format!("owner scope moved from {owner} to {}", st.owner)));
            }
            (st.slots.clone(), with_published.then(|| st.published.clone()))
        };
        self.local.write_slots(owner, &slots).await?;
        if let Some(published) = published {
            self.local.write_published(owner, &published).await?;
        }
        Ok(())
    }

    /// Store an image for a slot: local backup always, upload when possible.
    #[instrument(level = "info", target = "repository", skip(self, bytes), fields(bytes = bytes.len()))]
    pub async fn attach_asset(&self, slot_index: usize, kind: AssetKind, bytes: &[u8]) -> StoryResult<AssetReference> {
        self.check_slot(slot_index)?;
        let owner = {
            let st = self.state.read().await;
            st.record(slot_index)?;
            st.owner.clone()
        };
        let reference = self.assets.store(bytes, &owner, slot_index, kind).await?;
        {
            let mut st = self.state.write().await;
            if st.owner != owner {
                return Err(StoryError::NotReady("owner scope changed while storing asset".into()));
            }
            st.record_mut(slot_index)?.set_asset(kind, Some(reference.clone()));
        }
        self.persist(&owner, false).await?;
        Ok(reference)
    }

    /// Bytes for one image of a slot; `None` when the slot has no such image or it is unavailable.
    pub async fn resolve_asset(&self, slot_index: usize, kind: AssetKind) -> StoryResult<Option<Vec<u8>>> {
        self.check_slot(slot_index)?;
        let reference = {
            let st = self.state.read().await;
            st.record(slot_index)?.asset(kind).cloned()
        };
        match reference {
            Some(r) => Ok(self.assets.resolve(&r).await),
            None => Ok(None),
        }
    }

    // --- Remote publish ---

    /// Save locally, then write the story and fully replace its dialogue and quiz
    /// sub-collections remotely. Remote problems come back as `LocalOnly`; only local
    /// failures are errors.
    #[instrument(level = "info", target = "repository", skip(self))]
    pub async fn publish_to_remote(&self, slot_index: usize) -> StoryResult<PublishOutcome> {
        self.check_slot(slot_index)?;
        let (owner, record) = {
            let mut st = self.state.write().await;
            let owner = st.owner.clone();
            let rec = st.record_mut(slot_index)?;
            stamp(rec, false);
            (owner, rec.clone())
        };
        self.persist(&owner, false).await?;

        let Some(documents) = self.documents.clone() else {
            return Ok(local_only("no remote backend configured"));
        };
        if !self.identity.can_publish() {
            return Ok(local_only("no signed-in teacher session"));
        }

        match self.write_remote(documents.as_ref(), &owner, &record).await {
            Ok(()) => {
                info!(target: "repository", %owner, story_id = %record.id, "Story published");
                self.emit(RepositoryEvent::Published { owner, story_id: record.id.clone() });
                Ok(PublishOutcome::Published { story_id: record.id })
            }
            Err(e) => {
                warn!(target: "repository", %owner, story_id = %record.id, error = %e, "Publish failed; story kept locally");
                Ok(local_only(format!("saved locally, cloud save failed: {e}")))
            }
        }
    }

    async fn write_remote(&self, documents: &dyn DocumentStore, owner: &OwnerScope, record: &StoryRecord) -> StoryResult<()> {
        let existing = documents.get(STORIES_COLLECTION, &record.id).await?;
        // The identity may have switched while we were waiting on the remote.
        if &self.owner_scope().await != owner {
            return Err(StoryError::NotReady("owner scope changed before publish".into()));
        }
        if let Some(existing) = existing {
            if existing.str_field(OWNER_FIELD) != Some(owner.as_str()) {
                return Err(StoryError::PermissionDenied(format!("story {} belongs to another owner", record.id)));
            }
        }
        documents.set(STORIES_COLLECTION, &record.id, encoded(story_fields(record, owner))?).await?;

        // Delete-all-then-insert so a shortened list leaves nothing behind.
        for sub in SubCollection::ALL {
            let path = sub.path(&record.id);
            for doc in documents.list(&path).await? {
                documents.delete(&path, &doc.id).await?;
            }
        }
        let dialogues = SubCollection::Dialogues.path(&record.id);
        for (i, line) in record.dialogues.iter().enumerate() {
            documents.add(&dialogues, encoded(dialogue_fields(i, line))?).await?;
        }
        let questions = SubCollection::Questions.path(&record.id);
        for (i, q) in record.quiz.iter().enumerate() {
            documents.add(&questions, encoded(question_fields(i, q))?).await?;
        }
        Ok(())
    }

    // --- Delete ---

    /// Soft-delete the story in `slot_index`. Remote copies are removed only after the remote
    /// owner field matches the current scope; a mismatch aborts with no effects.
    #[instrument(level = "info", target = "repository", skip(self))]
    pub async fn delete_story(&self, slot_index: usize) -> StoryResult<()> {
        self.check_slot(slot_index)?;
        let (owner, record) = {
            let st = self.state.read().await;
            (st.owner.clone(), st.record(slot_index)?.clone())
        };

        let remote = self.documents.clone().filter(|_| record.is_persisted() && !record.id.is_empty());
        if let Some(documents) = remote {
            match documents.get(STORIES_COLLECTION, &record.id).await {
                Ok(Some(doc)) => {
                    if self.owner_scope().await != owner {
                        return Err(StoryError::NotReady("owner scope changed during delete".into()));
                    }
                    if doc.str_field(OWNER_FIELD) != Some(owner.as_str()) {
                        warn!(target: "repository", %owner, story_id = %record.id, found = ?doc.str_field(OWNER_FIELD), "Refusing to delete another owner's story");
                        return Err(StoryError::PermissionDenied(format!(
                            "story {} is not owned by {owner}",
                            record.id
                        )));
                    }
                    self.delete_remote(documents.as_ref(), &record.id).await?;
                }
                Ok(None) => {
                    debug!(target: "repository", story_id = %record.id, "No remote copy; deleting locally");
                }
                Err(e) if record.is_published() => {
                    warn!(target: "repository", story_id = %record.id, error = %e, "Cannot verify ownership of published story");
                    return Err(e.into());
                }
                Err(e) => {
                    warn!(target: "repository", story_id = %record.id, error = %e, "Remote unreachable; deleting unpublished story locally");
                }
            }
        }

        // Orphaned files are tolerated; a failed asset delete never blocks the record delete.
        for (kind, reference) in record.assets() {
            if let Err(e) = self.assets.delete(reference, &owner).await {
                warn!(target: "repository", slot = slot_index, %kind, error = %e, "Asset delete failed");
            }
        }

        {
            let mut st = self.state.write().await;
            if st.owner != owner {
                return Err(StoryError::NotReady("owner scope changed during delete".into()));
            }
            if st.slots[slot_index].as_ref().map(|r| r.id.as_str()) != Some(record.id.as_str()) {
                return Err(StoryError::NotFound(format!("slot {slot_index} changed during delete")));
            }
            st.slots[slot_index] = None;
            if !record.id.is_empty() {
                st.published.retain(|p| p.story_id != record.id);
            }
            if st.current_index == Some(slot_index) {
                st.current_index = None;
            }
        }
        self.persist(&owner, true).await?;

        info!(target: "repository", %owner, slot = slot_index, story_id = %record.id, "Story deleted");
        self.emit(RepositoryEvent::Deleted { owner, slot_index });
        Ok(())
    }

    async fn delete_remote(&self, documents: &dyn DocumentStore, story_id: &str) -> StoryResult<()> {
        documents.delete(STORIES_COLLECTION, story_id).await?;
        for sub in SubCollection::ALL {
            let path = sub.path(story_id);
            match documents.list(&path).await {
                Ok(docs) => {
                    for doc in docs {
                        if let Err(e) = documents.delete(&path, &doc.id).await {
                            warn!(target: "repository", %path, doc_id = %doc.id, error = %e, "Sub-document delete failed");
                        }
                    }
                }
                Err(e) => warn!(target: "repository", %path, error = %e, "Sub-collection listing failed"),
            }
        }
        Ok(())
    }

    // --- Class assignment ---

    /// Make a saved story available to a class. Re-assigning updates the existing entry.
    #[instrument(level = "info", target = "repository", skip(self))]
    pub async fn assign_to_class(
        &self,
        slot_index: usize,
        class_code: &str,
        class_name: &str,
    ) -> StoryResult<PublishedStoryRecord> {
        self.check_slot(slot_index)?;
        let class_code = class_code.trim();
        if class_code.is_empty() {
            return Err(StoryError::Invalid("class code is required".into()));
        }
        let (owner, entry) = {
            let mut st = self.state.write().await;
            let owner = st.owner.clone();
            let rec = st.record_mut(slot_index)?;
            if rec.is_draft() {
                return Err(StoryError::NotReady("save the story before assigning it to a class".into()));
            }
            stamp(rec, false);
            rec.assigned_classes.insert(class_code.to_string());
            let (story_id, title) = (rec.id.clone(), rec.title.clone());

            let found = st.published.iter().position(|p| p.story_id == story_id && p.class_code == class_code);
            let entry = match found {
                Some(i) => {
                    let existing = &mut st.published[i];
                    existing.title = title;
                    existing.class_name = class_name.to_string();
                    existing.clone()
                }
                None => {
                    let entry = PublishedStoryRecord {
                        story_id,
                        title,
                        class_code: class_code.to_string(),
                        class_name: class_name.to_string(),
                        publish_date: now_rfc3339(),
                    };
                    st.published.push(entry.clone());
                    entry
                }
            };
            (owner, entry)
        };
        self.persist(&owner, true).await?;
        Ok(entry)
    }

    /// Withdraw a story from a class. Returns whether it was assigned.
    pub async fn unassign_from_class(&self, slot_index: usize, class_code: &str) -> StoryResult<bool> {
        self.check_slot(slot_index)?;
        let (owner, removed) = {
            let mut st = self.state.write().await;
            let owner = st.owner.clone();
            let rec = st.record_mut(slot_index)?;
            let removed = rec.assigned_classes.remove(class_code);
            let story_id = rec.id.clone();
            st.published.retain(|p| !(p.story_id == story_id && p.class_code == class_code));
            (owner, removed)
        };
        if removed {
            self.persist(&owner, true).await?;
        }
        Ok(removed)
    }

    // --- Migration support ---

    /// Swap one asset reference if the slot still holds the same story and reference.
    pub(crate) async fn replace_asset(
        &self,
        owner: &OwnerScope,
        slot_index: usize,
        story_id: &str,
        kind: AssetKind,
        expected: &AssetReference,
        replacement: AssetReference,
    ) -> bool {
        let mut st = self.state.write().await;
        if &st.owner != owner {
            return false;
        }
        match st.slots.get_mut(slot_index).and_then(Option::as_mut) {
            Some(rec) if rec.id == story_id && rec.asset(kind) == Some(expected) => {
                rec.set_asset(kind, Some(replacement));
                true
            }
            _ => false,
        }
    }
}
