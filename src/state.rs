//! Application state: the repository, asset resolver, migration tool, identity and prefs.
//!
//! This module owns:
//!   - the remote collaborators (optional; absent URLs mean local-only)
//!   - the single `StoryRepository` every handler shares
//!   - the in-process session identity and the typed prefs file

use std::sync::Arc;

use tracing::{error, info, instrument};

use crate::assets::AssetCacheResolver;
use crate::config::StoryConfig;
use crate::domain::OwnerScope;
use crate::error::StoryResult;
use crate::identity::{resolve_owner_scope, IdentityProvider, SessionIdentity};
use crate::migration::PathMigrationTool;
use crate::prefs::Prefs;
use crate::remote::{DocumentStore, HttpDocumentStore, HttpObjectStorage, ObjectStorage};
use crate::repository::{LoadStatus, StoryRepository};

#[derive(Clone)]
pub struct AppState {
    pub config: StoryConfig,
    pub repository: Arc<StoryRepository>,
    pub migration: Arc<PathMigrationTool>,
    pub identity: Arc<SessionIdentity>,
    pub prefs: Arc<Prefs>,
}

impl AppState {
    /// Build state from config. Remote collaborators that fail to build are logged and skipped.
    #[instrument(level = "info", skip_all)]
    pub async fn new(config: StoryConfig) -> Self {
        let documents: Option<Arc<dyn DocumentStore>> = match HttpDocumentStore::from_config(&config.remote) {
            Ok(Some(store)) => {
                info!(target: "story_vault", base_url = %store.base_url(), "Document store enabled.");
                Some(Arc::new(store))
            }
            Ok(None) => {
                info!(target: "story_vault", "Document store disabled (no DOCUMENT_STORE_URL). Local-only stories.");
                None
            }
            Err(e) => {
                error!(target: "story_vault", error = %e, "Document store misconfigured; running local-only");
                None
            }
        };
        let objects: Option<Arc<dyn ObjectStorage>> = match HttpObjectStorage::from_config(&config.remote) {
            Ok(Some(storage)) => {
                info!(target: "story_vault", base_url = %storage.base_url(), "Object storage enabled.");
                Some(Arc::new(storage))
            }
            Ok(None) => None,
            Err(e) => {
                error!(target: "story_vault", error = %e, "Object storage misconfigured; assets stay local");
                None
            }
        };

        let identity = Arc::new(SessionIdentity::new());
        let prefs = Arc::new(Prefs::open(&config.storage_root).await);
        let assets = AssetCacheResolver::new(config.storage_root.clone(), objects);

        let provider: Arc<dyn IdentityProvider> = identity.clone();
        let mut repository = StoryRepository::new(config.slot_count, assets, provider).with_prefs(prefs.clone());
        if let Some(documents) = documents {
            repository = repository.with_documents(documents);
        }
        let repository = Arc::new(repository);
        let migration = Arc::new(PathMigrationTool::new(repository.clone()));

        info!(
            target: "story_vault",
            storage_root = %config.storage_root.display(),
            slot_count = config.slot_count,
            "Story repository ready"
        );
        Self { config, repository, migration, identity, prefs }
    }

    /// Re-derive the owner scope and point the repository at it.
    #[instrument(level = "info", skip(self))]
    pub async fn rescope(&self, profile_owner: Option<&str>) -> StoryResult<(OwnerScope, LoadStatus)> {
        let owner = resolve_owner_scope(profile_owner, &self.prefs, self.identity.as_ref()).await?;
        let status = self.repository.set_owner_scope(owner.clone()).await?;
        Ok((owner, status))
    }
}
