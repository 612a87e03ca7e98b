//! Rewrites legacy absolute asset paths into the scoped-relative layout and audits the result.
//!
//! Files are copied, never moved: a re-run finds the relative reference and does nothing, and
//! the legacy file stays behind as a backup. Remote URLs are out of scope for migration.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::domain::{AssetKind, AssetReference};
use crate::error::{StoryError, StoryResult};
use crate::repository::StoryRepository;
use crate::util::{is_scoped_relative, scoped_asset_path};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigratedFile {
    pub story_id: String,
    pub slot_index: usize,
    pub kind: AssetKind,
    pub from: String,
    pub to: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationResult {
    pub stories_processed: usize,
    pub paths_migrated: usize,
    pub already_migrated: usize,
    /// Legacy references whose file is gone. Left as they are; not an error.
    pub skipped_missing: usize,
    pub errors: Vec<String>,
    pub migrated_files: Vec<MigratedFile>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub relative_present: usize,
    pub relative_missing: usize,
    pub still_absolute: usize,
    pub remote: usize,
}

impl ValidationReport {
    pub fn is_complete(&self) -> bool {
        self.still_absolute == 0
    }
}

pub struct PathMigrationTool {
    repo: Arc<StoryRepository>,
}

impl PathMigrationTool {
    pub fn new(repo: Arc<StoryRepository>) -> Self {
        Self { repo }
    }

    async fn ensure_loaded(&self) -> StoryResult<()> {
        if !self.repo.is_loaded().await {
            self.repo.load_all().await?;
        }
        Ok(())
    }

    /// Copy every legacy file into the scoped layout and point its record at the copy,
    /// then save the slot array.
    #[instrument(level = "info", target = "migration", skip(self))]
    pub async fn migrate_all(&self) -> StoryResult<MigrationResult> {
        self.ensure_loaded().await?;
        let owner = self.repo.owner_scope().await;
        let root = self.repo.assets().storage_root().to_path_buf();
        let mut result = MigrationResult::default();

        for record in self.repo.slots().await.into_iter().flatten() {
            result.stories_processed += 1;
            let refs: Vec<(AssetKind, AssetReference)> =
                record.assets().map(|(k, r)| (k, r.clone())).collect();

            for (kind, reference) in refs {
                let AssetReference::LocalRelative(legacy) = &reference else {
                    continue;
                };
                if is_scoped_relative(legacy, &root) {
                    result.already_migrated += 1;
                    continue;
                }
                let source = PathBuf::from(legacy);
                if !is_file(&source).await {
                    warn!(target: "migration", story_id = %record.id, %kind, path = %legacy, "Legacy file missing; leaving reference as is");
                    result.skipped_missing += 1;
                    continue;
                }

                let target = scoped_asset_path(&owner, record.slot_index, kind);
                if let Err(e) = copy_if_distinct(&source, &root.join(&target)).await {
                    warn!(target: "migration", story_id = %record.id, %kind, error = %e, "Copy failed");
                    result.errors.push(format!("{} {kind}: {e}", record.id));
                    continue;
                }

                let swapped = self
                    .repo
                    .replace_asset(&owner, record.slot_index, &record.id, kind, &reference, AssetReference::LocalRelative(target.clone()))
                    .await;
                if !swapped {
                    result.errors.push(format!("{} {kind}: story changed during migration", record.id));
                    continue;
                }
                result.paths_migrated += 1;
                result.migrated_files.push(MigratedFile {
                    story_id: record.id.clone(),
                    slot_index: record.slot_index,
                    kind,
                    from: legacy.clone(),
                    to: target,
                });
            }
        }

        if self.repo.owner_scope().await != owner {
            return Err(StoryError::NotReady("owner scope changed during migration".into()));
        }
        self.repo.save_local().await?;

        info!(
            target: "migration",
            %owner,
            stories = result.stories_processed,
            migrated = result.paths_migrated,
            already = result.already_migrated,
            missing = result.skipped_missing,
            errors = result.errors.len(),
            "Migration finished"
        );
        Ok(result)
    }

    /// Classify every reference without changing anything.
    #[instrument(level = "debug", target = "migration", skip(self))]
    pub async fn validate_migration(&self) -> StoryResult<ValidationReport> {
        self.ensure_loaded().await?;
        let root = self.repo.assets().storage_root().to_path_buf();
        let mut report = ValidationReport::default();
        for record in self.repo.slots().await.into_iter().flatten() {
            for (_, reference) in record.assets() {
                match reference {
                    AssetReference::RemoteUrl(_) => report.remote += 1,
                    AssetReference::LocalRelative(p) if !is_scoped_relative(p, &root) => report.still_absolute += 1,
                    AssetReference::LocalRelative(_) if self.repo.assets().exists(reference) => report.relative_present += 1,
                    AssetReference::LocalRelative(_) => report.relative_missing += 1,
                }
            }
        }
        if !report.is_complete() {
            warn!(target: "migration", still_absolute = report.still_absolute, "Legacy paths remain");
        }
        Ok(report)
    }

    /// Cheap pre-check: does any local reference still use the legacy form?
    pub async fn needs_migration(&self) -> StoryResult<bool> {
        self.ensure_loaded().await?;
        let root = self.repo.assets().storage_root().to_path_buf();
        Ok(self.repo.slots().await.iter().flatten().any(|rec| {
            rec.assets().any(|(_, r)| matches!(r, AssetReference::LocalRelative(p) if !is_scoped_relative(p, &root)))
        }))
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path).await.map(|m| m.is_file()).unwrap_or(false)
}

/// Copy `from` to `to`, creating parents. A source that already is the target is left alone.
async fn copy_if_distinct(from: &Path, to: &Path) -> StoryResult<()> {
    if let (Ok(a), Ok(b)) = (tokio::fs::canonicalize(from).await, tokio::fs::canonicalize(to).await) {
        if a == b {
            return Ok(());
        }
    }
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| StoryError::io(parent, e))?;
    }
    tokio::fs::copy(from, to).await.map_err(|e| StoryError::io(from, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::AssetCacheResolver;
    use crate::domain::{OwnerScope, StoryRecord};
    use crate::identity::{IdentityProvider, SessionIdentity};
    use crate::repository::local::LocalStore;
    use tempfile::TempDir;

    const OWNER: &str = "teacherA";

    fn record(slot: usize) -> StoryRecord {
        StoryRecord {
            id: format!("story-{slot}"),
            slot_index: slot,
            title: "Legacy".into(),
            created_at: "2023-05-01T00:00:00Z".into(),
            ..Default::default()
        }
    }

    /// Seed the owner's slot file as an older build would have left it, then load it.
    async fn tool_with(root: &TempDir, records: Vec<StoryRecord>) -> (Arc<StoryRepository>, PathMigrationTool) {
        let owner = OwnerScope::new(OWNER).unwrap();
        let mut slots = vec![None; 6];
        for rec in records {
            let i = rec.slot_index;
            slots[i] = Some(rec);
        }
        LocalStore::new(root.path()).write_slots(&owner, &slots).await.unwrap();

        let identity: Arc<dyn IdentityProvider> = Arc::new(SessionIdentity::new());
        let repo = Arc::new(StoryRepository::new(6, AssetCacheResolver::new(root.path(), None), identity));
        repo.set_owner_scope(owner).await.unwrap();
        (repo.clone(), PathMigrationTool::new(repo))
    }

    fn legacy_file(dir: &TempDir, name: &str, bytes: &[u8]) -> String {
        let path = dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn copies_legacy_files_and_converges() {
        let root = TempDir::new().unwrap();
        let legacy_dir = TempDir::new().unwrap();
        let legacy = legacy_file(&legacy_dir, "old_bg.png", b"bg");
        std::fs::create_dir_all(root.path().join("teacherA/story_1")).unwrap();
        std::fs::write(root.path().join("teacherA/story_1/char1.png"), b"c1").unwrap();

        let mut rec = record(1);
        rec.background_ref = Some(AssetReference::LocalRelative(legacy.clone()));
        rec.character1_ref = Some(AssetReference::LocalRelative("teacherA/story_1/char1.png".into()));
        let (repo, tool) = tool_with(&root, vec![rec]).await;

        assert!(tool.needs_migration().await.unwrap());
        let first = tool.migrate_all().await.unwrap();
        assert_eq!(first.stories_processed, 1);
        assert_eq!(first.paths_migrated, 1);
        assert_eq!(first.already_migrated, 1);
        assert!(first.errors.is_empty());
        assert_eq!(first.migrated_files[0].to, "teacherA/story_1/background.png");

        assert_eq!(std::fs::read(root.path().join("teacherA/story_1/background.png")).unwrap(), b"bg");
        assert!(Path::new(&legacy).is_file(), "legacy file is kept");
        assert_eq!(
            repo.story(1).await.unwrap().background_ref,
            Some(AssetReference::LocalRelative("teacherA/story_1/background.png".into()))
        );

        let second = tool.migrate_all().await.unwrap();
        assert_eq!(second.paths_migrated, 0);
        assert_eq!(second.already_migrated, 2);
        assert!(!tool.needs_migration().await.unwrap());

        let report = tool.validate_migration().await.unwrap();
        assert_eq!(report, ValidationReport { relative_present: 2, ..Default::default() });
        assert!(report.is_complete());

        // The rewrite reached the slot file.
        let identity: Arc<dyn IdentityProvider> = Arc::new(SessionIdentity::new());
        let reopened = StoryRepository::new(6, AssetCacheResolver::new(root.path(), None), identity);
        reopened.set_owner_scope(OwnerScope::new(OWNER).unwrap()).await.unwrap();
        assert_eq!(reopened.story(1).await.unwrap().background_ref, repo.story(1).await.unwrap().background_ref);
    }

    #[tokio::test]
    async fn missing_legacy_file_is_skipped_not_failed() {
        let root = TempDir::new().unwrap();
        let gone = root.path().join("nowhere/old.png").to_string_lossy().into_owned();
        let mut rec = record(0);
        rec.character2_ref = Some(AssetReference::LocalRelative(gone.clone()));
        let (repo, tool) = tool_with(&root, vec![rec]).await;

        let result = tool.migrate_all().await.unwrap();
        assert_eq!(result.skipped_missing, 1);
        assert_eq!(result.paths_migrated, 0);
        assert!(result.errors.is_empty());
        assert_eq!(repo.story(0).await.unwrap().character2_ref, Some(AssetReference::LocalRelative(gone)));

        assert!(tool.needs_migration().await.unwrap());
        assert_eq!(tool.validate_migration().await.unwrap().still_absolute, 1);
    }

    #[tokio::test]
    async fn validation_classifies_every_reference() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("teacherA/story_0")).unwrap();
        std::fs::write(root.path().join("teacherA/story_0/background.png"), b"x").unwrap();

        let mut a = record(0);
        a.background_ref = Some(AssetReference::LocalRelative("teacherA/story_0/background.png".into()));
        a.character1_ref = Some(AssetReference::LocalRelative("teacherA/story_0/char1.png".into()));
        a.character2_ref = AssetReference::parse("https://bucket.test/images/teacherA/story_0/char2.png");
        let mut b = record(3);
        b.background_ref = Some(AssetReference::LocalRelative("C:\\Users\\t\\bg.png".into()));
        let (_repo, tool) = tool_with(&root, vec![a, b]).await;

        let report = tool.validate_migration().await.unwrap();
        assert_eq!(
            report,
            ValidationReport { relative_present: 1, relative_missing: 1, still_absolute: 1, remote: 1 }
        );
        assert!(!report.is_complete());
    }

    #[tokio::test]
    async fn empty_repository_needs_nothing() {
        let root = TempDir::new().unwrap();
        let (_repo, tool) = tool_with(&root, vec![]).await;
        assert!(!tool.needs_migration().await.unwrap());
        assert_eq!(tool.migrate_all().await.unwrap(), MigrationResult::default());
    }
}
