//! Asset resolution: turn an `AssetReference` into bytes, filling the local cache on remote misses.
//!
//! Layout under the storage root:
//!   {owner}/story_{slot}/{background|char1|char2}.png
//!
//! Remote URLs map onto the same layout via `cache_path_for_url`, so an uploaded asset and its
//! local backup share one file. Concurrent resolves of the same URL may both download; the
//! second overwrite is identical and harmless.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::domain::{AssetKind, AssetReference, OwnerScope};
use crate::error::{StoryError, StoryResult};
use crate::remote::ObjectStorage;
use crate::util::{cache_path_for_url, is_scoped_relative, owner_segment, resolve_under, scoped_asset_path, upload_key, write_atomic};

#[derive(Clone)]
pub struct AssetCacheResolver {
    storage_root: PathBuf,
    objects: Option<Arc<dyn ObjectStorage>>,
}

impl AssetCacheResolver {
    pub fn new(storage_root: impl Into<PathBuf>, objects: Option<Arc<dyn ObjectStorage>>) -> Self {
        Self { storage_root: storage_root.into(), objects }
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    pub fn has_remote(&self) -> bool {
        self.objects.is_some()
    }

    /// Where the bytes for `reference` live (or would be cached) on disk.
    pub fn local_path(&self, reference: &AssetReference) -> Option<PathBuf> {
        match reference {
            AssetReference::LocalRelative(p) => Some(resolve_under(&self.storage_root, p)),
            AssetReference::RemoteUrl(url) => {
                cache_path_for_url(url).map(|rel| self.storage_root.join(rel))
            }
        }
    }

    /// Resolve a reference to bytes. `None` means the asset is unavailable; the reason is logged.
    #[instrument(level = "debug", target = "assets", skip(self), fields(reference = %reference))]
    pub async fn resolve(&self, reference: &AssetReference) -> Option<Vec<u8>> {
        match reference {
            AssetReference::LocalRelative(rel) => {
                let path = resolve_under(&self.storage_root, rel);
                match tokio::fs::read(&path).await {
                    Ok(bytes) => Some(bytes),
                    Err(e) => {
                        warn!(target: "assets", path = %path.display(), error = %e, "Local asset unavailable");
                        None
                    }
                }
            }
            AssetReference::RemoteUrl(url) => {
                let cache = cache_path_for_url(url).map(|rel| self.storage_root.join(rel));
                if let Some(path) = &cache {
                    match tokio::fs::read(path).await {
                        Ok(bytes) => {
                            debug!(target: "assets", path = %path.display(), bytes = bytes.len(), "Cache hit");
                            return Some(bytes);
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => {
                            warn!(target: "assets", path = %path.display(), error = %e, "Cache read failed; downloading");
                        }
                    }
                } else {
                    warn!(target: "assets", %url, "URL has no usable cache path; result will not be cached");
                }

                let Some(objects) = &self.objects else {
                    warn!(target: "assets", %url, "Cache miss and no object storage configured");
                    return None;
                };
                let bytes = match objects.download(url).await {
                    Ok(b) => b,
                    Err(e) => {
                        warn!(target: "assets", %url, error = %e, "Download failed");
                        return None;
                    }
                };

                // Cache fill completes before returning so the next resolve is a hit.
                if let Some(path) = &cache {
                    match write_atomic(path, &bytes).await {
                        Ok(()) => info!(target: "assets", path = %path.display(), bytes = bytes.len(), "Cached download"),
                        Err(e) => warn!(target: "assets", error = %e, "Cache fill failed"),
                    }
                }
                Some(bytes)
            }
        }
    }

    /// Non-fetching existence check. Remote URLs are assumed present unless proven otherwise.
    pub fn exists(&self, reference: &AssetReference) -> bool {
        match reference {
            AssetReference::LocalRelative(rel) => resolve_under(&self.storage_root, rel).is_file(),
            AssetReference::RemoteUrl(url) => {
                if !self.local_path(reference).map(|p| p.is_file()).unwrap_or(false) {
                    debug!(target: "assets", %url, "No cached copy; assuming remote object exists");
                }
                true
            }
        }
    }

    /// Write bytes to the canonical scoped path and return the relative reference.
    #[instrument(level = "debug", target = "assets", skip_all, fields(bytes = bytes.len(), %owner, slot = slot_index, %kind))]
    pub async fn save(
        &self,
        bytes: &[u8],
        owner: &OwnerScope,
        slot_index: usize,
        kind: AssetKind,
    ) -> StoryResult<AssetReference> {
        let rel = scoped_asset_path(owner, slot_index, kind);
        write_atomic(&self.storage_root.join(&rel), bytes).await?;
        Ok(AssetReference::LocalRelative(rel))
    }

    /// Local backup plus upload, run side by side. The remote URL wins when the upload succeeds;
    /// otherwise the local backup is the reference of last resort.
    #[instrument(level = "info", target = "assets", skip_all, fields(bytes = bytes.len(), %owner, slot = slot_index, %kind))]
    pub async fn store(
        &self,
        bytes: &[u8],
        owner: &OwnerScope,
        slot_index: usize,
        kind: AssetKind,
    ) -> StoryResult<AssetReference> {
        let Some(objects) = &self.objects else {
            return self.save(bytes, owner, slot_index, kind).await;
        };
        let key = upload_key(owner, slot_index, kind);
        let (local, remote) = tokio::join!(
            self.save(bytes, owner, slot_index, kind),
            objects.upload(bytes, &key),
        );
        match (local, remote) {
            (local, Ok(url)) => {
                if let Err(e) = local {
                    warn!(target: "assets", error = %e, "Local backup failed; keeping uploaded copy");
                }
                info!(target: "assets", %url, "Uploaded asset");
                Ok(AssetReference::RemoteUrl(url))
            }
            (Ok(reference), Err(e)) => {
                warn!(target: "assets", %key, error = %e, "Upload failed; using local backup");
                Ok(reference)
            }
            (Err(local_err), Err(e)) => {
                warn!(target: "assets", %key, error = %e, "Upload failed and local backup failed");
                Err(local_err)
            }
        }
    }

    /// Remove the local file behind a reference. For remote URLs only the cached copy goes;
    /// the cloud object is owned by the upload side. Only files inside `owner`'s directory are
    /// touched. Returns whether a file was removed.
    #[instrument(level = "debug", target = "assets", skip(self), fields(reference = %reference, %owner))]
    pub async fn delete(&self, reference: &AssetReference, owner: &OwnerScope) -> StoryResult<bool> {
        let rel = match reference {
            AssetReference::LocalRelative(rel) if is_scoped_relative(rel, &self.storage_root) => rel.clone(),
            AssetReference::LocalRelative(rel) => {
                warn!(target: "assets", path = %rel, "Refusing to delete a path outside the storage root");
                return Ok(false);
            }
            AssetReference::RemoteUrl(url) => match cache_path_for_url(url) {
                Some(rel) => rel,
                None => return Ok(false),
            },
        };
        if owner_segment(&rel) != Some(owner.as_str()) {
            warn!(target: "assets", path = %rel, "Refusing to delete a file outside the owner's directory");
            return Ok(false);
        }
        let path = self.storage_root.join(&rel);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(target: "assets", path = %path.display(), "Deleted asset file");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoryError::io(path, e)),
        }
    }
}
