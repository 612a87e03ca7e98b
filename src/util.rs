//! Small helpers shared across modules: scoped path layout, URL → cache path derivation,
//! atomic file writes, timestamps.

use std::path::{Component, Path, PathBuf};

use reqwest::Url;

use crate::domain::{AssetKind, OwnerScope};
use crate::error::{StoryError, StoryResult};

/// Prefix object-storage keys are uploaded under and stripped again when deriving cache paths.
pub const IMAGES_PREFIX: &str = "images/";

/// Canonical relative asset path: `{owner}/story_{slot}/{kind}.png`.
pub fn scoped_asset_path(owner: &OwnerScope, slot_index: usize, kind: AssetKind) -> String {
  format!("{}/story_{}/{}.png", owner.as_str(), slot_index, kind.file_stem())
}

/// Object-storage key for an asset: the scoped path under `images/`.
pub fn upload_key(owner: &OwnerScope, slot_index: usize, kind: AssetKind) -> String {
  format!("{}{}", IMAGES_PREFIX, scoped_asset_path(owner, slot_index, kind))
}

/// Deterministic local cache path for a remote URL.
/// Strips scheme and host, then a leading `/images/` if present, else the leading slash.
/// Returns `None` when nothing usable remains or the path tries to escape the root.
pub fn cache_path_for_url(url: &Url) -> Option<String> {
  let path = url.path();
  let rel = match path.strip_prefix('/').and_then(|p| p.strip_prefix(IMAGES_PREFIX)) {
    Some(rest) => rest,
    None => path.trim_start_matches('/'),
  };
  if rel.is_empty() || rel.ends_with('/') {
    return None;
  }
  if rel.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..") {
    return None;
  }
  Some(rel.to_string())
}

/// True if `path` is already in scoped-relative form: not rooted, no drive or scheme marker,
/// and not prefixed with the storage root itself.
pub fn is_scoped_relative(path: &str, storage_root: &Path) -> bool {
  let p = path.trim();
  if p.is_empty() || p.starts_with('/') || p.starts_with('\\') {
    return false;
  }
  if p.contains("://") || has_drive_marker(p) {
    return false;
  }
  if Path::new(p).is_absolute() {
    return false;
  }
  let root = without_cur_dir(storage_root);
  if !root.as_os_str().is_empty() && without_cur_dir(Path::new(p)).starts_with(&root) {
    return false;
  }
  !Path::new(p).components().any(|c| matches!(c, Component::ParentDir))
}

/// Component-wise copy of `path` with `.` segments dropped, so `./data` and `data` compare equal.
fn without_cur_dir(path: &Path) -> PathBuf {
  path.components().filter(|c| !matches!(c, Component::CurDir)).collect()
}

/// First path segment of a scoped-relative reference, i.e. the owner directory it lives in.
pub fn owner_segment(rel: &str) -> Option<&str> {
  rel.split(['/', '\\']).find(|seg| !seg.is_empty() && *seg != ".")
}

fn has_drive_marker(p: &str) -> bool {
  let b = p.as_bytes();
  b.len() >= 2 && b[0].is_ascii_alphabetic() && b[1] == b':'
}

/// Join a stored reference onto the storage root. Absolute legacy paths replace the root.
pub fn resolve_under(storage_root: &Path, rel: &str) -> PathBuf {
  storage_root.join(rel)
}

/// Write a file through a sibling temp file and rename, creating parent directories.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> StoryResult<()> {
  if let Some(parent) = path.parent() {
    tokio::fs::create_dir_all(parent).await.map_err(|e| StoryError::io(parent, e))?;
  }
  let mut tmp = path.as_os_str().to_owned();
  tmp.push(".tmp");
  let tmp = PathBuf::from(tmp);
  tokio::fs::write(&tmp, bytes).await.map_err(|e| StoryError::io(&tmp, e))?;
  tokio::fs::rename(&tmp, path).await.map_err(|e| StoryError::io(path, e))?;
  Ok(())
}

/// Current time as RFC 3339 (UTC).
pub fn now_rfc3339() -> String {
  chrono::Utc::now().to_rfc3339()
}

/// Log-safe truncation for large strings.
pub fn trunc_for_log(s: &str, max: usize) -> String {
  if s.len() <= max {
    return s.to_string();
  }
  let mut end = max;
  while !s.is_char_boundary(end) { end -= 1; }
  format!("{}… ({} bytes total)", &s[..end], s.len())
}
