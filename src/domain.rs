//! Domain models: story records, their dialogue/quiz content, asset references and owner scope.

use std::{collections::BTreeSet, fmt, str::FromStr};

use reqwest::Url;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{StoryError, StoryResult};

/// Partition key under which all stories, slot files and asset paths are namespaced.
/// The id is used verbatim as a directory name, so it is always a single path segment.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OwnerScope(String);

impl OwnerScope {
  pub const DEFAULT: &'static str = "default";

  /// Blank ids collapse to the `"default"` sentinel. Ids that could leave the owner's
  /// directory (separators, `.`/`..`, drive markers, control characters) are rejected.
  pub fn new(id: impl Into<String>) -> StoryResult<Self> {
    let id = id.into();
    let trimmed = id.trim();
    if trimmed.is_empty() {
      return Ok(Self::default());
    }
    let unsafe_segment = trimmed == "."
      || trimmed == ".."
      || trimmed.contains(['/', '\\', ':'])
      || trimmed.chars().any(char::is_control);
    if unsafe_segment {
      return Err(StoryError::Invalid(format!("owner id {trimmed:?} cannot be used as a storage directory")));
    }
    Ok(Self(trimmed.to_string()))
  }

  pub fn as_str(&self) -> &str { &self.0 }

  pub fn is_default(&self) -> bool { self.0 == Self::DEFAULT }
}

impl Default for OwnerScope {
  fn default() -> Self { Self(Self::DEFAULT.to_string()) }
}

impl fmt::Display for OwnerScope {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl TryFrom<String> for OwnerScope {
  type Error = StoryError;

  fn try_from(value: String) -> Result<Self, Self::Error> { Self::new(value) }
}

impl From<OwnerScope> for String {
  fn from(value: OwnerScope) -> Self { value.0 }
}

/// The three image slots a story carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
  Background,
  Char1,
  Char2,
}

impl AssetKind {
  pub const ALL: [AssetKind; 3] = [AssetKind::Background, AssetKind::Char1, AssetKind::Char2];

  /// File stem used in the canonical scoped path.
  pub fn file_stem(self) -> &'static str {
    match self {
      AssetKind::Background => "background",
      AssetKind::Char1 => "char1",
      AssetKind::Char2 => "char2",
    }
  }
}

impl fmt::Display for AssetKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.file_stem()) }
}

impl FromStr for AssetKind {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "background" => Ok(AssetKind::Background),
      "char1" | "character1" => Ok(AssetKind::Char1),
      "char2" | "character2" => Ok(AssetKind::Char2),
      other => Err(format!("unknown asset kind '{other}'")),
    }
  }
}

/// Where an image lives. Decided once at parse time; callers never re-sniff the string.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AssetReference {
  /// Path under the storage root. Legacy absolute paths are carried here until migrated.
  LocalRelative(String),
  /// Object-storage URL, authoritative once an upload succeeded.
  RemoteUrl(Url),
}

impl AssetReference {
  /// Parse a stored reference. Empty strings mean "no asset".
  pub fn parse(raw: &str) -> Option<Self> {
    let raw = raw.trim();
    if raw.is_empty() {
      return None;
    }
    let lower = raw.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
      if let Ok(url) = Url::parse(raw) {
        if url.host_str().is_some() {
          return Some(Self::RemoteUrl(url));
        }
      }
    }
    Some(Self::LocalRelative(raw.to_string()))
  }

  pub fn as_str(&self) -> &str {
    match self {
      Self::LocalRelative(p) => p,
      Self::RemoteUrl(u) => u.as_str(),
    }
  }

  pub fn is_remote(&self) -> bool { matches!(self, Self::RemoteUrl(_)) }
}

impl TryFrom<String> for AssetReference {
  type Error = String;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    Self::parse(&value).ok_or_else(|| "empty asset reference".to_string())
  }
}

impl From<AssetReference> for String {
  fn from(value: AssetReference) -> Self { value.as_str().to_string() }
}

impl fmt::Display for AssetReference {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Older slot files store missing assets as `""` rather than `null`.
fn de_optional_ref<'de, D>(deserializer: D) -> Result<Option<AssetReference>, D::Error>
where
  D: Deserializer<'de>,
{
  let raw: Option<String> = Option::deserialize(deserializer)?;
  Ok(raw.as_deref().and_then(AssetReference::parse))
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogueLine {
  #[serde(default)] pub speaker: String,
  #[serde(default)] pub text: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizQuestion {
  #[serde(default)] pub question: String,
  #[serde(default)] pub choices: Vec<String>,
  #[serde(default)] pub correct_index: usize,
}

/// One authored story. An empty `created_at` marks a draft.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryRecord {
  #[serde(default)] pub id: String,
  pub slot_index: usize,
  #[serde(default)] pub title: String,
  #[serde(default)] pub description: String,

  #[serde(default, deserialize_with = "de_optional_ref")]
  pub background_ref: Option<AssetReference>,
  #[serde(default, deserialize_with = "de_optional_ref")]
  pub character1_ref: Option<AssetReference>,
  #[serde(default, deserialize_with = "de_optional_ref")]
  pub character2_ref: Option<AssetReference>,

  #[serde(default)] pub dialogues: Vec<DialogueLine>,
  #[serde(default)] pub quiz: Vec<QuizQuestion>,

  #[serde(default)] pub created_at: String,
  #[serde(default)] pub updated_at: String,
  #[serde(default)] pub assigned_classes: BTreeSet<String>,
}

impl StoryRecord {
  /// Fresh in-memory draft bound to a slot.
  pub fn draft(slot_index: usize) -> Self {
    Self { slot_index, ..Default::default() }
  }

  pub fn is_persisted(&self) -> bool { !self.created_at.trim().is_empty() }

  pub fn is_draft(&self) -> bool { !self.is_persisted() }

  pub fn is_published(&self) -> bool { !self.assigned_classes.is_empty() }

  pub fn asset(&self, kind: AssetKind) -> Option<&AssetReference> {
    match kind {
      AssetKind::Background => self.background_ref.as_ref(),
      AssetKind::Char1 => self.character1_ref.as_ref(),
      AssetKind::Char2 => self.character2_ref.as_ref(),
    }
  }

  pub fn set_asset(&mut self, kind: AssetKind, reference: Option<AssetReference>) {
    match kind {
      AssetKind::Background => self.background_ref = reference,
      AssetKind::Char1 => self.character1_ref = reference,
      AssetKind::Char2 => self.character2_ref = reference,
    }
  }

  /// Present references, in background/char1/char2 order.
  pub fn assets(&self) -> impl Iterator<Item = (AssetKind, &AssetReference)> {
    AssetKind::ALL.into_iter().filter_map(move |k| self.asset(k).map(|r| (k, r)))
  }
}

/// Partial edit applied by `StoryRepository::update_story`. `None` leaves a field untouched.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryEdit {
  #[serde(default)] pub title: Option<String>,
  #[serde(default)] pub description: Option<String>,
  #[serde(default)] pub dialogues: Option<Vec<DialogueLine>>,
  #[serde(default)] pub quiz: Option<Vec<QuizQuestion>>,
}

impl StoryEdit {
  pub fn apply(self, record: &mut StoryRecord) {
    if let Some(t) = self.title { record.title = t; }
    if let Some(d) = self.description { record.description = d; }
    if let Some(d) = self.dialogues { record.dialogues = d; }
    if let Some(q) = self.quiz { record.quiz = q; }
  }
}

/// A story made available to one class. Unique per `(story_id, class_code)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedStoryRecord {
  pub story_id: String,
  pub title: String,
  pub class_code: String,
  #[serde(default)] pub class_name: String,
  #[serde(default)] pub publish_date: String,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parse_distinguishes_remote_and_local() {
    let remote = AssetReference::parse("https://x.s3.amazonaws.com/images/a/story_0/background.png");
    assert!(matches!(remote, Some(AssetReference::RemoteUrl(_))));

    let local = AssetReference::parse("teacherA/story_0/background.png");
    assert_eq!(local, Some(AssetReference::LocalRelative("teacherA/story_0/background.png".into())));

    assert_eq!(AssetReference::parse("   "), None);
  }

  #[test]
  fn empty_string_refs_load_as_none() {
    let json = r#"{"slotIndex":2,"backgroundRef":"","character1Ref":null,"character2Ref":"t/story_2/char2.png"}"#;
    let rec: StoryRecord = serde_json::from_str(json).unwrap();
    assert_eq!(rec.slot_index, 2);
    assert!(rec.background_ref.is_none());
    assert!(rec.character1_ref.is_none());
    assert!(rec.character2_ref.is_some());
    assert!(rec.is_draft());
  }

  #[test]
  fn blank_owner_falls_back_to_default() {
    assert!(OwnerScope::new("  ").unwrap().is_default());
    assert_eq!(OwnerScope::new(" t-1 ").unwrap().as_str(), "t-1");
  }

  #[test]
  fn owner_ids_that_leave_their_directory_are_rejected() {
    for bad in ["../escaped", "..", ".", "a/b", "a\\b", "C:", "x\0y"] {
      assert!(matches!(OwnerScope::new(bad), Err(StoryError::Invalid(_))), "{bad:?} accepted");
    }
    assert_eq!(OwnerScope::new("..hidden").unwrap().as_str(), "..hidden");
    assert!(serde_json::from_str::<OwnerScope>(r#""../x""#).is_err());
  }

  #[test]
  fn edit_only_touches_given_fields() {
    let mut rec = StoryRecord::draft(0);
    rec.description = "keep".into();
    StoryEdit { title: Some("New".into()), ..Default::default() }.apply(&mut rec);
    assert_eq!(rec.title, "New");
    assert_eq!(rec.description, "keep");
  }
}
