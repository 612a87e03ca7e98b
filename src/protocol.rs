//! Public protocol structs for the HTTP API (serde ready).
//! Bodies are camelCase JSON; asset bytes travel base64-encoded.

use serde::{Deserialize, Serialize};

use crate::domain::{AssetKind, OwnerScope, PublishedStoryRecord, StoryRecord};
use crate::migration::ValidationReport;
use crate::repository::LoadStatus;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthOut {
    pub ok: bool,
    pub owner: OwnerScope,
    /// Document store configured.
    pub remote: bool,
    /// Object storage configured.
    pub uploads: bool,
}

/// Sign-in, user switch or sign-out (`userId` absent).
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIn {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    /// Owner id from an explicitly loaded profile; wins over everything else.
    #[serde(default)]
    pub profile_owner_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOut {
    pub owner: OwnerScope,
    pub signed_in: bool,
    pub load: LoadStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoriesOut {
    pub owner: OwnerScope,
    /// Saved stories only.
    pub stories: Vec<StoryRecord>,
    pub slot_count: usize,
    pub current_index: Option<usize>,
    pub slots: Vec<Option<StoryRecord>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionOut {
    pub current_index: Option<usize>,
    pub story: Option<StoryRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetIn {
    pub data_base64: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetRefOut {
    pub kind: AssetKind,
    pub reference: String,
    pub remote: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetOut {
    pub kind: AssetKind,
    pub data_base64: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassIn {
    pub class_code: String,
    #[serde(default)]
    pub class_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnassignOut {
    pub removed: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedOut {
    pub owner: OwnerScope,
    pub published: Vec<PublishedStoryRecord>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationStatusOut {
    pub needs_migration: bool,
    pub report: ValidationReport,
}

#[derive(Debug, Deserialize)]
pub struct PrefIn {
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PrefOut {
    pub value: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorOut {
    pub error: String,
}
