//! HTTP endpoint handlers. These are thin wrappers that forward to the repository and the
//! migration tool. Each handler is instrumented and logs its parameters and basic result info.

use axum::{
  extract::{Path, State},
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use base64::{engine::general_purpose::STANDARD as B64, Engine};
use tracing::{error, info, instrument, warn};

use crate::domain::{AssetKind, OwnerScope, StoryEdit};
use crate::prefs::PrefKey;
use crate::error::StoryError;
use crate::protocol::*;
use crate::state::AppState;

impl IntoResponse for StoryError {
  fn into_response(self) -> Response {
    let status = match &self {
      StoryError::NotFound(_) => StatusCode::NOT_FOUND,
      StoryError::PermissionDenied(_) => StatusCode::FORBIDDEN,
      StoryError::NotReady(_) => StatusCode::SERVICE_UNAVAILABLE,
      StoryError::Remote(_) => StatusCode::BAD_GATEWAY,
      StoryError::Invalid(_) | StoryError::InvalidSlot { .. } => StatusCode::BAD_REQUEST,
      StoryError::SlotOccupied(_) => StatusCode::CONFLICT,
      StoryError::Io { .. } | StoryError::Corrupt { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if self.is_local_failure() {
      error!(target: "story_vault", %status, error = %self, "Local storage failure");
    } else if status.is_server_error() {
      warn!(target: "story_vault", %status, error = %self, "Request failed");
    } else {
      warn!(target: "story_vault", %status, error = %self, "Request rejected");
    }
    (status, Json(ErrorOut { error: self.to_string() })).into_response()
  }
}

type ApiResult<T> = Result<T, StoryError>;

fn parse_kind(raw: &str) -> ApiResult<AssetKind> {
  raw.parse::<AssetKind>().map_err(|_| StoryError::Invalid(format!("unknown asset kind: {raw}")))
}

#[instrument(level = "info", skip(state))]
pub async fn http_health(State(state): State<AppState>) -> impl IntoResponse {
  let repo = &state.repository;
  Json(HealthOut {
    ok: true,
    owner: repo.owner_scope().await,
    remote: repo.has_remote(),
    uploads: repo.assets().has_remote(),
  })
}

#[instrument(level = "info", skip(state, body), fields(user_id = ?body.user_id, role = ?body.role))]
pub async fn http_post_session(
  State(state): State<AppState>,
  Json(body): Json<SessionIn>,
) -> ApiResult<Json<SessionOut>> {
  let user_id = body.user_id.filter(|u| !u.trim().is_empty());
  // Reject unusable ids before the session changes.
  for id in user_id.iter().chain(body.profile_owner_id.iter()) {
    OwnerScope::new(id.as_str())?;
  }
  let signed_in = user_id.is_some();
  match &user_id {
    Some(uid) => state.identity.sign_in(uid.clone(), body.role.as_deref()),
    None => state.identity.sign_out(),
  }
  // A signing-in user is the profile being loaded unless one is named explicitly.
  let profile = body.profile_owner_id.or(user_id);
  let (owner, load) = state.rescope(profile.as_deref()).await?;
  info!(target: "story_vault", %owner, ?load, "Session updated");
  Ok(Json(SessionOut { owner, signed_in, load }))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_stories(State(state): State<AppState>) -> ApiResult<Json<StoriesOut>> {
  let repo = &state.repository;
  let stories = repo.stories().await?;
  Ok(Json(StoriesOut {
    owner: repo.owner_scope().await,
    stories,
    slot_count: repo.slot_count(),
    current_index: repo.current_index().await,
    slots: repo.slots().await,
  }))
}

#[instrument(level = "info", skip(state))]
pub async fn http_post_reload(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
  let status = state.repository.load_all().await?;
  Ok(Json(status))
}

#[instrument(level = "info", skip(state))]
pub async fn http_post_draft(State(state): State<AppState>, Path(slot): Path<usize>) -> ApiResult<impl IntoResponse> {
  let draft = state.repository.create_draft(slot).await?;
  Ok((StatusCode::CREATED, Json(draft)))
}

#[instrument(level = "info", skip(state, edit))]
pub async fn http_put_story(
  State(state): State<AppState>,
  Path(slot): Path<usize>,
  Json(edit): Json<StoryEdit>,
) -> ApiResult<impl IntoResponse> {
  Ok(Json(state.repository.update_story(slot, edit).await?))
}

#[instrument(level = "info", skip(state))]
pub async fn http_post_commit(State(state): State<AppState>, Path(slot): Path<usize>) -> ApiResult<impl IntoResponse> {
  Ok(Json(state.repository.commit_story(slot).await?))
}

#[instrument(level = "info", skip(state))]
pub async fn http_post_select(State(state): State<AppState>, Path(slot): Path<usize>) -> ApiResult<impl IntoResponse> {
  Ok(Json(state.repository.select_story(slot).await?))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_selection(State(state): State<AppState>) -> impl IntoResponse {
  let story = state.repository.current_story().await;
  Json(SelectionOut { current_index: story.as_ref().map(|s| s.slot_index), story })
}

#[instrument(level = "info", skip(state))]
pub async fn http_delete_selection(State(state): State<AppState>) -> StatusCode {
  state.repository.clear_selection().await;
  StatusCode::NO_CONTENT
}

#[instrument(level = "info", skip(state))]
pub async fn http_post_publish(State(state): State<AppState>, Path(slot): Path<usize>) -> ApiResult<impl IntoResponse> {
  let outcome = state.repository.publish_to_remote(slot).await?;
  info!(target: "story_vault", slot, ?outcome, "HTTP publish handled");
  Ok(Json(outcome))
}

#[instrument(level = "info", skip(state))]
pub async fn http_delete_story(State(state): State<AppState>, Path(slot): Path<usize>) -> ApiResult<StatusCode> {
  state.repository.delete_story(slot).await?;
  Ok(StatusCode::NO_CONTENT)
}

#[instrument(level = "info", skip(state, body), fields(b64_len = body.data_base64.len()))]
pub async fn http_put_asset(
  State(state): State<AppState>,
  Path((slot, kind)): Path<(usize, String)>,
  Json(body): Json<AssetIn>,
) -> ApiResult<Json<AssetRefOut>> {
  let kind = parse_kind(&kind)?;
  let bytes = B64
    .decode(body.data_base64.trim())
    .map_err(|e| StoryError::Invalid(format!("asset is not valid base64: {e}")))?;
  if bytes.is_empty() {
    return Err(StoryError::Invalid("asset is empty".into()));
  }
  let reference = state.repository.attach_asset(slot, kind, &bytes).await?;
  Ok(Json(AssetRefOut { kind, remote: reference.is_remote(), reference: reference.to_string() }))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_asset(
  State(state): State<AppState>,
  Path((slot, kind)): Path<(usize, String)>,
) -> ApiResult<Json<AssetOut>> {
  let kind = parse_kind(&kind)?;
  match state.repository.resolve_asset(slot, kind).await? {
    Some(bytes) => Ok(Json(AssetOut { kind, data_base64: B64.encode(bytes) })),
    None => Err(StoryError::NotFound(format!("no {kind} image available for slot {slot}"))),
  }
}

#[instrument(level = "info", skip(state, body), fields(class_code = %body.class_code))]
pub async fn http_post_class(
  State(state): State<AppState>,
  Path(slot): Path<usize>,
  Json(body): Json<ClassIn>,
) -> ApiResult<impl IntoResponse> {
  let entry = state.repository.assign_to_class(slot, &body.class_code, &body.class_name).await?;
  Ok(Json(entry))
}

#[instrument(level = "info", skip(state, body), fields(class_code = %body.class_code))]
pub async fn http_delete_class(
  State(state): State<AppState>,
  Path(slot): Path<usize>,
  Json(body): Json<ClassIn>,
) -> ApiResult<Json<UnassignOut>> {
  let removed = state.repository.unassign_from_class(slot, &body.class_code).await?;
  Ok(Json(UnassignOut { removed }))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_published(State(state): State<AppState>) -> impl IntoResponse {
  Json(PublishedOut {
    owner: state.repository.owner_scope().await,
    published: state.repository.published_stories().await,
  })
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_migration(State(state): State<AppState>) -> ApiResult<Json<MigrationStatusOut>> {
  let needs_migration = state.migration.needs_migration().await?;
  let report = state.migration.validate_migration().await?;
  Ok(Json(MigrationStatusOut { needs_migration, report }))
}

#[instrument(level = "info", skip(state))]
pub async fn http_post_migration(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
  let result = state.migration.migrate_all().await?;
  info!(target: "migration", migrated = result.paths_migrated, errors = result.errors.len(), "HTTP migration run");
  Ok(Json(result))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_resume_scene(State(state): State<AppState>) -> impl IntoResponse {
  Json(PrefOut { value: state.prefs.get(PrefKey::ResumeScene).await })
}

#[instrument(level = "info", skip(state, body), fields(value = ?body.value))]
pub async fn http_put_resume_scene(
  State(state): State<AppState>,
  Json(body): Json<PrefIn>,
) -> ApiResult<Json<PrefOut>> {
  match body.value.filter(|v| !v.trim().is_empty()) {
    Some(v) => state.prefs.set(PrefKey::ResumeScene, v).await?,
    None => state.prefs.remove(PrefKey::ResumeScene).await?,
  }
  Ok(Json(PrefOut { value: state.prefs.get(PrefKey::ResumeScene).await }))
}
