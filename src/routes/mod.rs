//! Router assembly: HTTP endpoints, CORS, and HTTP tracing.

use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::state::AppState;

pub mod http;

/// Build the application router with:
/// - REST-ish API under `/api/v1/...`
/// - CORS (allow any origin/method/headers); tighten for production if needed
/// - HTTP trace layer (per-request spans w/ method, path, status, latency)
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/health", get(http::http_health))
        .route("/api/v1/session", post(http::http_post_session))
        .route("/api/v1/stories", get(http::http_get_stories))
        .route("/api/v1/stories/reload", post(http::http_post_reload))
        .route("/api/v1/stories/:slot", put(http::http_put_story).delete(http::http_delete_story))
        .route("/api/v1/stories/:slot/draft", post(http::http_post_draft))
        .route("/api/v1/stories/:slot/commit", post(http::http_post_commit))
        .route("/api/v1/stories/:slot/select", post(http::http_post_select))
        .route("/api/v1/stories/:slot/publish", post(http::http_post_publish))
        .route("/api/v1/stories/:slot/assets/:kind", put(http::http_put_asset).get(http::http_get_asset))
        .route("/api/v1/stories/:slot/classes", post(http::http_post_class).delete(http::http_delete_class))
        .route("/api/v1/selection", get(http::http_get_selection).delete(http::http_delete_selection))
        .route("/api/v1/published", get(http::http_get_published))
        .route("/api/v1/prefs/resume_scene", get(http::http_get_resume_scene).put(http::http_put_resume_scene))
        .route("/api/v1/migration", get(http::http_get_migration).post(http::http_post_migration))
        // State + CORS + HTTP tracing
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoryConfig;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use axum::response::Response;
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn app(dir: &TempDir) -> Router {
        let config = StoryConfig { storage_root: dir.path().to_path_buf(), ..Default::default() };
        build_router(AppState::new(config).await)
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> Response {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(v) => builder
                .header("content-type", "application/json")
                .body(Body::from(v.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        app.clone().oneshot(request).await.unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_local_only() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir).await;
        let res = send(&app, Method::GET, "/api/v1/health", None).await;
        assert_eq!(res.status(), StatusCode::OK);
        let json = body_json(res).await;
        assert_eq!(json["ok"], true);
        assert_eq!(json["remote"], false);
    }

    #[tokio::test]
    async fn authoring_flow_over_http() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir).await;

        let res = send(&app, Method::POST, "/api/v1/session", Some(json!({ "userId": "teacherA", "role": "teacher" }))).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_json(res).await["owner"], "teacherA");

        let res = send(&app, Method::POST, "/api/v1/stories/2/draft", None).await;
        assert_eq!(res.status(), StatusCode::CREATED);

        let edit = json!({ "title": "The Fox", "dialogues": [{ "speaker": "Fox", "text": "Hello" }] });
        let res = send(&app, Method::PUT, "/api/v1/stories/2", Some(edit)).await;
        assert_eq!(body_json(res).await["title"], "The Fox");

        let res = send(&app, Method::POST, "/api/v1/stories/2/commit", None).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert!(!body_json(res).await["createdAt"].as_str().unwrap().is_empty());

        let asset = json!({ "dataBase64": "aW1n" });
        let res = send(&app, Method::PUT, "/api/v1/stories/2/assets/background", Some(asset)).await;
        let json = body_json(res).await;
        assert_eq!(json["reference"], "teacherA/story_2/background.png");
        assert_eq!(json["remote"], false);

        let res = send(&app, Method::GET, "/api/v1/stories/2/assets/background", None).await;
        assert_eq!(body_json(res).await["dataBase64"], "aW1n");

        let res = send(&app, Method::POST, "/api/v1/stories/2/publish", None).await;
        assert_eq!(body_json(res).await["outcome"], "local_only");

        let res = send(&app, Method::GET, "/api/v1/stories", None).await;
        let json = body_json(res).await;
        assert_eq!(json["slots"].as_array().unwrap().len(), 6);
        assert_eq!(json["slots"][2]["title"], "The Fox");
        assert!(json["slots"][0].is_null());
        assert_eq!(json["stories"].as_array().unwrap().len(), 1);

        send(&app, Method::POST, "/api/v1/stories/2/select", None).await;
        let res = send(&app, Method::GET, "/api/v1/selection", None).await;
        assert_eq!(body_json(res).await["currentIndex"], 2);
        let res = send(&app, Method::DELETE, "/api/v1/selection", None).await;
        assert_eq!(res.status(), StatusCode::NO_CONTENT);
        let res = send(&app, Method::GET, "/api/v1/selection", None).await;
        assert!(body_json(res).await["story"].is_null());
    }

    #[tokio::test]
    async fn resume_scene_pref_round_trips() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir).await;
        let res = send(&app, Method::PUT, "/api/v1/prefs/resume_scene", Some(json!({ "value": "editor" }))).await;
        assert_eq!(body_json(res).await["value"], "editor");
        let res = send(&app, Method::PUT, "/api/v1/prefs/resume_scene", Some(json!({ "value": null }))).await;
        assert!(body_json(res).await["value"].is_null());
    }

    #[tokio::test]
    async fn errors_map_to_status_codes() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir).await;

        let res = send(&app, Method::POST, "/api/v1/stories/99/draft", None).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let res = send(&app, Method::DELETE, "/api/v1/stories/1", None).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert!(body_json(res).await["error"].is_string());

        send(&app, Method::POST, "/api/v1/stories/1/draft", None).await;
        send(&app, Method::POST, "/api/v1/stories/1/commit", None).await;
        let res = send(&app, Method::POST, "/api/v1/stories/1/draft", None).await;
        assert_eq!(res.status(), StatusCode::CONFLICT);

        let res = send(&app, Method::GET, "/api/v1/stories/1/assets/sky", None).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn session_rejects_owner_ids_outside_the_storage_root() {
        let dir = TempDir::new().unwrap();
        let config = StoryConfig { storage_root: dir.path().join("root"), ..Default::default() };
        let app = build_router(AppState::new(config).await);

        let res = send(&app, Method::POST, "/api/v1/session", Some(json!({ "userId": "../escaped" }))).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let res = send(&app, Method::POST, "/api/v1/session", Some(json!({ "profileOwnerId": "a/b" }))).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        send(&app, Method::POST, "/api/v1/stories/0/draft", None).await;
        let res = send(&app, Method::POST, "/api/v1/stories/0/commit", None).await;
        assert_eq!(res.status(), StatusCode::OK);

        let res = send(&app, Method::GET, "/api/v1/health", None).await;
        assert_eq!(body_json(res).await["owner"], "default");
        assert!(!dir.path().join("escaped").exists());
    }

    #[tokio::test]
    async fn migration_status_on_clean_store() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir).await;
        let res = send(&app, Method::GET, "/api/v1/migration", None).await;
        let json = body_json(res).await;
        assert_eq!(json["needsMigration"], false);
        assert_eq!(json["report"]["stillAbsolute"], 0);
    }
}
