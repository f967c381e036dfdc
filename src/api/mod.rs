mod ai;
mod assets;
pub mod auth;
mod compile;
pub mod error;
mod git;
pub mod metrics;
mod projects;
pub mod rate_limit;
pub mod validation;

use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    middleware,
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::AppState;

/// JSON bodies outside asset uploads
const MAX_JSON_BODY_BYTES: usize = 16 * 1024 * 1024;

pub fn create_router(state: Arc<AppState>) -> Router {
    let auth_layer = middleware::from_fn_with_state(state.clone(), auth::auth_middleware);

    // Credential endpoints: strict tier, successful calls refunded
    let auth_public = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/refresh-token", post(auth::refresh_token))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit::rate_limit_auth));

    let auth_private = Router::new()
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me))
        .layer(auth_layer.clone());

    let project_routes = Router::new()
        .route("/", get(projects::list_projects).post(projects::create_project))
        .route(
            "/:id",
            get(projects::get_project)
                .put(projects::update_project)
                .delete(projects::delete_project),
        )
        .route(
            "/:id/collaborators",
            get(projects::list_collaborators).post(projects::add_collaborator),
        )
        .route("/:id/collaborators/:userId", delete(projects::remove_collaborator));

    let asset_routes = Router::new()
        .route("/:projectId", get(assets::list_assets))
        .route(
            "/:projectId/upload",
            post(assets::upload_asset).layer(DefaultBodyLimit::max(state.config.server.max_upload_bytes)),
        )
        .route("/:projectId/:assetId", delete(assets::delete_asset))
        .route("/:projectId/:assetId/download", get(assets::download_asset));

    // Generation and debugging call the model; polling does not
    let ai_routes = Router::new()
        .route("/generate", post(ai::generate))
        .route("/debug", post(ai::debug))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit::rate_limit_ai))
        .route("/job/:jobId", get(ai::job_status));

    let compile_routes = Router::new()
        .route("/:projectId", post(compile::compile_project))
        .route("/:projectId/status/:jobId", get(compile::compile_status))
        .route("/:projectId/logs/:jobId", get(compile::compile_logs));

    let git_routes = Router::new()
        .route("/:projectId/init", post(git::init_repo))
        .route("/:projectId/commit", post(git::commit))
        .route("/:projectId/push", post(git::push))
        .route("/:projectId/status", get(git::status))
        .route("/:projectId/log", get(git::log));

    let protected = Router::new()
        .nest("/projects", project_routes)
        .nest("/assets", asset_routes)
        .nest("/ai", ai_routes)
        .nest("/compile", compile_routes)
        .nest("/git", git_routes)
        .layer(auth_layer);

    let v1 = Router::new()
        .nest("/auth", auth_public.merge(auth_private))
        .merge(protected)
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit::rate_limit_standard));

    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics::metrics_endpoint))
        .nest("/api/v1", v1)
        .fallback(error::not_found_handler)
        .layer(DefaultBodyLimit::max(MAX_JSON_BODY_BYTES))
        .layer(middleware::from_fn(metrics::metrics_middleware))
        .layer(cors_layer(&state.config.server.cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", o);
                None
            }
        })
        .collect();
    layer.allow_origin(origins)
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "ok": true,
        "name": "yuga-backend",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn health_check() -> &'static str {
    "OK"
}
