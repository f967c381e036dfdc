//! Git endpoints over the project's workspace repository.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::git::{Author, CommitLog, PushRequest, RepoStatus, WorkspaceFile, DEFAULT_BRANCH};
use crate::AppState;

use super::auth::AuthUser;
use super::error::{ApiError, ValidationErrorBuilder};
use super::projects::find_member_project;
use super::validation::{
    validate_branch, validate_commit_message, validate_git_url, validate_relative_path,
    validate_remote_name,
};

const DEFAULT_LOG_LIMIT: usize = 50;

#[derive(Debug, Deserialize)]
pub struct CommitFile {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct CommitRequest {
    pub message: String,
    /// Written into the workspace before staging
    #[serde(default)]
    pub files: Vec<CommitFile>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PushBody {
    pub remote: Option<String>,
    pub branch: Option<String>,
    pub url: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct GitMessage {
    pub message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

/// Commit identity for the caller: display name when set, else the email.
async fn author_for(state: &AppState, user: &AuthUser) -> Result<Author, ApiError> {
    let display_name: Option<(Option<String>,)> = sqlx::query_as("SELECT display_name FROM users WHERE id = ?")
        .bind(&user.id)
        .fetch_optional(&state.db)
        .await?;

    let name = display_name
        .and_then(|(name,)| name)
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| user.email.clone());

    Ok(Author {
        name,
        email: user.email.clone(),
    })
}

/// POST /api/v1/git/:projectId/init
pub async fn init_repo(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(project_id): Path<String>,
) -> Result<(StatusCode, Json<GitMessage>), ApiError> {
    let project = find_member_project(&state.db, &project_id, &user.id).await?;
    let author = author_for(&state, &user).await?;

    let hash = state.git.init(&project.id, &author).await?;

    Ok((
        StatusCode::CREATED,
        Json(GitMessage {
            message: "Git repository initialized",
            hash: Some(hash),
        }),
    ))
}

/// POST /api/v1/git/:projectId/commit
pub async fn commit(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(project_id): Path<String>,
    payload: Result<Json<CommitRequest>, JsonRejection>,
) -> Result<Json<GitMessage>, ApiError> {
    let Json(req) = payload?;
    let project = find_member_project(&state.db, &project_id, &user.id).await?;

    let mut errors = ValidationErrorBuilder::new();
    errors.check("message", validate_commit_message(&req.message));
    for file in &req.files {
        errors.check("files", validate_relative_path(&file.path));
    }
    errors.finish()?;

    let author = author_for(&state, &user).await?;
    let files = req
        .files
        .into_iter()
        .map(|f| WorkspaceFile {
            path: f.path,
            content: f.content,
        })
        .collect();

    let hash = state
        .git
        .commit(&project.id, req.message.trim(), files, &author)
        .await?;

    Ok(Json(GitMessage {
        message: "Changes committed successfully",
        hash: Some(hash),
    }))
}

/// POST /api/v1/git/:projectId/push
pub async fn push(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(project_id): Path<String>,
    payload: Option<Json<PushBody>>,
) -> Result<Json<GitMessage>, ApiError> {
    let body = payload.map(|Json(b)| b).unwrap_or_default();
    let project = find_member_project(&state.db, &project_id, &user.id).await?;

    let remote = body.remote.unwrap_or_else(|| "origin".to_string());
    let branch = body.branch.unwrap_or_else(|| DEFAULT_BRANCH.to_string());

    let mut errors = ValidationErrorBuilder::new();
    errors.check("remote", validate_remote_name(&remote));
    errors.check("branch", validate_branch(&branch));
    if let Some(ref url) = body.url {
        errors.check("url", validate_git_url(url));
    }
    errors.finish()?;

    state
        .git
        .push(
            &project.id,
            PushRequest {
                remote,
                branch,
                url: body.url,
                token: body.token.filter(|t| !t.is_empty()),
            },
        )
        .await?;

    Ok(Json(GitMessage {
        message: "Changes pushed successfully",
        hash: None,
    }))
}

/// GET /api/v1/git/:projectId/status
pub async fn status(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(project_id): Path<String>,
) -> Result<Json<RepoStatus>, ApiError> {
    let project = find_member_project(&state.db, &project_id, &user.id).await?;
    Ok(Json(state.git.status(&project.id).await?))
}

/// GET /api/v1/git/:projectId/log
pub async fn log(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(project_id): Path<String>,
    query: Result<Query<LogQuery>, QueryRejection>,
) -> Result<Json<CommitLog>, ApiError> {
    let Query(query) = query?;
    let project = find_member_project(&state.db, &project_id, &user.id).await?;
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT);
    Ok(Json(state.git.log(&project.id, limit).await?))
}
