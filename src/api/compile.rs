//! Compile endpoints. Builds run on the job queue; clients poll status and logs.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use crate::db::{Job, JobKind, JobLogsResponse, JobStatus};
use crate::engine::get_job_logs;
use crate::sandbox::{CompilationResult, CompileRequest};
use crate::AppState;

use super::ai::{find_member_job, JobAccepted};
use super::auth::AuthUser;
use super::error::{ApiError, ValidationErrorBuilder};
use super::projects::find_member_project;
use super::validation::{validate_engine_version, validate_relative_path};

const MAX_COMPILE_FILES: usize = 1000;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileStatus {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<CompilationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn validate_compile_request(req: &CompileRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if req.files.is_empty() {
        errors.add("files", "At least one file is required");
    }
    if req.files.len() > MAX_COMPILE_FILES {
        errors.add("files", format!("At most {} files are allowed", MAX_COMPILE_FILES));
    }
    for file in &req.files {
        errors.check("files", validate_relative_path(&file.path));
    }
    errors.check("config.version", validate_engine_version(&req.config.version));
    errors.finish()
}

/// A compile job of this project
async fn find_compile_job(
    state: &AppState,
    project_id: &str,
    job_id: &str,
    user: &AuthUser,
) -> Result<Job, ApiError> {
    let project = find_member_project(&state.db, project_id, &user.id).await?;
    let job = find_member_job(&state.db, job_id, &user.id).await?;
    if job.project_id != project.id || job.kind != JobKind::Compile.to_string() {
        return Err(ApiError::not_found("Job not found"));
    }
    Ok(job)
}

/// POST /api/v1/compile/:projectId
pub async fn compile_project(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(project_id): Path<String>,
    payload: Result<Json<CompileRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<JobAccepted>), ApiError> {
    let Json(req) = payload?;
    let project = find_member_project(&state.db, &project_id, &user.id).await?;
    validate_compile_request(&req)?;

    let payload = serde_json::to_value(&req)
        .map_err(|e| ApiError::internal(format!("Failed to encode job: {}", e)))?;
    let job_id = state
        .jobs
        .enqueue(JobKind::Compile, &project.id, &user.id, &payload)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(JobAccepted {
            job_id,
            status: "queued",
        }),
    ))
}

/// GET /api/v1/compile/:projectId/status/:jobId
pub async fn compile_status(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path((project_id, job_id)): Path<(String, String)>,
) -> Result<Json<CompileStatus>, ApiError> {
    let job = find_compile_job(&state, &project_id, &job_id, &user).await?;

    let result = job
        .result
        .as_deref()
        .and_then(|r| serde_json::from_str::<CompilationResult>(r).ok());

    Ok(Json(CompileStatus {
        status: job.status_enum(),
        job_id: job.id,
        progress: job.progress,
        result,
        error: job.error,
    }))
}

/// GET /api/v1/compile/:projectId/logs/:jobId
pub async fn compile_logs(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path((project_id, job_id)): Path<(String, String)>,
) -> Result<Json<JobLogsResponse>, ApiError> {
    let job = find_compile_job(&state, &project_id, &job_id, &user).await?;
    let logs = get_job_logs(&state.db, &job.id).await?;
    Ok(Json(JobLogsResponse { logs }))
}
