//! AI endpoints: queue generations, poll them, ask for a fix.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::ai::{AiGenerationRequest, GenerationOutput};
use crate::db::{DbPool, Job, JobKind, JobStatus};
use crate::engine::get_job;
use crate::AppState;

use super::auth::AuthUser;
use super::error::{ApiError, ValidationErrorBuilder};
use super::projects::find_member_project;
use super::validation::{validate_prompt, validate_relative_path, validate_uuid};

const MAX_CONTEXT_FILES: usize = 20;
const MAX_DEBUG_LOG_BYTES: usize = 200_000;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobAccepted {
    pub job_id: String,
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AiJobStatus {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub output: GenerationOutput,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugRequest {
    pub job_id: String,
    pub logs: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugResponse {
    pub job_id: String,
    pub fix: String,
}

/// A job whose project the user can read. Other users' jobs are 404.
pub async fn find_member_job(db: &DbPool, job_id: &str, user_id: &str) -> Result<Job, ApiError> {
    validate_uuid(job_id, "jobId").map_err(|e| ApiError::validation_field("jobId", e))?;

    let job = get_job(db, job_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Job not found"))?;

    find_member_project(db, &job.project_id, user_id)
        .await
        .map_err(|_| ApiError::not_found("Job not found"))?;
    Ok(job)
}

fn validate_generation_request(req: &AiGenerationRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    errors.check("projectId", validate_uuid(&req.project_id, "projectId"));
    errors.check("prompt", validate_prompt(&req.prompt));
    if req.context_files.len() > MAX_CONTEXT_FILES {
        errors.add(
            "contextFiles",
            format!("At most {} context files are allowed", MAX_CONTEXT_FILES),
        );
    }
    for file in &req.context_files {
        errors.check("contextFiles", validate_relative_path(&file.path));
    }
    errors.finish()
}

/// POST /api/v1/ai/generate
pub async fn generate(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    payload: Result<Json<AiGenerationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<JobAccepted>), ApiError> {
    let Json(req) = payload?;
    validate_generation_request(&req)?;
    let project = find_member_project(&state.db, &req.project_id, &user.id).await?;

    let payload = serde_json::to_value(&req)
        .map_err(|e| ApiError::internal(format!("Failed to encode job: {}", e)))?;
    let job_id = state
        .jobs
        .enqueue(JobKind::Generation, &project.id, &user.id, &payload)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(JobAccepted {
            job_id,
            status: "pending",
        }),
    ))
}

/// GET /api/v1/ai/job/:jobId
pub async fn job_status(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(job_id): Path<String>,
) -> Result<Json<AiJobStatus>, ApiError> {
    let job = find_member_job(&state.db, &job_id, &user.id).await?;
    if job.kind != JobKind::Generation.to_string() {
        return Err(ApiError::not_found("Job not found"));
    }

    let output = job
        .result
        .as_deref()
        .and_then(|r| serde_json::from_str::<GenerationOutput>(r).ok())
        .unwrap_or_default();

    Ok(Json(AiJobStatus {
        status: job.status_enum(),
        job_id: job.id,
        progress: job.progress,
        error: job.error,
        output,
    }))
}

/// POST /api/v1/ai/debug
pub async fn debug(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    payload: Result<Json<DebugRequest>, JsonRejection>,
) -> Result<Json<DebugResponse>, ApiError> {
    let Json(req) = payload?;
    if req.logs.trim().is_empty() {
        return Err(ApiError::validation_field("logs", "Logs are required"));
    }
    if req.logs.len() > MAX_DEBUG_LOG_BYTES {
        return Err(ApiError::payload_too_large(format!(
            "Logs are too large (max {} bytes)",
            MAX_DEBUG_LOG_BYTES
        )));
    }

    let job = find_member_job(&state.db, &req.job_id, &user.id).await?;

    // Generation jobs carry the request that produced the failing code
    let request = if job.kind == JobKind::Generation.to_string() {
        serde_json::from_str::<AiGenerationRequest>(&job.payload).ok()
    } else {
        None
    };

    let fix = state.ai.suggest_fix(request.as_ref(), &req.logs).await?;

    Ok(Json(DebugResponse { job_id: job.id, fix }))
}
