//! Project endpoints: CRUD scoped to the caller, plus collaborator management.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::db::{
    AddCollaboratorRequest, Collaborator, CreateProjectRequest, DbPool, PaginatedResponse, Project,
    ProjectListQuery, ProjectResponse, UpdateProjectRequest,
};
use crate::AppState;

use super::auth::AuthUser;
use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{
    validate_description, validate_email, validate_engine, validate_project_name, validate_uuid,
};

/// Look up a project the user owns or collaborates on.
/// Anything else is reported as missing so project ids do not leak.
pub async fn find_member_project(
    db: &DbPool,
    project_id: &str,
    user_id: &str,
) -> Result<Project, ApiError> {
    validate_uuid(project_id, "projectId").map_err(|e| ApiError::validation_field("projectId", e))?;

    sqlx::query_as::<_, Project>(
        r#"
        SELECT p.* FROM projects p
        WHERE p.id = ?
          AND (p.owner_id = ? OR EXISTS (
              SELECT 1 FROM project_collaborators c
              WHERE c.project_id = p.id AND c.user_id = ?
          ))
        "#,
    )
    .bind(project_id)
    .bind(user_id)
    .bind(user_id)
    .fetch_optional(db)
    .await?
    .ok_or_else(|| ApiError::not_found("Project not found"))
}

/// Look up a project the user owns
pub async fn find_owned_project(
    db: &DbPool,
    project_id: &str,
    user_id: &str,
) -> Result<Project, ApiError> {
    validate_uuid(project_id, "projectId").map_err(|e| ApiError::validation_field("projectId", e))?;

    sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = ? AND owner_id = ?")
        .bind(project_id)
        .bind(user_id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("Project not found"))
}

fn validate_metadata(metadata: &Option<serde_json::Value>) -> Result<(), String> {
    match metadata {
        Some(value) if !value.is_object() => Err("Metadata must be a JSON object".to_string()),
        _ => Ok(()),
    }
}

fn validate_create_request(req: &CreateProjectRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    errors.check("name", validate_project_name(&req.name));
    errors.check("description", validate_description(&req.description));
    errors.check("engine", validate_engine(&req.engine));
    errors.check("metadata", validate_metadata(&req.metadata));
    errors.finish()
}

fn validate_update_request(req: &UpdateProjectRequest) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if let Some(ref name) = req.name {
        errors.check("name", validate_project_name(name));
    }
    errors.check("description", validate_description(&req.description));
    if let Some(ref engine) = req.engine {
        errors.check("engine", validate_engine(engine));
    }
    errors.check("metadata", validate_metadata(&req.metadata));
    errors.finish()
}

fn map_name_conflict(err: sqlx::Error) -> ApiError {
    if err.to_string().contains("UNIQUE constraint failed") {
        ApiError::conflict("A project with this name already exists")
    } else {
        ApiError::from(err)
    }
}

/// Escape LIKE wildcards so the search term matches literally
fn like_pattern(term: &str) -> String {
    let escaped = term
        .to_lowercase()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

pub async fn list_projects(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    query: Result<Query<ProjectListQuery>, QueryRejection>,
) -> Result<Json<PaginatedResponse<ProjectResponse>>, ApiError> {
    let Query(query) = query?;

    let mut conditions = vec![
        "(p.owner_id = ? OR EXISTS (SELECT 1 FROM project_collaborators c WHERE c.project_id = p.id AND c.user_id = ?))"
            .to_string(),
    ];
    let mut params: Vec<String> = vec![user.id.clone(), user.id.clone()];

    if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        conditions.push(
            "(LOWER(p.name) LIKE ? ESCAPE '\\' OR LOWER(COALESCE(p.description, '')) LIKE ? ESCAPE '\\')"
                .to_string(),
        );
        let pattern = like_pattern(search);
        params.push(pattern.clone());
        params.push(pattern);
    }

    let where_clause = conditions.join(" AND ");

    let count_sql = format!("SELECT COUNT(*) FROM projects p WHERE {}", where_clause);
    let mut count_query = sqlx::query_as::<_, (i64,)>(&count_sql);
    for param in &params {
        count_query = count_query.bind(param);
    }
    let (total,) = count_query.fetch_one(&state.db).await?;

    // Sort column and direction come from closed enums, never from raw input
    let list_sql = format!(
        "SELECT p.* FROM projects p WHERE {} ORDER BY {} {}, p.id LIMIT ? OFFSET ?",
        where_clause,
        query.sort.column(),
        query.order.as_sql()
    );
    let mut list_query = sqlx::query_as::<_, Project>(&list_sql);
    for param in &params {
        list_query = list_query.bind(param);
    }
    let projects = list_query
        .bind(query.per_page())
        .bind(query.offset())
        .fetch_all(&state.db)
        .await?;

    Ok(Json(PaginatedResponse::new(
        projects.into_iter().map(ProjectResponse::from).collect(),
        total,
        query.page(),
        query.per_page(),
    )))
}

pub async fn get_project(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ProjectResponse>, ApiError> {
    let project = find_member_project(&state.db, &id, &user.id).await?;
    Ok(Json(project.into()))
}

pub async fn create_project(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    payload: Result<Json<CreateProjectRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ProjectResponse>), ApiError> {
    let Json(req) = payload?;
    validate_create_request(&req)?;

    let id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    let metadata = req
        .metadata
        .unwrap_or_else(|| serde_json::Value::Object(Default::default()))
        .to_string();

    sqlx::query(
        r#"
        INSERT INTO projects (id, owner_id, name, description, engine, metadata, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&user.id)
    .bind(req.name.trim())
    .bind(&req.description)
    .bind(&req.engine)
    .bind(&metadata)
    .bind(&now)
    .bind(&now)
    .execute(&state.db)
    .await
    .map_err(map_name_conflict)?;

    let project = sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = ?")
        .bind(&id)
        .fetch_one(&state.db)
        .await?;

    tracing::info!(project_id = %project.id, owner = %user.id, "Created project");

    Ok((StatusCode::CREATED, Json(project.into())))
}

pub async fn update_project(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
    payload: Result<Json<UpdateProjectRequest>, JsonRejection>,
) -> Result<Json<ProjectResponse>, ApiError> {
    let Json(req) = payload?;
    find_owned_project(&state.db, &id, &user.id).await?;
    validate_update_request(&req)?;

    let now = chrono::Utc::now().to_rfc3339();
    let metadata = req.metadata.as_ref().map(|m| m.to_string());

    sqlx::query(
        r#"
        UPDATE projects SET
            name = COALESCE(?, name),
            description = COALESCE(?, description),
            engine = COALESCE(?, engine),
            metadata = COALESCE(?, metadata),
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(req.name.as_deref().map(str::trim))
    .bind(&req.description)
    .bind(&req.engine)
    .bind(&metadata)
    .bind(&now)
    .bind(&id)
    .execute(&state.db)
    .await
    .map_err(map_name_conflict)?;

    let project = sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = ?")
        .bind(&id)
        .fetch_one(&state.db)
        .await?;

    Ok(Json(project.into()))
}

/// Delete a project with its assets and workspace
pub async fn delete_project(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let project = find_owned_project(&state.db, &id, &user.id).await?;

    sqlx::query("DELETE FROM projects WHERE id = ?")
        .bind(&project.id)
        .execute(&state.db)
        .await?;

    if let Err(e) = state.storage.remove_project(&project.id).await {
        tracing::warn!(project_id = %project.id, "Failed to remove asset files: {}", e);
    }
    if let Err(e) = state.git.remove_workspace(&project.id).await {
        tracing::warn!(project_id = %project.id, "Failed to remove workspace: {}", e);
    }

    tracing::info!(project_id = %project.id, "Deleted project");

    Ok(StatusCode::NO_CONTENT)
}

async fn load_collaborators(db: &DbPool, project_id: &str) -> Result<Vec<Collaborator>, ApiError> {
    let collaborators = sqlx::query_as::<_, Collaborator>(
        r#"
        SELECT u.id AS user_id, u.email, u.display_name, c.created_at AS added_at
        FROM project_collaborators c
        JOIN users u ON u.id = c.user_id
        WHERE c.project_id = ?
        ORDER BY c.created_at, u.email
        "#,
    )
    .bind(project_id)
    .fetch_all(db)
    .await?;
    Ok(collaborators)
}

pub async fn list_collaborators(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Vec<Collaborator>>, ApiError> {
    let project = find_member_project(&state.db, &id, &user.id).await?;
    Ok(Json(load_collaborators(&state.db, &project.id).await?))
}

/// Add a collaborator by user id or email. Adding an existing one is a no-op.
pub async fn add_collaborator(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
    payload: Result<Json<AddCollaboratorRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Collaborator>), ApiError> {
    let Json(req) = payload?;
    let project = find_owned_project(&state.db, &id, &user.id).await?;

    let target: Option<(String,)> = match (&req.user_id, &req.email) {
        (Some(user_id), _) => {
            validate_uuid(user_id, "userId").map_err(|e| ApiError::validation_field("userId", e))?;
            sqlx::query_as("SELECT id FROM users WHERE id = ?")
                .bind(user_id)
                .fetch_optional(&state.db)
                .await?
        }
        (None, Some(email)) => {
            let email = email.trim().to_lowercase();
            validate_email(&email).map_err(|e| ApiError::validation_field("email", e))?;
            sqlx::query_as("SELECT id FROM users WHERE email = ?")
                .bind(&email)
                .fetch_optional(&state.db)
                .await?
        }
        (None, None) => {
            return Err(ApiError::validation_field("userId", "Either userId or email is required"))
        }
    };
    let (target_id,) = target.ok_or_else(|| ApiError::not_found("User not found"))?;

    if target_id == project.owner_id {
        return Err(ApiError::bad_request("The owner cannot be added as a collaborator"));
    }

    let inserted = sqlx::query(
        "INSERT OR IGNORE INTO project_collaborators (project_id, user_id, created_at) VALUES (?, ?, ?)",
    )
    .bind(&project.id)
    .bind(&target_id)
    .bind(chrono::Utc::now().to_rfc3339())
    .execute(&state.db)
    .await?
    .rows_affected();

    let collaborator = load_collaborators(&state.db, &project.id)
        .await?
        .into_iter()
        .find(|c| c.user_id == target_id)
        .ok_or_else(|| ApiError::internal("Collaborator was not stored"))?;

    let status = if inserted > 0 { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(collaborator)))
}

pub async fn remove_collaborator(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path((id, collaborator_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let project = find_owned_project(&state.db, &id, &user.id).await?;

    let removed = sqlx::query("DELETE FROM project_collaborators WHERE project_id = ? AND user_id = ?")
        .bind(&project.id)
        .bind(&collaborator_id)
        .execute(&state.db)
        .await?
        .rows_affected();

    if removed == 0 {
        return Err(ApiError::not_found("Collaborator not found"));
    }
    Ok(StatusCode::NO_CONTENT)
}
