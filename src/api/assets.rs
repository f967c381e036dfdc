//! Asset endpoints: list, multipart upload, streamed download, delete.

use axum::{
    body::Body,
    extract::{multipart::MultipartRejection, Multipart, Path, State},
    http::{header, StatusCode},
    response::Response,
    Json,
};
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use crate::db::{Asset, AssetListResponse, AssetResponse, AssetType};
use crate::AppState;

use super::auth::AuthUser;
use super::error::ApiError;
use super::projects::find_member_project;
use super::validation::validate_uuid;

const MAX_ASSET_NAME_LEN: usize = 255;

/// Reduce a client-supplied file name to its last path component.
fn clean_asset_name(raw: &str) -> Result<String, String> {
    let name = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim()
        .to_string();

    if name.is_empty() || name == "." || name == ".." {
        return Err("File name is required".to_string());
    }
    if name.len() > MAX_ASSET_NAME_LEN {
        return Err(format!(
            "File name is too long (max {} characters)",
            MAX_ASSET_NAME_LEN
        ));
    }
    if name.chars().any(|c| c.is_control()) {
        return Err("File name contains invalid characters".to_string());
    }
    Ok(name)
}

/// `Content-Disposition` value with the name quoted for the header
fn content_disposition(name: &str) -> String {
    let escaped: String = name
        .chars()
        .map(|c| if c == '"' || c == '\\' || !c.is_ascii() { '_' } else { c })
        .collect();
    format!("attachment; filename=\"{}\"", escaped)
}

async fn find_asset(state: &AppState, project_id: &str, asset_id: &str) -> Result<Asset, ApiError> {
    validate_uuid(asset_id, "assetId").map_err(|e| ApiError::validation_field("assetId", e))?;

    sqlx::query_as::<_, Asset>("SELECT * FROM assets WHERE id = ? AND project_id = ?")
        .bind(asset_id)
        .bind(project_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Asset not found"))
}

pub async fn list_assets(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(project_id): Path<String>,
) -> Result<Json<AssetListResponse>, ApiError> {
    let project = find_member_project(&state.db, &project_id, &user.id).await?;

    let assets = sqlx::query_as::<_, Asset>(
        "SELECT * FROM assets WHERE project_id = ? ORDER BY created_at DESC, name ASC",
    )
    .bind(&project.id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(AssetListResponse {
        assets: assets.into_iter().map(AssetResponse::from).collect(),
    }))
}

pub async fn upload_asset(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(project_id): Path<String>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<AssetResponse>), ApiError> {
    let mut multipart = multipart.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let project = find_member_project(&state.db, &project_id, &user.id).await?;

    let mut upload: Option<(String, String, bytes::Bytes)> = None;
    let mut name_override: Option<String> = None;

    while let Some(field) = multipart.next_field().await? {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("file") => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let content_type = field.content_type().map(str::to_string);
                let data = field.bytes().await?;
                let mime = content_type
                    .filter(|ct| !ct.is_empty())
                    .unwrap_or_else(|| mime_guess::from_path(&file_name).first_or_octet_stream().to_string());
                upload = Some((file_name, mime, data));
            }
            Some("name") => name_override = Some(field.text().await?),
            _ => {}
        }
    }

    let (file_name, mime_type, data) = upload.ok_or_else(|| ApiError::bad_request("No file provided"))?;
    if data.is_empty() {
        return Err(ApiError::bad_request("Uploaded file is empty"));
    }

    let name = clean_asset_name(name_override.as_deref().unwrap_or(&file_name))
        .map_err(|e| ApiError::validation_field("name", e))?;

    let exists: Option<(String,)> = sqlx::query_as("SELECT id FROM assets WHERE project_id = ? AND name = ?")
        .bind(&project.id)
        .bind(&name)
        .fetch_optional(&state.db)
        .await?;
    if exists.is_some() {
        return Err(ApiError::conflict("An asset with this name already exists"));
    }

    let id = Uuid::new_v4().to_string();
    let stored = state.storage.save(&project.id, &id, &data).await.map_err(|e| {
        tracing::error!(project_id = %project.id, "Failed to store asset: {}", e);
        ApiError::internal("Failed to store asset")
    })?;

    let asset_type = AssetType::infer(&name, &mime_type);
    let now = chrono::Utc::now().to_rfc3339();

    let inserted = sqlx::query(
        r#"
        INSERT INTO assets (id, project_id, name, asset_type, mime_type, size_bytes, sha256, storage_path, uploaded_by, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&project.id)
    .bind(&name)
    .bind(asset_type.to_string())
    .bind(&mime_type)
    .bind(stored.size as i64)
    .bind(&stored.sha256)
    .bind(stored.path.to_string_lossy().to_string())
    .bind(&user.id)
    .bind(&now)
    .execute(&state.db)
    .await;

    if let Err(e) = inserted {
        // Lost a race on the name, or the project vanished
        if let Err(cleanup) = state.storage.remove(&stored.path).await {
            tracing::warn!(
                asset_id = %id,
                path = %stored.path.display(),
                "Failed to remove orphaned asset file: {}",
                cleanup
            );
        }
        return Err(ApiError::from(e));
    }

    let asset = sqlx::query_as::<_, Asset>("SELECT * FROM assets WHERE id = ?")
        .bind(&id)
        .fetch_one(&state.db)
        .await?;

    tracing::info!(
        project_id = %project.id,
        asset_id = %id,
        size = stored.size,
        asset_type = %asset_type,
        "Uploaded asset"
    );

    Ok((StatusCode::CREATED, Json(asset.into())))
}

pub async fn download_asset(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path((project_id, asset_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let project = find_member_project(&state.db, &project_id, &user.id).await?;
    let asset = find_asset(&state, &project.id, &asset_id).await?;

    let file = state
        .storage
        .open(std::path::Path::new(&asset.storage_path))
        .await
        .map_err(|e| {
            tracing::error!(asset_id = %asset.id, "Asset file unreadable: {}", e);
            ApiError::not_found("Asset file not found")
        })?;

    let body = Body::from_stream(ReaderStream::new(file));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, &asset.mime_type)
        .header(header::CONTENT_LENGTH, asset.size_bytes)
        .header(header::CONTENT_DISPOSITION, content_disposition(&asset.name))
        .body(body)
        .map_err(|e| ApiError::internal(format!("Failed to build response: {}", e)))
}

pub async fn delete_asset(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path((project_id, asset_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let project = find_member_project(&state.db, &project_id, &user.id).await?;
    let asset = find_asset(&state, &project.id, &asset_id).await?;

    sqlx::query("DELETE FROM assets WHERE id = ?")
        .bind(&asset.id)
        .execute(&state.db)
        .await?;

    if let Err(e) = state.storage.remove(std::path::Path::new(&asset.storage_path)).await {
        tracing::warn!(asset_id = %asset.id, "Failed to remove asset file: {}", e);
    }

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_asset_name() {
        assert_eq!(clean_asset_name("hero.fbx").unwrap(), "hero.fbx");
        assert_eq!(clean_asset_name("C:\\Users\\me\\grass.png").unwrap(), "grass.png");
        assert_eq!(clean_asset_name("../../etc/passwd").unwrap(), "passwd");
        assert!(clean_asset_name("dir/").is_err());
        assert!(clean_asset_name("..").is_err());
        assert!(clean_asset_name("bad\nname").is_err());
        assert!(clean_asset_name(&"a".repeat(256)).is_err());
    }

    #[test]
    fn test_content_disposition_is_header_safe() {
        assert_eq!(content_disposition("hero.fbx"), "attachment; filename=\"hero.fbx\"");
        assert_eq!(content_disposition("a\"b.png"), "attachment; filename=\"a_b.png\"");
        assert_eq!(content_disposition("é.wav"), "attachment; filename=\"_.wav\"");
    }
}
