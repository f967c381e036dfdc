//! Project models and DTOs.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A game project, owned by one user and shared with collaborators
#[derive(Debug, Clone, FromRow)]
pub struct Project {
    pub id: String,
    /// Only the owner may update, delete or share the project
    pub owner_id: String,
    pub name: String,
    pub description: Option<String>,
    /// "unity" or "bevy"
    pub engine: String,
    /// JSON object, stored as text
    pub metadata: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectResponse {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub description: Option<String>,
    pub engine: String,
    pub metadata: serde_json::Value,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Project> for ProjectResponse {
    fn from(project: Project) -> Self {
        let metadata = serde_json::from_str(&project.metadata)
            .unwrap_or_else(|_| serde_json::Value::Object(Default::default()));
        Self {
            id: project.id,
            owner_id: project.owner_id,
            name: project.name,
            description: project.description,
            engine: project.engine,
            metadata,
            created_at: project.created_at,
            updated_at: project.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    pub description: Option<String>,
    pub engine: String,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProjectRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub engine: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// Sort key for project listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProjectSort {
    Name,
    CreatedAt,
    #[default]
    UpdatedAt,
}

impl ProjectSort {
    pub fn column(&self) -> &'static str {
        match self {
            ProjectSort::Name => "p.name",
            ProjectSort::CreatedAt => "p.created_at",
            ProjectSort::UpdatedAt => "p.updated_at",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProjectListQuery {
    /// Case-insensitive substring match on name and description
    pub search: Option<String>,
    #[serde(default)]
    pub sort: ProjectSort,
    #[serde(default)]
    pub order: SortOrder,
    /// 1-based, defaults to 1
    pub page: Option<i64>,
    /// Defaults to 20, clamped to 1..=100
    pub per_page: Option<i64>,
}

impl ProjectListQuery {
    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn per_page(&self) -> i64 {
        self.per_page.unwrap_or(20).clamp(1, 100)
    }

    pub fn offset(&self) -> i64 {
        (self.page() - 1) * self.per_page()
    }
}

/// One page of a listing plus the totals needed to fetch the rest
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

impl<T> PaginatedResponse<T> {
    pub fn new(items: Vec<T>, total: i64, page: i64, per_page: i64) -> Self {
        let total_pages = if per_page > 0 {
            (total + per_page - 1) / per_page
        } else {
            0
        };
        Self {
            items,
            total,
            page,
            per_page,
            total_pages,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Collaborator {
    pub user_id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub added_at: String,
}

/// Either field identifies the user to add
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddCollaboratorRequest {
    pub user_id: Option<String>,
    pub email: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_query_bounds() {
        let query: ProjectListQuery =
            serde_json::from_value(serde_json::json!({ "page": 0, "perPage": 500 })).unwrap();
        assert_eq!(query.page(), 1);
        assert_eq!(query.per_page(), 100);
        assert_eq!(query.offset(), 0);
        assert_eq!(query.sort, ProjectSort::UpdatedAt);
        assert_eq!(query.order, SortOrder::Desc);

        let query: ProjectListQuery =
            serde_json::from_value(serde_json::json!({ "page": 3, "perPage": 10, "sort": "name", "order": "asc" }))
                .unwrap();
        assert_eq!(query.offset(), 20);
        assert_eq!(query.sort.column(), "p.name");
        assert_eq!(query.order.as_sql(), "ASC");
    }

    #[test]
    fn test_total_pages_rounds_up() {
        let page: PaginatedResponse<()> = PaginatedResponse::new(vec![], 41, 1, 20);
        assert_eq!(page.total_pages, 3);
        let page: PaginatedResponse<()> = PaginatedResponse::new(vec![], 0, 1, 20);
        assert_eq!(page.total_pages, 0);
    }

    #[test]
    fn test_bad_metadata_becomes_empty_object() {
        let project = Project {
            id: "p".into(),
            owner_id: "u".into(),
            name: "n".into(),
            description: None,
            engine: "bevy".into(),
            metadata: "not json".into(),
            created_at: String::new(),
            updated_at: String::new(),
        };
        let response = ProjectResponse::from(project);
        assert!(response.metadata.as_object().unwrap().is_empty());
    }
}
