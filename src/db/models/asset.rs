//! Project asset models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Asset category, inferred at upload time
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    Model,
    Texture,
    Audio,
    Script,
    Material,
    Animation,
    Other,
}

impl std::fmt::Display for AssetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Model => write!(f, "model"),
            Self::Texture => write!(f, "texture"),
            Self::Audio => write!(f, "audio"),
            Self::Script => write!(f, "script"),
            Self::Material => write!(f, "material"),
            Self::Animation => write!(f, "animation"),
            Self::Other => write!(f, "other"),
        }
    }
}

impl From<String> for AssetType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "model" => Self::Model,
            "texture" => Self::Texture,
            "audio" => Self::Audio,
            "script" => Self::Script,
            "material" => Self::Material,
            "animation" => Self::Animation,
            _ => Self::Other,
        }
    }
}

impl AssetType {
    /// Classify an upload by file extension, falling back to its MIME type.
    pub fn infer(file_name: &str, mime_type: &str) -> Self {
        let ext = std::path::Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "fbx" | "obj" | "gltf" | "glb" | "dae" | "blend" | "3ds" | "stl" | "usdz" => {
                return Self::Model
            }
            "png" | "jpg" | "jpeg" | "tga" | "bmp" | "psd" | "tif" | "tiff" | "dds" | "ktx2"
            | "exr" | "hdr" | "webp" => return Self::Texture,
            "wav" | "mp3" | "ogg" | "flac" | "aiff" | "aif" => return Self::Audio,
            "cs" | "rs" | "cpp" | "h" | "hpp" | "rhai" | "lua" | "js" | "ts" | "py" | "gd"
            | "shader" | "hlsl" | "glsl" | "wgsl" => return Self::Script,
            "mat" | "mtl" => return Self::Material,
            "anim" | "controller" | "bvh" => return Self::Animation,
            _ => {}
        }

        if mime_type.starts_with("image/") {
            Self::Texture
        } else if mime_type.starts_with("audio/") {
            Self::Audio
        } else if mime_type.starts_with("model/") {
            Self::Model
        } else {
            Self::Other
        }
    }
}

/// An uploaded file belonging to a project
#[derive(Debug, Clone, FromRow)]
pub struct Asset {
    pub id: String,
    pub project_id: String,
    /// Cleaned original file name, unique per project
    pub name: String,
    pub asset_type: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub sha256: String,
    /// Location on disk; never exposed through the API
    pub storage_path: String,
    pub uploaded_by: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetResponse {
    pub id: String,
    pub project_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub asset_type: AssetType,
    pub mime_type: String,
    pub size: i64,
    pub hash: String,
    pub uploaded_by: Option<String>,
    pub created_at: String,
}

impl From<Asset> for AssetResponse {
    fn from(asset: Asset) -> Self {
        Self {
            asset_type: AssetType::from(asset.asset_type),
            id: asset.id,
            project_id: asset.project_id,
            name: asset.name,
            mime_type: asset.mime_type,
            size: asset.size_bytes,
            hash: asset.sha256,
            uploaded_by: asset.uploaded_by,
            created_at: asset.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AssetListResponse {
    pub assets: Vec<AssetResponse>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_by_extension() {
        assert_eq!(AssetType::infer("hero.FBX", "application/octet-stream"), AssetType::Model);
        assert_eq!(AssetType::infer("grass.png", "image/png"), AssetType::Texture);
        assert_eq!(AssetType::infer("jump.ogg", "application/octet-stream"), AssetType::Audio);
        assert_eq!(AssetType::infer("Player.cs", "text/plain"), AssetType::Script);
        assert_eq!(AssetType::infer("metal.mat", "text/plain"), AssetType::Material);
        assert_eq!(AssetType::infer("run.anim", "text/plain"), AssetType::Animation);
    }

    #[test]
    fn test_infer_falls_back_to_mime() {
        assert_eq!(AssetType::infer("blob", "image/x-custom"), AssetType::Texture);
        assert_eq!(AssetType::infer("blob", "audio/x-custom"), AssetType::Audio);
        assert_eq!(AssetType::infer("notes.txt", "text/plain"), AssetType::Other);
    }

    #[test]
    fn test_unknown_stored_type_is_other() {
        assert_eq!(AssetType::from("3dmodel".to_string()), AssetType::Other);
        assert_eq!(AssetType::from(AssetType::Script.to_string()), AssetType::Script);
    }
}
