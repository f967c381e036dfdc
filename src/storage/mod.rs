//! Local filesystem storage for project assets.
//!
//! Layout: `{root}/{project_id}/{asset_id}`. File names are kept in the
//! database only, so user input never becomes a path component.

use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};

/// Asset files on the local disk
#[derive(Debug, Clone)]
pub struct AssetStorage {
    root: PathBuf,
}

/// What was written for one upload
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub path: PathBuf,
    pub size: u64,
    pub sha256: String,
}

impl AssetStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn project_dir(&self, project_id: &str) -> PathBuf {
        self.root.join(project_id)
    }

    pub fn asset_path(&self, project_id: &str, asset_id: &str) -> PathBuf {
        self.project_dir(project_id).join(asset_id)
    }

    /// Write one upload and return its size and SHA-256 digest
    pub async fn save(&self, project_id: &str, asset_id: &str, data: &[u8]) -> io::Result<StoredFile> {
        let path = self.asset_path(project_id, asset_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data).await?;

        Ok(StoredFile {
            path,
            size: data.len() as u64,
            sha256: sha256_hex(data),
        })
    }

    pub async fn open(&self, path: &Path) -> io::Result<tokio::fs::File> {
        tokio::fs::File::open(path).await
    }

    /// Missing files are not an error
    pub async fn remove(&self, path: &Path) -> io::Result<()> {
        match tokio::fs::remove_file(path).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    pub async fn remove_project(&self, project_id: &str) -> io::Result<()> {
        match tokio::fs::remove_dir_all(self.project_dir(project_id)).await {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
