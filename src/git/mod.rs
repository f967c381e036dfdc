//! Per-project git workspaces.
//!
//! Each project owns a working tree at `{data_dir}/projects/{project_id}`.
//! git2 is synchronous, so every operation runs on the blocking pool.

use git2::{
    Cred, IndexAddOption, Oid, PushOptions, RemoteCallbacks, Repository, RepositoryInitOptions, Signature,
    Sort, Status, StatusOptions,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::api::validation::validate_relative_path;

pub const DEFAULT_BRANCH: &str = "main";
pub const MAX_LOG_LIMIT: usize = 100;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("repository not initialized")]
    NotInitialized,
    #[error("repository already initialized")]
    AlreadyInitialized,
    #[error("nothing to commit")]
    NothingToCommit,
    #[error("remote '{0}' not found")]
    RemoteNotFound(String),
    #[error("branch '{0}' not found")]
    BranchNotFound(String),
    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },
    #[error("{0}")]
    Transport(String),
    #[error(transparent)]
    Git(#[from] git2::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("git task failed: {0}")]
    Task(String),
}

/// Commit identity, taken from the requesting user
#[derive(Debug, Clone)]
pub struct Author {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone)]
pub struct WorkspaceFile {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FileStatus {
    pub path: String,
    pub status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct RepoStatus {
    pub branch: String,
    pub clean: bool,
    pub files: Vec<FileStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommitInfo {
    pub hash: String,
    pub message: String,
    pub author: String,
    pub email: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommitLog {
    pub commits: Vec<CommitInfo>,
    pub total: usize,
}

#[derive(Debug, Clone, Default)]
pub struct PushRequest {
    pub remote: String,
    pub branch: String,
    /// Creates the remote, or repoints it, before pushing
    pub url: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GitWorkspaces {
    root: PathBuf,
}

async fn blocking<T, F>(f: F) -> Result<T, GitError>
where
    F: FnOnce() -> Result<T, GitError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| GitError::Task(e.to_string()))?
}

fn open(path: &Path) -> Result<Repository, GitError> {
    if !path.join(".git").exists() {
        return Err(GitError::NotInitialized);
    }
    Ok(Repository::open(path)?)
}

fn signature(author: &Author) -> Result<Signature<'static>, GitError> {
    Ok(Signature::now(&author.name, &author.email)?)
}

/// Stage every change in the working tree, deletions included.
fn stage_all(repo: &Repository) -> Result<Oid, GitError> {
    let mut index = repo.index()?;
    index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
    index.update_all(["*"].iter(), None)?;
    index.write()?;
    Ok(index.write_tree()?)
}

fn status_label(status: Status) -> &'static str {
    if status.contains(Status::CONFLICTED) {
        "conflicted"
    } else if status.contains(Status::WT_NEW) {
        "untracked"
    } else if status.contains(Status::INDEX_NEW) {
        "added"
    } else if status.intersects(Status::WT_DELETED | Status::INDEX_DELETED) {
        "deleted"
    } else if status.intersects(Status::WT_RENAMED | Status::INDEX_RENAMED) {
        "renamed"
    } else if status.intersects(Status::WT_TYPECHANGE | Status::INDEX_TYPECHANGE) {
        "typechange"
    } else {
        "modified"
    }
}

fn format_time(time: git2::Time) -> String {
    chrono::DateTime::from_timestamp(time.seconds(), 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_default()
}

impl GitWorkspaces {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            root: data_dir.join("projects"),
        }
    }

    pub fn workspace_path(&self, project_id: &str) -> PathBuf {
        self.root.join(project_id)
    }

    /// Create the repository on branch `main` with an initial commit of
    /// whatever the workspace already holds.
    pub async fn init(&self, project_id: &str, author: &Author) -> Result<String, GitError> {
        let path = self.workspace_path(project_id);
        let author = author.clone();

        blocking(move || {
            if path.join(".git").exists() {
                return Err(GitError::AlreadyInitialized);
            }
            std::fs::create_dir_all(&path)?;

            let mut opts = RepositoryInitOptions::new();
            opts.initial_head(DEFAULT_BRANCH);
            let repo = Repository::init_opts(&path, &opts)?;

            let tree_id = stage_all(&repo)?;
            let tree = repo.find_tree(tree_id)?;
            let sig = signature(&author)?;
            let oid = repo.commit(Some("HEAD"), &sig, &sig, "Initial commit", &tree, &[])?;

            tracing::info!(path = %path.display(), "Initialized project repository");
            Ok(oid.to_string())
        })
        .await
    }

    /// Write `files` into the working tree, stage everything and commit.
    pub async fn commit(
        &self,
        project_id: &str,
        message: &str,
        files: Vec<WorkspaceFile>,
        author: &Author,
    ) -> Result<String, GitError> {
        for file in &files {
            validate_relative_path(&file.path).map_err(|reason| GitError::InvalidPath {
                path: file.path.clone(),
                reason,
            })?;
        }

        let path = self.workspace_path(project_id);
        let message = message.to_string();
        let author = author.clone();

        blocking(move || {
            let repo = open(&path)?;

            for file in &files {
                let target = path.join(&file.path);
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&target, file.content.as_bytes())?;
            }

            let tree_id = stage_all(&repo)?;
            let parent = match repo.head() {
                Ok(head) => Some(head.peel_to_commit()?),
                Err(_) => None,
            };
            if let Some(parent) = &parent {
                if parent.tree_id() == tree_id {
                    return Err(GitError::NothingToCommit);
                }
            }

            let tree = repo.find_tree(tree_id)?;
            let sig = signature(&author)?;
            let parents: Vec<&git2::Commit> = parent.iter().collect();
            let oid = repo.commit(Some("HEAD"), &sig, &sig, &message, &tree, &parents)?;
            Ok(oid.to_string())
        })
        .await
    }

    pub async fn push(&self, project_id: &str, request: PushRequest) -> Result<(), GitError> {
        let path = self.workspace_path(project_id);

        blocking(move || {
            let repo = open(&path)?;

            if let Some(url) = &request.url {
                if repo.find_remote(&request.remote).is_ok() {
                    repo.remote_set_url(&request.remote, url)?;
                } else {
                    repo.remote(&request.remote, url)?;
                }
            }

            let mut remote = repo
                .find_remote(&request.remote)
                .map_err(|_| GitError::RemoteNotFound(request.remote.clone()))?;

            let refname = format!("refs/heads/{}", request.branch);
            if repo.find_reference(&refname).is_err() {
                return Err(GitError::BranchNotFound(request.branch.clone()));
            }

            // Rejected refs do not fail push() itself
            let mut rejection: Option<String> = None;
            let mut callbacks = RemoteCallbacks::new();
            if let Some(token) = request.token.clone() {
                callbacks.credentials(move |_url, _username_from_url, _allowed_types| {
                    Cred::userpass_plaintext("x-access-token", &token)
                });
            }
            callbacks.push_update_reference(|reference, status| {
                if let Some(msg) = status {
                    rejection = Some(format!("{} rejected: {}", reference, msg));
                }
                Ok(())
            });

            let mut opts = PushOptions::new();
            opts.remote_callbacks(callbacks);

            remote
                .push(&[format!("{0}:{0}", refname)], Some(&mut opts))
                .map_err(|e| GitError::Transport(e.message().to_string()))?;
            drop(opts);

            match rejection {
                Some(msg) => Err(GitError::Transport(msg)),
                None => {
                    tracing::info!(remote = %request.remote, branch = %request.branch, "Pushed project repository");
                    Ok(())
                }
            }
        })
        .await
    }

    pub async fn status(&self, project_id: &str) -> Result<RepoStatus, GitError> {
        let path = self.workspace_path(project_id);

        blocking(move || {
            let repo = open(&path)?;

            let branch = repo
                .head()
                .ok()
                .and_then(|head| head.shorthand().map(String::from))
                .unwrap_or_else(|| DEFAULT_BRANCH.to_string());

            let mut opts = StatusOptions::new();
            opts.include_untracked(true)
                .recurse_untracked_dirs(true)
                .include_ignored(false);

            let files: Vec<FileStatus> = repo
                .statuses(Some(&mut opts))?
                .iter()
                .filter_map(|entry| {
                    entry.path().map(|p| FileStatus {
                        path: p.to_string(),
                        status: status_label(entry.status()),
                    })
                })
                .collect();

            Ok(RepoStatus {
                branch,
                clean: files.is_empty(),
                files,
            })
        })
        .await
    }

    /// Newest first. `limit` is clamped to `MAX_LOG_LIMIT`.
    pub async fn log(&self, project_id: &str, limit: usize) -> Result<CommitLog, GitError> {
        let path = self.workspace_path(project_id);
        let limit = limit.clamp(1, MAX_LOG_LIMIT);

        blocking(move || {
            let repo = open(&path)?;

            let mut walk = repo.revwalk()?;
            walk.set_sorting(Sort::TIME)?;
            if walk.push_head().is_err() {
                // Unborn branch
                return Ok(CommitLog {
                    commits: Vec::new(),
                    total: 0,
                });
            }

            let oids: Vec<Oid> = walk.collect::<Result<_, _>>()?;
            let mut commits = Vec::with_capacity(limit.min(oids.len()));
            for oid in oids.iter().take(limit) {
                let commit = repo.find_commit(*oid)?;
                let author = commit.author();
                commits.push(CommitInfo {
                    hash: oid.to_string(),
                    message: commit.message().unwrap_or_default().trim().to_string(),
                    author: author.name().unwrap_or_default().to_string(),
                    email: author.email().unwrap_or_default().to_string(),
                    timestamp: format_time(commit.time()),
                });
            }

            Ok(CommitLog {
                commits,
                total: oids.len(),
            })
        })
        .await
    }

    /// Missing workspaces are not an error
    pub async fn remove_workspace(&self, project_id: &str) -> std::io::Result<()> {
        match tokio::fs::remove_dir_all(self.workspace_path(project_id)).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn author() -> Author {
        Author {
            name: "Dev".into(),
            email: "dev@yuga.local".into(),
        }
    }

    fn file(path: &str, content: &str) -> WorkspaceFile {
        WorkspaceFile {
            path: path.into(),
            content: content.into(),
        }
    }

    #[tokio::test]
    async fn test_init_commit_status_log() {
        let tmp = tempfile::tempdir().unwrap();
        let git = GitWorkspaces::new(tmp.path());

        git.init("p1", &author()).await.unwrap();
        assert!(matches!(
            git.init("p1", &author()).await,
            Err(GitError::AlreadyInitialized)
        ));

        let status = git.status("p1").await.unwrap();
        assert_eq!(status.branch, "main");
        assert!(status.clean);

        std::fs::write(git.workspace_path("p1").join("notes.txt"), "hi").unwrap();
        let status = git.status("p1").await.unwrap();
        assert!(!status.clean);
        assert_eq!(
            status.files,
            vec![FileStatus {
                path: "notes.txt".into(),
                status: "untracked"
            }]
        );

        let hash = git
            .commit("p1", "Add player", vec![file("src/player.gd", "extends Node")], &author())
            .await
            .unwrap();
        assert_eq!(hash.len(), 40);
        assert!(git.status("p1").await.unwrap().clean);

        let log = git.log("p1", 10).await.unwrap();
        assert_eq!(log.total, 2);
        assert_eq!(log.commits[0].message, "Add player");
        assert_eq!(log.commits[0].email, "dev@yuga.local");
        assert_eq!(log.commits[1].message, "Initial commit");

        let log = git.log("p1", 1).await.unwrap();
        assert_eq!(log.commits.len(), 1);
        assert_eq!(log.total, 2);
    }

    #[tokio::test]
    async fn test_nothing_to_commit_and_deletions() {
        let tmp = tempfile::tempdir().unwrap();
        let git = GitWorkspaces::new(tmp.path());
        git.init("p1", &author()).await.unwrap();

        assert!(matches!(
            git.commit("p1", "empty", vec![], &author()).await,
            Err(GitError::NothingToCommit)
        ));

        git.commit("p1", "add", vec![file("a.txt", "a")], &author())
            .await
            .unwrap();
        std::fs::remove_file(git.workspace_path("p1").join("a.txt")).unwrap();
        assert_eq!(git.status("p1").await.unwrap().files[0].status, "deleted");
        git.commit("p1", "remove", vec![], &author()).await.unwrap();
        assert!(git.status("p1").await.unwrap().clean);
    }

    #[tokio::test]
    async fn test_uninitialized_repository() {
        let tmp = tempfile::tempdir().unwrap();
        let git = GitWorkspaces::new(tmp.path());
        assert!(matches!(git.status("nope").await, Err(GitError::NotInitialized)));
        assert!(matches!(git.log("nope", 5).await, Err(GitError::NotInitialized)));
        assert!(matches!(
            git.commit("nope", "m", vec![], &author()).await,
            Err(GitError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn test_rejects_paths_outside_worktree() {
        let tmp = tempfile::tempdir().unwrap();
        let git = GitWorkspaces::new(tmp.path());
        git.init("p1", &author()).await.unwrap();

        for bad in ["../escape.txt", ".git/config", "/etc/passwd"] {
            assert!(matches!(
                git.commit("p1", "m", vec![file(bad, "x")], &author()).await,
                Err(GitError::InvalidPath { .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_git_dir_is_never_written() {
        let tmp = tempfile::tempdir().unwrap();
        let git = GitWorkspaces::new(tmp.path());
        git.init("p1", &author()).await.unwrap();
        let config_path = git.workspace_path("p1").join(".git").join("config");
        let before = std::fs::read_to_string(&config_path).unwrap();

        for bad in ["./.git/config", "assets/.git/HEAD", ".Git/config"] {
            let result = git
                .commit(
                    "p1",
                    "m",
                    vec![file(bad, "[remote \"origin\"]\n\turl = /tmp/anywhere\n")],
                    &author(),
                )
                .await;
            assert!(matches!(result, Err(GitError::InvalidPath { .. })), "{}", bad);
        }

        assert_eq!(std::fs::read_to_string(&config_path).unwrap(), before);
        assert!(!git.workspace_path("p1").join("assets").exists());
    }

    #[tokio::test]
    async fn test_push_to_local_bare_remote() {
        let tmp = tempfile::tempdir().unwrap();
        let git = GitWorkspaces::new(tmp.path());
        git.init("p1", &author()).await.unwrap();

        let missing = git
            .push(
                "p1",
                PushRequest {
                    remote: "origin".into(),
                    branch: "main".into(),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(missing, Err(GitError::RemoteNotFound(_))));

        let bare = tmp.path().join("remote.git");
        Repository::init_bare(&bare).unwrap();
        git.push(
            "p1",
            PushRequest {
                remote: "origin".into(),
                branch: "main".into(),
                url: Some(bare.to_string_lossy().to_string()),
                token: None,
            },
        )
        .await
        .unwrap();

        let remote = Repository::open_bare(&bare).unwrap();
        assert!(remote.find_reference("refs/heads/main").is_ok());

        let no_branch = git
            .push(
                "p1",
                PushRequest {
                    remote: "origin".into(),
                    branch: "release".into(),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(no_branch, Err(GitError::BranchNotFound(_))));
    }

    #[tokio::test]
    async fn test_remove_workspace() {
        let tmp = tempfile::tempdir().unwrap();
        let git = GitWorkspaces::new(tmp.path());
        git.init("p1", &author()).await.unwrap();
        git.remove_workspace("p1").await.unwrap();
        assert!(!git.workspace_path("p1").exists());
        git.remove_workspace("p1").await.unwrap();
    }
}
