//! Input validation for API requests.
//!
//! Validators return `Result<(), String>` so handlers can feed them into
//! `ValidationErrorBuilder::check` and report every bad field at once.

use lazy_static::lazy_static;
use regex::Regex;
use std::path::{Component, Path};

lazy_static! {
    /// Loose email shape check; deliverability is not our concern
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[^\s@]+@[^\s@]+\.[^\s@]+$"
    ).unwrap();

    /// Regex for validating branch names
    static ref BRANCH_REGEX: Regex = Regex::new(
        r"^[a-zA-Z0-9]([a-zA-Z0-9._/-]*[a-zA-Z0-9])?$"
    ).unwrap();

    /// Regex for validating remote names
    static ref REMOTE_REGEX: Regex = Regex::new(
        r"^[a-zA-Z0-9][a-zA-Z0-9._-]*$"
    ).unwrap();

    /// Regex for validating HTTP/HTTPS Git URLs
    static ref GIT_HTTP_URL_REGEX: Regex = Regex::new(
        r"^https?://[a-zA-Z0-9][-a-zA-Z0-9]*(\.[a-zA-Z0-9][-a-zA-Z0-9]*)*(:\d+)?(/[-a-zA-Z0-9_%&=+@~.]+)*/?$"
    ).unwrap();

    /// Regex for validating SSH Git URLs
    static ref GIT_SSH_URL_REGEX: Regex = Regex::new(
        r"^(git@[a-zA-Z0-9][-a-zA-Z0-9]*(\.[a-zA-Z0-9][-a-zA-Z0-9]*)*:[-a-zA-Z0-9_./]+\.git|ssh://[a-zA-Z0-9@][-a-zA-Z0-9@.]*(/[-a-zA-Z0-9_.]+)+\.git)$"
    ).unwrap();

    /// Builder image tags, e.g. `2022.3.10f1` or `4.2-stable`
    static ref ENGINE_VERSION_REGEX: Regex = Regex::new(
        r"^[A-Za-z0-9._-]{1,64}$"
    ).unwrap();
}

pub const MAX_PROJECT_NAME_LEN: usize = 100;
pub const MAX_DESCRIPTION_LEN: usize = 1000;
pub const MAX_PROMPT_LEN: usize = 2000;
pub const MAX_FILE_PATH_LEN: usize = 512;
pub const MAX_COMMIT_MESSAGE_LEN: usize = 5000;

/// Editor engines a project can target
pub const VALID_ENGINES: [&str; 2] = ["unity", "bevy"];

/// Validate a project name (1-100 characters after trimming)
pub fn validate_project_name(name: &str) -> Result<(), String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err("Project name is required".to_string());
    }
    if trimmed.chars().count() > MAX_PROJECT_NAME_LEN {
        return Err(format!(
            "Project name is too long (max {} characters)",
            MAX_PROJECT_NAME_LEN
        ));
    }
    Ok(())
}

/// Validate a project description (optional field)
pub fn validate_description(description: &Option<String>) -> Result<(), String> {
    if let Some(d) = description {
        if d.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(format!(
                "Description is too long (max {} characters)",
                MAX_DESCRIPTION_LEN
            ));
        }
    }
    Ok(())
}

/// Validate an editor engine
pub fn validate_engine(engine: &str) -> Result<(), String> {
    if !VALID_ENGINES.contains(&engine) {
        return Err(format!(
            "Invalid engine. Must be one of: {}",
            VALID_ENGINES.join(", ")
        ));
    }
    Ok(())
}

/// Validate a UUID string
pub fn validate_uuid(id: &str, field_name: &str) -> Result<(), String> {
    if id.is_empty() {
        return Err(format!("{} is required", field_name));
    }

    if uuid::Uuid::parse_str(id).is_err() {
        return Err(format!("Invalid {} format", field_name));
    }

    Ok(())
}

/// Validate an email address
pub fn validate_email(email: &str) -> Result<(), String> {
    if email.is_empty() {
        return Err("Email is required".to_string());
    }
    if email.len() > 254 || !EMAIL_REGEX.is_match(email) {
        return Err("Invalid email format".to_string());
    }
    Ok(())
}

/// Validate a password (8-1024 bytes)
pub fn validate_password(password: &str) -> Result<(), String> {
    if password.chars().count() < 8 {
        return Err("Password must be at least 8 characters".to_string());
    }
    if password.len() > 1024 {
        return Err("Password is too long".to_string());
    }
    Ok(())
}

/// Validate a display name (optional field)
pub fn validate_display_name(name: &Option<String>) -> Result<(), String> {
    if let Some(n) = name {
        let len = n.trim().chars().count();
        if len == 0 {
            return Err("Display name cannot be blank".to_string());
        }
        if len > 50 {
            return Err("Display name is too long (max 50 characters)".to_string());
        }
        if n.chars().any(char::is_control) {
            return Err("Display name contains invalid characters".to_string());
        }
    }
    Ok(())
}

/// Validate an AI prompt
pub fn validate_prompt(prompt: &str) -> Result<(), String> {
    if prompt.trim().is_empty() {
        return Err("Prompt is required".to_string());
    }
    if prompt.chars().count() > MAX_PROMPT_LEN {
        return Err(format!("Prompt is too long (max {} characters)", MAX_PROMPT_LEN));
    }
    Ok(())
}

/// A path inside a project workspace.
///
/// Every segment must be a plain name: no empty segments (leading, trailing or
/// doubled separators), no `.` or `..`, no drive prefixes and nothing named
/// `.git` at any depth, compared case-insensitively.
pub fn validate_relative_path(path: &str) -> Result<(), String> {
    if path.is_empty() {
        return Err("File path is required".to_string());
    }
    if path.len() > MAX_FILE_PATH_LEN {
        return Err(format!(
            "File path is too long (max {} characters)",
            MAX_FILE_PATH_LEN
        ));
    }
    if path.contains('\0') {
        return Err("File path contains invalid characters".to_string());
    }
    if path.contains(':')
        || Path::new(path)
            .components()
            .any(|c| matches!(c, Component::RootDir | Component::Prefix(_)))
    {
        return Err("File path must be relative".to_string());
    }
    for segment in path.split(['/', '\\']) {
        match segment {
            "" => return Err("File path cannot contain empty segments".to_string()),
            "." | ".." => return Err(format!("File path cannot contain '{}'", segment)),
            s if s.eq_ignore_ascii_case(".git") => {
                return Err("File path cannot point inside .git".to_string())
            }
            _ => {}
        }
    }
    Ok(())
}

/// Validate a builder engine version tag
pub fn validate_engine_version(version: &str) -> Result<(), String> {
    if !ENGINE_VERSION_REGEX.is_match(version) {
        return Err("Invalid engine version format".to_string());
    }
    Ok(())
}

/// Validate a commit message
pub fn validate_commit_message(message: &str) -> Result<(), String> {
    if message.trim().is_empty() {
        return Err("Commit message is required".to_string());
    }
    if message.len() > MAX_COMMIT_MESSAGE_LEN {
        return Err(format!(
            "Commit message is too long (max {} characters)",
            MAX_COMMIT_MESSAGE_LEN
        ));
    }
    Ok(())
}

/// Validate a branch name
pub fn validate_branch(branch: &str) -> Result<(), String> {
    if branch.is_empty() {
        return Err("Branch name is required".to_string());
    }

    if branch.len() > 255 {
        return Err("Branch name is too long (max 255 characters)".to_string());
    }

    if !BRANCH_REGEX.is_match(branch) {
        return Err("Invalid branch name format".to_string());
    }

    if branch.contains("..") {
        return Err("Branch name cannot contain '..'".to_string());
    }

    Ok(())
}

/// Validate a git remote name
pub fn validate_remote_name(remote: &str) -> Result<(), String> {
    if remote.len() > 100 || !REMOTE_REGEX.is_match(remote) {
        return Err("Invalid remote name".to_string());
    }
    Ok(())
}

/// Push targets: HTTP(S) or SSH only, never local paths
pub fn validate_git_url(url: &str) -> Result<(), String> {
    if url.is_empty() {
        return Err("Git URL is required".to_string());
    }
    if url.len() > 2048 {
        return Err("Git URL is too long (max 2048 characters)".to_string());
    }
    if (url.starts_with("http://") || url.starts_with("https://")) && GIT_HTTP_URL_REGEX.is_match(url) {
        return Ok(());
    }
    if (url.starts_with("git@") || url.starts_with("ssh://")) && GIT_SSH_URL_REGEX.is_match(url) {
        return Ok(());
    }
    Err("Invalid Git URL format. Must be HTTP(S) or SSH URL".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_git_url() {
        assert!(validate_git_url("https://github.com/yuga/space-game.git").is_ok());
        assert!(validate_git_url("git@github.com:yuga/space-game.git").is_ok());
        assert!(validate_git_url("ssh://git@gitlab.com/yuga/space-game.git").is_ok());
        assert!(validate_git_url("/srv/repos/other.git").is_err());
        assert!(validate_git_url("file:///srv/repos/other.git").is_err());
        assert!(validate_git_url("").is_err());
    }

    #[test]
    fn test_validate_project_name() {
        assert!(validate_project_name("Space Shooter").is_ok());
        assert!(validate_project_name(&"a".repeat(100)).is_ok());

        assert!(validate_project_name("").is_err());
        assert!(validate_project_name("   ").is_err());
        assert!(validate_project_name(&"a".repeat(101)).is_err());
    }

    #[test]
    fn test_validate_description() {
        assert!(validate_description(&None).is_ok());
        assert!(validate_description(&Some(String::new())).is_ok());
        assert!(validate_description(&Some("x".repeat(1000))).is_ok());
        assert!(validate_description(&Some("x".repeat(1001))).is_err());
    }

    #[test]
    fn test_validate_engine() {
        assert!(validate_engine("unity").is_ok());
        assert!(validate_engine("bevy").is_ok());
        assert!(validate_engine("Unity").is_err());
        assert!(validate_engine("godot").is_err());
    }

    #[test]
    fn test_validate_email() {
        assert!(validate_email("dev@yuga.local").is_ok());
        assert!(validate_email("").is_err());
        assert!(validate_email("no-at-sign").is_err());
        assert!(validate_email("a@b").is_err());
    }

    #[test]
    fn test_validate_display_name() {
        assert!(validate_display_name(&None).is_ok());
        assert!(validate_display_name(&Some("Ada Lovelace".to_string())).is_ok());
        assert!(validate_display_name(&Some("   ".to_string())).is_err());
        assert!(validate_display_name(&Some("x".repeat(51))).is_err());
        assert!(validate_display_name(&Some("tab\there".to_string())).is_err());
    }

    #[test]
    fn test_validate_prompt() {
        assert!(validate_prompt("Make the player jump higher").is_ok());
        assert!(validate_prompt("").is_err());
        assert!(validate_prompt(&"p".repeat(2001)).is_err());
    }

    #[test]
    fn test_validate_relative_path() {
        assert!(validate_relative_path("Assets/Scripts/Player.cs").is_ok());
        assert!(validate_relative_path("src/main.rs").is_ok());
        assert!(validate_relative_path("file..name.txt").is_ok());

        assert!(validate_relative_path("").is_err());
        assert!(validate_relative_path("/etc/passwd").is_err());
        assert!(validate_relative_path("../outside").is_err());
        assert!(validate_relative_path("a/../../b").is_err());
        assert!(validate_relative_path("C:\\Windows").is_err());
    }

    #[test]
    fn test_validate_relative_path_rejects_git_dir_and_odd_segments() {
        assert!(validate_relative_path(".gitignore").is_ok());
        assert!(validate_relative_path("Assets/.gitkeep").is_ok());

        assert!(validate_relative_path(".git/config").is_err());
        assert!(validate_relative_path("./.git/config").is_err());
        assert!(validate_relative_path("assets/.git/HEAD").is_err());
        assert!(validate_relative_path(".GIT/hooks/pre-commit").is_err());
        assert!(validate_relative_path(".").is_err());
        assert!(validate_relative_path("./a.txt").is_err());
        assert!(validate_relative_path("a/").is_err());
        assert!(validate_relative_path("a//b").is_err());
        assert!(validate_relative_path("a\\..\\b").is_err());
    }

    #[test]
    fn test_validate_engine_version() {
        assert!(validate_engine_version("2022.3.10f1").is_ok());
        assert!(validate_engine_version("latest").is_ok());
        assert!(validate_engine_version("4.2 stable").is_err());
        assert!(validate_engine_version("").is_err());
    }

    #[test]
    fn test_validate_branch() {
        assert!(validate_branch("main").is_ok());
        assert!(validate_branch("feature/jump").is_ok());
        assert!(validate_branch("").is_err());
        assert!(validate_branch("branch/../hack").is_err());
    }

    #[test]
    fn test_validate_uuid() {
        assert!(validate_uuid("550e8400-e29b-41d4-a716-446655440000", "projectId").is_ok());
        assert!(validate_uuid("", "projectId").is_err());
        assert!(validate_uuid("not-a-uuid", "projectId").is_err());
    }
}
