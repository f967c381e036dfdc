//! Sandboxed game builds.
//!
//! Each compilation gets a throwaway directory under `{data_dir}/sandbox`,
//! mounted into a builder container with no network and hard resource caps.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::api::validation::{validate_engine_version, validate_relative_path};
use crate::config::SandboxConfig;
use crate::runtime::{ContainerRuntime, RunSpec};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Framework {
    Unity,
    Unreal,
    Godot,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Windows,
    Mac,
    Linux,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Windows => "windows",
            Platform::Mac => "mac",
            Platform::Linux => "linux",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileFile {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileConfig {
    pub framework: Framework,
    pub version: String,
    pub platform: Platform,
}

/// Body of a compile request, also stored as the job payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileRequest {
    pub files: Vec<CompileFile>,
    pub config: CompileConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CompilationResult {
    pub success: bool,
    pub output: String,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub artifacts: Vec<String>,
}

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Invalid file path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },
    #[error("Invalid engine version: {0}")]
    InvalidVersion(String),
    #[error("Sandbox I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Container runtime failed: {0}")]
    Runtime(String),
}

/// Builder image and command line for a framework.
pub fn container_command(config: &CompileConfig, image_prefix: &str) -> (String, Vec<String>) {
    let (image, cmd): (&str, Vec<&str>) = match config.framework {
        Framework::Unity => ("unity-builder", vec!["unity-cli", "build", "-quit", "-batchmode"]),
        Framework::Unreal => (
            "unreal-builder",
            vec!["UnrealBuildTool", "Development", config.platform.as_str()],
        ),
        Framework::Godot => ("godot-builder", vec!["godot", "--export", config.platform.as_str()]),
    };
    (
        format!("{}{}:{}", image_prefix, image, config.version),
        cmd.into_iter().map(String::from).collect(),
    )
}

/// Split build output into error and warning lines. A line counts once,
/// errors taking precedence.
pub fn parse_output(output: &str) -> (Vec<String>, Vec<String>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    for line in output.lines() {
        if line.contains("error:") {
            errors.push(line.to_string());
        } else if line.contains("warning:") {
            warnings.push(line.to_string());
        }
    }
    (errors, warnings)
}

pub struct SandboxCompiler {
    runtime: Arc<dyn ContainerRuntime>,
    root: PathBuf,
    config: SandboxConfig,
}

impl SandboxCompiler {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, data_dir: &Path, config: SandboxConfig) -> Self {
        Self {
            runtime,
            root: data_dir.join("sandbox"),
            config,
        }
    }

    pub async fn compile(
        &self,
        files: &[CompileFile],
        config: &CompileConfig,
    ) -> Result<CompilationResult, SandboxError> {
        for file in files {
            validate_relative_path(&file.path).map_err(|reason| SandboxError::InvalidPath {
                path: file.path.clone(),
                reason,
            })?;
        }
        validate_engine_version(&config.version).map_err(SandboxError::InvalidVersion)?;

        let sandbox_id = uuid::Uuid::new_v4().to_string();
        let dir = self.root.join(&sandbox_id);

        let result = self.compile_in(&sandbox_id, &dir, files, config).await;

        if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(sandbox = %sandbox_id, "Failed to clean up sandbox: {}", e);
            }
        }
        result
    }

    async fn compile_in(
        &self,
        sandbox_id: &str,
        dir: &Path,
        files: &[CompileFile],
        config: &CompileConfig,
    ) -> Result<CompilationResult, SandboxError> {
        tokio::fs::create_dir_all(dir).await?;
        for file in files {
            let path = dir.join(&file.path);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, file.content.as_bytes()).await?;
        }

        let (image, cmd) = container_command(config, &self.config.image_prefix);
        // Docker needs an absolute bind source
        let workspace = std::path::absolute(dir)?;

        let spec = RunSpec {
            name: format!("yuga-build-{}", sandbox_id),
            image,
            cmd,
            workspace: workspace.to_string_lossy().to_string(),
            memory: self.config.memory_limit,
            memory_swap: -1,
            cpu_quota: self.config.cpu_quota,
            network_mode: "none".to_string(),
            timeout: Duration::from_secs(self.config.timeout_secs),
        };

        tracing::info!(
            sandbox = %sandbox_id,
            image = %spec.image,
            files = files.len(),
            "Starting sandboxed build"
        );

        let outcome = self
            .runtime
            .run_to_completion(&spec)
            .await
            .map_err(|e| SandboxError::Runtime(e.to_string()))?;

        let (mut errors, warnings) = parse_output(&outcome.output);
        if outcome.timed_out {
            errors.push(format!(
                "error: build timed out after {} seconds",
                self.config.timeout_secs
            ));
        }

        let success = outcome.success();
        let artifacts = if success {
            list_artifacts(&dir.join("build")).await?
        } else {
            Vec::new()
        };

        Ok(CompilationResult {
            success,
            output: outcome.output,
            errors,
            warnings,
            artifacts,
        })
    }
}

async fn list_artifacts(build_dir: &Path) -> std::io::Result<Vec<String>> {
    let mut artifacts = Vec::new();
    let mut entries = match tokio::fs::read_dir(build_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(artifacts),
        Err(e) => return Err(e),
    };
    while let Some(entry) = entries.next_entry().await? {
        artifacts.push(entry.file_name().to_string_lossy().to_string());
    }
    artifacts.sort();
    Ok(artifacts)
}
