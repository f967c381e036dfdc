use anyhow::Context;
use std::sync::Arc;

use super::{add_job_log, set_progress};
use crate::ai::{AiGenerationRequest, GenerationProvider};
use crate::db::{Job, JobKind};
use crate::sandbox::{CompileRequest, SandboxCompiler};
use crate::DbPool;

/// Build output lines copied into `job_logs`, counted from the end
const MAX_OUTPUT_LOG_LINES: usize = 500;

/// What the worker needs to execute each job kind.
pub struct JobHandlers {
    provider: Arc<dyn GenerationProvider>,
    sandbox: Arc<SandboxCompiler>,
}

impl JobHandlers {
    pub fn new(provider: Arc<dyn GenerationProvider>, sandbox: Arc<SandboxCompiler>) -> Self {
        Self { provider, sandbox }
    }

    /// Run one attempt. The returned value is stored as the job result.
    pub async fn execute(&self, db: &DbPool, job: &Job) -> anyhow::Result<serde_json::Value> {
        let kind: JobKind = job.kind.parse().map_err(anyhow::Error::msg)?;
        match kind {
            JobKind::Generation => self.run_generation(db, job).await,
            JobKind::Compile => self.run_compile(db, job).await,
        }
    }

    async fn run_generation(&self, db: &DbPool, job: &Job) -> anyhow::Result<serde_json::Value> {
        let request: AiGenerationRequest =
            serde_json::from_str(&job.payload).context("Invalid generation payload")?;

        add_job_log(
            db,
            &job.id,
            "info",
            &format!(
                "Generating {:?} for {} with the {} provider",
                request.task,
                request.engine.display_name(),
                self.provider.name()
            ),
        )
        .await?;
        set_progress(db, &job.id, 30).await?;

        let output = self.provider.generate(&request).await?;
        Ok(serde_json::to_value(output)?)
    }

    async fn run_compile(&self, db: &DbPool, job: &Job) -> anyhow::Result<serde_json::Value> {
        let request: CompileRequest = serde_json::from_str(&job.payload).context("Invalid compile payload")?;

        add_job_log(
            db,
            &job.id,
            "info",
            &format!(
                "Building {} file(s) with {:?} {} for {}",
                request.files.len(),
                request.config.framework,
                request.config.version,
                request.config.platform.as_str()
            ),
        )
        .await?;
        set_progress(db, &job.id, 30).await?;

        let result = self.sandbox.compile(&request.files, &request.config).await?;

        let lines: Vec<&str> = result.output.lines().collect();
        let skip = lines.len().saturating_sub(MAX_OUTPUT_LOG_LINES);
        for line in &lines[skip..] {
            let level = if line.contains("error:") {
                "error"
            } else if line.contains("warning:") {
                "warn"
            } else {
                "output"
            };
            add_job_log(db, &job.id, level, line).await?;
        }

        add_job_log(
            db,
            &job.id,
            if result.success { "info" } else { "error" },
            &format!(
                "Build {} with {} error(s), {} warning(s), {} artifact(s)",
                if result.success { "succeeded" } else { "failed" },
                result.errors.len(),
                result.warnings.len(),
                result.artifacts.len()
            ),
        )
        .await?;

        Ok(serde_json::to_value(result)?)
    }
}
