//! Background job models shared by generation and compile jobs.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Lifecycle of a queued job
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting for a worker slot, or for its retry backoff
    Pending,
    /// Claimed by the worker
    Processing,
    Done,
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl From<String> for JobStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "processing" => Self::Processing,
            "done" => Self::Done,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

impl JobStatus {
    /// Done and failed jobs never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// What a job does when it runs
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// AI code generation, debugging or optimization
    Generation,
    /// Sandboxed game build
    Compile,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Generation => write!(f, "generation"),
            Self::Compile => write!(f, "compile"),
        }
    }
}

impl std::str::FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generation" => Ok(Self::Generation),
            "compile" => Ok(Self::Compile),
            other => Err(format!("unknown job kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Job {
    pub id: String,
    pub kind: String,
    pub project_id: String,
    pub user_id: String,
    pub status: String,
    /// 0-100
    pub progress: i64,
    /// Attempts started so far, including the current one
    pub attempts: i64,
    /// Request that created the job, as JSON
    pub payload: String,
    /// Handler output, as JSON, once done
    pub result: Option<String>,
    /// Last failure message, kept while a retry is pending
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

impl Job {
    pub fn status_enum(&self) -> JobStatus {
        JobStatus::from(self.status.clone())
    }

    pub fn result_json(&self) -> Option<serde_json::Value> {
        self.result
            .as_deref()
            .and_then(|r| serde_json::from_str(r).ok())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JobLog {
    pub id: i64,
    pub job_id: String,
    pub level: String,
    pub message: String,
    #[serde(rename = "timestamp")]
    pub created_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobLogsResponse {
    pub logs: Vec<JobLog>,
}
