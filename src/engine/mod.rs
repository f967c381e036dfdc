//! Persistent background job queue.
//!
//! Jobs live in the `jobs` table; the channel only carries ids. A job is
//! claimed with a conditional UPDATE, so an id delivered twice (channel and
//! startup recovery) is processed once.

mod tasks;

pub use tasks::JobHandlers;

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};

use crate::api::metrics::{record_job_finished, record_job_retry};
use crate::config::QueueConfig;
use crate::db::{Job, JobKind, JobLog, JobStatus};
use crate::DbPool;

/// Channel capacity between the API and the worker
const QUEUE_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct JobQueue {
    db: DbPool,
    tx: mpsc::Sender<String>,
}

impl JobQueue {
    pub fn new(db: DbPool) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        (Self { db, tx }, rx)
    }

    /// Persist a pending job and wake the worker. Returns the job id.
    pub async fn enqueue(
        &self,
        kind: JobKind,
        project_id: &str,
        user_id: &str,
        payload: &serde_json::Value,
    ) -> Result<String, sqlx::Error> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO jobs (id, kind, project_id, user_id, status, progress, attempts, payload, created_at, updated_at)
             VALUES (?, ?, ?, ?, 'pending', 0, 0, ?, ?, ?)",
        )
        .bind(&id)
        .bind(kind.to_string())
        .bind(project_id)
        .bind(user_id)
        .bind(payload.to_string())
        .bind(&now)
        .bind(&now)
        .execute(&self.db)
        .await?;

        tracing::info!(job_id = %id, kind = %kind, project_id = %project_id, "Job queued");

        if let Err(e) = self.tx.send(id.clone()).await {
            // Still pending in the table; recovered on next start
            tracing::warn!(job_id = %id, "Job worker is not running: {}", e);
        }
        Ok(id)
    }
}

pub async fn get_job(db: &DbPool, job_id: &str) -> Result<Option<Job>, sqlx::Error> {
    sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = ?")
        .bind(job_id)
        .fetch_optional(db)
        .await
}

pub async fn get_job_logs(db: &DbPool, job_id: &str) -> Result<Vec<JobLog>, sqlx::Error> {
    sqlx::query_as::<_, JobLog>("SELECT * FROM job_logs WHERE job_id = ? ORDER BY id ASC")
        .bind(job_id)
        .fetch_all(db)
        .await
}

pub async fn add_job_log(db: &DbPool, job_id: &str, level: &str, message: &str) -> anyhow::Result<()> {
    sqlx::query("INSERT INTO job_logs (job_id, level, message, created_at) VALUES (?, ?, ?, ?)")
        .bind(job_id)
        .bind(level)
        .bind(message)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(db)
        .await?;
    Ok(())
}

pub async fn set_progress(db: &DbPool, job_id: &str, progress: i64) -> anyhow::Result<()> {
    sqlx::query("UPDATE jobs SET progress = ?, updated_at = ? WHERE id = ?")
        .bind(progress.clamp(0, 100))
        .bind(chrono::Utc::now().to_rfc3339())
        .bind(job_id)
        .execute(db)
        .await?;
    Ok(())
}

/// Move a pending job to processing and count the attempt. `None` when
/// the job is missing or someone else holds it.
async fn claim_job(db: &DbPool, job_id: &str) -> anyhow::Result<Option<Job>> {
    let now = chrono::Utc::now().to_rfc3339();
    let claimed = sqlx::query(
        "UPDATE jobs SET status = 'processing', progress = 10, attempts = attempts + 1,
                started_at = COALESCE(started_at, ?), updated_at = ?
         WHERE id = ? AND status = 'pending'",
    )
    .bind(&now)
    .bind(&now)
    .bind(job_id)
    .execute(db)
    .await?
    .rows_affected();

    if claimed == 0 {
        return Ok(None);
    }
    Ok(get_job(db, job_id).await?)
}

async fn finish_job(
    db: &DbPool,
    job_id: &str,
    status: JobStatus,
    result: Option<&serde_json::Value>,
    error: Option<&str>,
) -> anyhow::Result<()> {
    let now = chrono::Utc::now().to_rfc3339();
    let progress = if status == JobStatus::Done { 100 } else { 0 };
    sqlx::query(
        "UPDATE jobs SET status = ?, progress = ?, result = ?, error = ?, updated_at = ?, finished_at = ?
         WHERE id = ?",
    )
    .bind(status.to_string())
    .bind(progress)
    .bind(result.map(|r| r.to_string()))
    .bind(error)
    .bind(&now)
    .bind(&now)
    .bind(job_id)
    .execute(db)
    .await?;
    Ok(())
}

/// Back to pending while waiting out the backoff. The last error stays
/// visible to pollers.
async fn requeue_job(db: &DbPool, job_id: &str, error: &str) -> anyhow::Result<()> {
    sqlx::query("UPDATE jobs SET status = 'pending', progress = 0, error = ?, updated_at = ? WHERE id = ?")
        .bind(error)
        .bind(chrono::Utc::now().to_rfc3339())
        .bind(job_id)
        .execute(db)
        .await?;
    Ok(())
}

/// `base * 2^(attempt - 1)`
pub fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(20);
    Duration::from_millis(base_ms.saturating_mul(1u64 << exponent))
}

/// Keep the newest `keep_completed` done jobs and `keep_failed` failed jobs.
pub async fn prune_finished(db: &DbPool, keep_completed: i64, keep_failed: i64) -> anyhow::Result<u64> {
    let mut removed = 0;
    for (status, keep) in [("done", keep_completed), ("failed", keep_failed)] {
        removed += sqlx::query(
            "DELETE FROM jobs WHERE status = ? AND id NOT IN (
                 SELECT id FROM jobs WHERE status = ? ORDER BY finished_at DESC, id DESC LIMIT ?
             )",
        )
        .bind(status)
        .bind(status)
        .bind(keep.max(0))
        .execute(db)
        .await?
        .rows_affected();
    }
    Ok(removed)
}

pub struct JobWorker {
    db: DbPool,
    rx: mpsc::Receiver<String>,
    handlers: Arc<JobHandlers>,
    config: QueueConfig,
}

impl JobWorker {
    pub fn new(db: DbPool, rx: mpsc::Receiver<String>, handlers: JobHandlers, config: QueueConfig) -> Self {
        Self {
            db,
            rx,
            handlers: Arc::new(handlers),
            config,
        }
    }

    /// Jobs interrupted by a previous shutdown go back to pending.
    /// Returns every pending id, oldest first.
    async fn recover(&self) -> anyhow::Result<Vec<String>> {
        let reset = sqlx::query("UPDATE jobs SET status = 'pending', progress = 0 WHERE status = 'processing'")
            .execute(&self.db)
            .await?
            .rows_affected();

        let ids: Vec<String> =
            sqlx::query_scalar("SELECT id FROM jobs WHERE status = 'pending' ORDER BY created_at ASC")
                .fetch_all(&self.db)
                .await?;

        if !ids.is_empty() {
            tracing::info!(count = ids.len(), interrupted = reset, "Recovering unfinished jobs");
        }
        Ok(ids)
    }

    pub async fn run(mut self) {
        tracing::info!(concurrency = self.config.concurrency, "Job worker started");
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));

        let recovered = match self.recover().await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!("Failed to recover jobs: {}", e);
                Vec::new()
            }
        };
        for job_id in recovered {
            if !self.dispatch(&semaphore, job_id).await {
                return;
            }
        }

        while let Some(job_id) = self.rx.recv().await {
            if !self.dispatch(&semaphore, job_id).await {
                return;
            }
        }
        tracing::info!("Job worker stopped");
    }

    /// Wait for a free slot, then process the job on its own task.
    async fn dispatch(&self, semaphore: &Arc<Semaphore>, job_id: String) -> bool {
        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return false,
        };

        let db = self.db.clone();
        let handlers = self.handlers.clone();
        let config = self.config.clone();

        tokio::spawn(async move {
            if let Err(e) = process_job(&db, &handlers, &config, &job_id).await {
                tracing::error!(job_id = %job_id, "Job bookkeeping failed: {}", e);
            }
            if let Err(e) = prune_finished(&db, config.keep_completed, config.keep_failed).await {
                tracing::warn!("Failed to prune finished jobs: {}", e);
            }
            drop(permit);
        });
        true
    }
}

/// Last resort when bookkeeping breaks mid-job: fail it unless it already
/// reached a terminal state, so pollers never wait on a stuck `processing`.
async fn fail_unfinished_job(db: &DbPool, job_id: &str, error: &str) -> anyhow::Result<bool> {
    let now = chrono::Utc::now().to_rfc3339();
    let updated = sqlx::query(
        "UPDATE jobs SET status = 'failed', progress = 0, error = ?, updated_at = ?, finished_at = ?
         WHERE id = ? AND status IN ('pending', 'processing')",
    )
    .bind(error)
    .bind(&now)
    .bind(&now)
    .bind(job_id)
    .execute(db)
    .await?
    .rows_affected();
    Ok(updated > 0)
}

async fn process_job(
    db: &DbPool,
    handlers: &JobHandlers,
    config: &QueueConfig,
    job_id: &str,
) -> anyhow::Result<()> {
    let Some(job) = claim_job(db, job_id).await? else {
        tracing::debug!(job_id = %job_id, "Job already claimed or finished");
        return Ok(());
    };
    let started = Instant::now();
    let kind = job.kind.clone();

    if let Err(e) = run_claimed(db, handlers, config, job).await {
        let message = format!("Job bookkeeping failed: {:#}", e);
        tracing::error!(job_id = %job_id, "{}", message);
        if fail_unfinished_job(db, job_id, &message).await? {
            record_job_finished(&kind, "failed", started.elapsed().as_secs_f64());
        }
    }
    Ok(())
}

/// Attempt loop for a job this worker holds.
async fn run_claimed(
    db: &DbPool,
    handlers: &JobHandlers,
    config: &QueueConfig,
    mut job: Job,
) -> anyhow::Result<()> {
    let id = job.id.clone();
    let job_id = id.as_str();
    let started = Instant::now();
    let max_attempts = config.max_attempts.max(1);

    loop {
        let attempt = job.attempts.max(1) as u32;
        tracing::info!(job_id = %job_id, kind = %job.kind, attempt, "Processing job");
        add_job_log(
            db,
            job_id,
            "info",
            &format!("Attempt {} of {} started", attempt, max_attempts),
        )
        .await?;

        match handlers.execute(db, &job).await {
            Ok(result) => {
                set_progress(db, job_id, 90).await?;
                add_job_log(db, job_id, "info", "Job completed").await?;
                finish_job(db, job_id, JobStatus::Done, Some(&result), None).await?;
                record_job_finished(&job.kind, "done", started.elapsed().as_secs_f64());
                tracing::info!(job_id = %job_id, "Job completed");
                return Ok(());
            }
            Err(e) => {
                let message = format!("{:#}", e);
                add_job_log(db, job_id, "error", &message).await?;

                if attempt >= max_attempts {
                    finish_job(db, job_id, JobStatus::Failed, None, Some(&message)).await?;
                    record_job_finished(&job.kind, "failed", started.elapsed().as_secs_f64());
                    tracing::error!(job_id = %job_id, attempts = attempt, "Job failed: {}", message);
                    return Ok(());
                }

                let delay = backoff_delay(config.backoff_ms, attempt);
                record_job_retry(&job.kind);
                tracing::warn!(
                    job_id = %job_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Job attempt failed, retrying: {}",
                    message
                );
                requeue_job(db, job_id, &message).await?;
                tokio::time::sleep(delay).await;

                job = match claim_job(db, job_id).await? {
                    Some(job) => job,
                    None => return Ok(()),
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::OfflineProvider;
    use crate::runtime::NoopRuntime;
    use crate::sandbox::SandboxCompiler;
    use serde_json::json;

    async fn setup() -> (DbPool, tempfile::TempDir) {
        let db = crate::db::init_with_url("sqlite::memory:").await.unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query("INSERT INTO users (id, email, password_hash, created_at, updated_at) VALUES ('u1', 'a@b.c', 'x', ?, ?)")
            .bind(&now)
            .bind(&now)
            .execute(&db)
            .await
            .unwrap();
        sqlx::query("INSERT INTO projects (id, owner_id, name, created_at, updated_at) VALUES ('p1', 'u1', 'Game', ?, ?)")
            .bind(&now)
            .bind(&now)
            .execute(&db)
            .await
            .unwrap();
        (db, tempfile::tempdir().unwrap())
    }

    fn handlers(dir: &std::path::Path) -> JobHandlers {
        JobHandlers::new(
            Arc::new(OfflineProvider),
            Arc::new(SandboxCompiler::new(Arc::new(NoopRuntime), dir, Default::default())),
        )
    }

    fn fast_config() -> QueueConfig {
        QueueConfig {
            backoff_ms: 1,
            ..QueueConfig::default()
        }
    }

    async fn wait_terminal(db: &DbPool, job_id: &str) -> Job {
        for _ in 0..200 {
            let job = get_job(db, job_id).await.unwrap().unwrap();
            if job.status_enum().is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {} did not finish", job_id);
    }

    fn generation_payload() -> serde_json::Value {
        json!({
            "projectId": "p1",
            "task": "codegen",
            "engine": "unity",
            "language": "csharp",
            "prompt": "Make the player jump",
            "model": "gpt-4"
        })
    }

    #[test]
    fn test_backoff_delay() {
        assert_eq!(backoff_delay(1000, 1), Duration::from_millis(1000));
        assert_eq!(backoff_delay(1000, 2), Duration::from_millis(2000));
        assert_eq!(backoff_delay(1000, 3), Duration::from_millis(4000));
        assert_eq!(backoff_delay(u64::MAX, 5), Duration::from_millis(u64::MAX));
    }

    #[tokio::test]
    async fn test_generation_job_completes() {
        let (db, dir) = setup().await;
        let (queue, rx) = JobQueue::new(db.clone());
        tokio::spawn(JobWorker::new(db.clone(), rx, handlers(dir.path()), fast_config()).run());

        let id = queue
            .enqueue(JobKind::Generation, "p1", "u1", &generation_payload())
            .await
            .unwrap();
        let job = wait_terminal(&db, &id).await;

        assert_eq!(job.status_enum(), JobStatus::Done);
        assert_eq!(job.progress, 100);
        assert_eq!(job.attempts, 1);
        let result = job.result_json().unwrap();
        assert!(result["diff"].as_str().unwrap().contains("Assets/Scripts/Generated"));

        let logs = get_job_logs(&db, &id).await.unwrap();
        assert_eq!(logs.last().unwrap().message, "Job completed");
    }

    #[tokio::test]
    async fn test_failing_job_retries_then_fails() {
        let (db, dir) = setup().await;
        let (queue, rx) = JobQueue::new(db.clone());
        tokio::spawn(JobWorker::new(db.clone(), rx, handlers(dir.path()), fast_config()).run());

        let payload = json!({
            "files": [{"path": "main.gd", "content": "extends Node"}],
            "config": {"framework": "godot", "version": "4.2", "platform": "linux"}
        });
        let id = queue.enqueue(JobKind::Compile, "p1", "u1", &payload).await.unwrap();
        let job = wait_terminal(&db, &id).await;

        assert_eq!(job.status_enum(), JobStatus::Failed);
        assert_eq!(job.attempts, 3);
        assert!(job.error.unwrap().contains("No container runtime available"));

        let errors = get_job_logs(&db, &id)
            .await
            .unwrap()
            .into_iter()
            .filter(|l| l.level == "error")
            .count();
        assert_eq!(errors, 3);
    }

    #[tokio::test]
    async fn test_invalid_payload_fails() {
        let (db, dir) = setup().await;
        let (queue, rx) = JobQueue::new(db.clone());
        let config = QueueConfig {
            max_attempts: 1,
            ..fast_config()
        };
        tokio::spawn(JobWorker::new(db.clone(), rx, handlers(dir.path()), config).run());

        let id = queue
            .enqueue(JobKind::Generation, "p1", "u1", &json!({"prompt": 5}))
            .await
            .unwrap();
        let job = wait_terminal(&db, &id).await;
        assert_eq!(job.status_enum(), JobStatus::Failed);
        assert!(job.error.unwrap().contains("Invalid generation payload"));
    }

    #[tokio::test]
    async fn test_recovers_interrupted_jobs() {
        let (db, dir) = setup().await;
        // Queue without a worker, then mark the job as if a crash hit mid-run
        let (queue, old_rx) = JobQueue::new(db.clone());
        let id = queue
            .enqueue(JobKind::Generation, "p1", "u1", &generation_payload())
            .await
            .unwrap();
        drop(old_rx);
        sqlx::query("UPDATE jobs SET status = 'processing', progress = 30 WHERE id = ?")
            .bind(&id)
            .execute(&db)
            .await
            .unwrap();

        let (_queue, rx) = JobQueue::new(db.clone());
        tokio::spawn(JobWorker::new(db.clone(), rx, handlers(dir.path()), fast_config()).run());

        let job = wait_terminal(&db, &id).await;
        assert_eq!(job.status_enum(), JobStatus::Done);
    }

    #[tokio::test]
    async fn test_bookkeeping_failure_fails_the_job() {
        let (db, dir) = setup().await;
        sqlx::query(
            "CREATE TRIGGER reject_job_logs BEFORE INSERT ON job_logs
             BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END",
        )
        .execute(&db)
        .await
        .unwrap();

        let (queue, rx) = JobQueue::new(db.clone());
        tokio::spawn(JobWorker::new(db.clone(), rx, handlers(dir.path()), fast_config()).run());

        let id = queue
            .enqueue(JobKind::Generation, "p1", "u1", &generation_payload())
            .await
            .unwrap();
        let job = wait_terminal(&db, &id).await;

        assert_eq!(job.status_enum(), JobStatus::Failed);
        assert!(job.finished_at.is_some());
        let error = job.error.unwrap();
        assert!(error.contains("Job bookkeeping failed"));
        assert!(error.contains("disk I/O error"));
    }

    #[tokio::test]
    async fn test_fail_unfinished_job_leaves_terminal_jobs_alone() {
        let (db, _dir) = setup().await;
        let (queue, _rx) = JobQueue::new(db.clone());
        let id = queue
            .enqueue(JobKind::Generation, "p1", "u1", &generation_payload())
            .await
            .unwrap();
        finish_job(&db, &id, JobStatus::Done, Some(&json!({"ok": true})), None)
            .await
            .unwrap();

        assert!(!fail_unfinished_job(&db, &id, "late error").await.unwrap());
        let job = get_job(&db, &id).await.unwrap().unwrap();
        assert_eq!(job.status_enum(), JobStatus::Done);
        assert!(job.error.is_none());

        let pending = queue
            .enqueue(JobKind::Generation, "p1", "u1", &generation_payload())
            .await
            .unwrap();
        assert!(fail_unfinished_job(&db, &pending, "late error").await.unwrap());
        let job = get_job(&db, &pending).await.unwrap().unwrap();
        assert_eq!(job.status_enum(), JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let (db, _dir) = setup().await;
        let (queue, _rx) = JobQueue::new(db.clone());
        let id = queue
            .enqueue(JobKind::Generation, "p1", "u1", &generation_payload())
            .await
            .unwrap();

        assert!(claim_job(&db, &id).await.unwrap().is_some());
        assert!(claim_job(&db, &id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_prune_keeps_newest() {
        let (db, _dir) = setup().await;
        for i in 0..5 {
            sqlx::query(
                "INSERT INTO jobs (id, kind, project_id, user_id, status, payload, created_at, updated_at, finished_at)
                 VALUES (?, 'compile', 'p1', 'u1', 'done', '{}', ?, ?, ?)",
            )
            .bind(format!("j{}", i))
            .bind(format!("2024-01-0{}T00:00:00Z", i + 1))
            .bind(format!("2024-01-0{}T00:00:00Z", i + 1))
            .bind(format!("2024-01-0{}T00:00:00Z", i + 1))
            .execute(&db)
            .await
            .unwrap();
        }

        let removed = prune_finished(&db, 2, 100).await.unwrap();
        assert_eq!(removed, 3);
        let left: Vec<String> = sqlx::query_scalar("SELECT id FROM jobs ORDER BY id")
            .fetch_all(&db)
            .await
            .unwrap();
        assert_eq!(left, vec!["j3", "j4"]);
    }
}
