pub mod ai;
pub mod api;
pub mod config;
pub mod db;
pub mod engine;
pub mod git;
pub mod runtime;
pub mod sandbox;
pub mod storage;

pub use db::DbPool;

use config::Config;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use crate::ai::GenerationProvider;
use crate::api::auth::{AuthUser, JwtKeys};
use crate::api::rate_limit::RateLimiter;
use crate::engine::{JobHandlers, JobQueue, JobWorker};
use crate::git::GitWorkspaces;
use crate::runtime::ContainerRuntime;
use crate::sandbox::SandboxCompiler;
use crate::storage::AssetStorage;

/// Shared state handed to every handler
pub struct AppState {
    pub config: Config,
    pub db: DbPool,
    /// HS256 keys for access tokens
    pub jwt: JwtKeys,
    pub rate_limiter: Arc<RateLimiter>,
    /// Uploaded asset bytes under `{data_dir}/assets`
    pub storage: AssetStorage,
    /// Per-project repositories under `{data_dir}/projects`
    pub git: GitWorkspaces,
    /// Producer side of the background job queue
    pub jobs: JobQueue,
    pub ai: Arc<dyn GenerationProvider>,
    /// Injected for every request when authentication is disabled
    pub dev_user: Option<AuthUser>,
    pub metrics_handle: Option<PrometheusHandle>,
}

impl AppState {
    /// Build the shared state and the job worker that drains its queue.
    /// The worker must be spawned by the caller.
    pub fn new(
        config: Config,
        db: DbPool,
        runtime: Arc<dyn ContainerRuntime>,
        ai: Arc<dyn GenerationProvider>,
    ) -> (Self, JobWorker) {
        let data_dir = config.server.data_dir.clone();

        let (jobs, job_rx) = JobQueue::new(db.clone());
        let sandbox = Arc::new(SandboxCompiler::new(runtime, &data_dir, config.sandbox.clone()));
        let worker = JobWorker::new(
            db.clone(),
            job_rx,
            JobHandlers::new(ai.clone(), sandbox),
            config.queue.clone(),
        );

        let state = Self {
            jwt: JwtKeys::new(&config.auth.jwt_secret),
            rate_limiter: Arc::new(RateLimiter::new(config.rate_limit.clone())),
            storage: AssetStorage::new(data_dir.join("assets")),
            git: GitWorkspaces::new(&data_dir),
            jobs,
            ai,
            dev_user: None,
            metrics_handle: None,
            config,
            db,
        };
        (state, worker)
    }

    /// Set the user injected when authentication is disabled
    pub fn with_dev_user(mut self, user: AuthUser) -> Self {
        self.dev_user = Some(user);
        self
    }

    /// Set the Prometheus metrics handle
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }
}
