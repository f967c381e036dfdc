mod docker;

pub use docker::DockerRuntime;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{RuntimeType, SandboxConfig};

/// One build container: mounted workspace, hard resource caps, no network.
#[derive(Debug, Clone)]
pub struct RunSpec {
    pub name: String,
    pub image: String,
    pub cmd: Vec<String>,
    /// Host directory mounted at `/workspace`
    pub workspace: String,
    pub memory: i64,
    /// -1 leaves swap unlimited
    pub memory_swap: i64,
    pub cpu_quota: i64,
    pub network_mode: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    pub exit_code: i64,
    /// stdout and stderr interleaved as the daemon returned them
    pub output: String,
    pub timed_out: bool,
}

impl RunOutcome {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    fn name(&self) -> &'static str;

    async fn is_available(&self) -> bool;

    /// Create, start and wait for a container, then collect its output.
    /// The container is removed before returning, whatever the outcome.
    async fn run_to_completion(&self, spec: &RunSpec) -> Result<RunOutcome>;

    async fn remove(&self, container_id: &str) -> Result<()>;
}

/// Used when no container runtime is reachable. Compilation jobs fail with a
/// clear message instead of the server refusing to start.
pub struct NoopRuntime;

#[async_trait]
impl ContainerRuntime for NoopRuntime {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn is_available(&self) -> bool {
        false
    }

    async fn run_to_completion(&self, _spec: &RunSpec) -> Result<RunOutcome> {
        anyhow::bail!("No container runtime available")
    }

    async fn remove(&self, _container_id: &str) -> Result<()> {
        anyhow::bail!("No container runtime available")
    }
}

pub async fn detect_runtime(config: &SandboxConfig) -> Arc<dyn ContainerRuntime> {
    match config.runtime_type {
        RuntimeType::None => {
            tracing::info!("Container runtime disabled, compilation is unavailable");
            Arc::new(NoopRuntime)
        }
        RuntimeType::Docker => match DockerRuntime::new(&config.docker_socket) {
            Ok(runtime) => Arc::new(runtime),
            Err(e) => {
                tracing::warn!("Failed to connect to Docker: {}. Compilation will not work.", e);
                Arc::new(NoopRuntime)
            }
        },
        RuntimeType::Auto => {
            if let Ok(docker) = DockerRuntime::new(&config.docker_socket) {
                if docker.is_available().await {
                    tracing::info!("Auto-detected Docker runtime");
                    return Arc::new(docker);
                }
            }
            tracing::warn!("No container runtime available. Compilation will not work until Docker is installed.");
            Arc::new(NoopRuntime)
        }
    }
}
