use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    WaitContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::CreateImageOptions;
use bollard::Docker;
use futures::StreamExt;

use super::{ContainerRuntime, RunOutcome, RunSpec};

pub struct DockerRuntime {
    client: Docker,
}

impl DockerRuntime {
    pub fn new(socket: &str) -> Result<Self> {
        // On Windows, always use local defaults (named pipe)
        // On Unix, use socket path if specified
        let client = if cfg!(windows) || socket.starts_with("npipe://") || socket.starts_with("tcp://") {
            Docker::connect_with_local_defaults()?
        } else {
            Docker::connect_with_socket(socket, 120, bollard::API_DEFAULT_VERSION)?
        };

        Ok(Self { client })
    }

    /// Pull the builder image unless it is already present locally.
    async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.client.inspect_image(image).await.is_ok() {
            return Ok(());
        }

        tracing::info!(image = %image, "Pulling builder image");
        let (from_image, tag) = split_image_tag(image);
        let options = CreateImageOptions {
            from_image,
            tag,
            ..Default::default()
        };

        let mut stream = self.client.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(error) = info.error {
                        anyhow::bail!("Failed to pull image: {}", error);
                    }
                    if let Some(status) = info.status {
                        tracing::debug!("{}", status);
                    }
                }
                Err(e) => anyhow::bail!("Failed to pull image: {}", e),
            }
        }
        Ok(())
    }

    /// Wait for the container to stop. Returns its exit code.
    async fn wait_exit(&self, container_id: &str) -> Result<i64> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut stream = self.client.wait_container(container_id, Some(options));

        let mut exit_code = -1;
        while let Some(result) = stream.next().await {
            match result {
                Ok(response) => exit_code = response.status_code,
                // Non-zero exits surface as an error carrying the code
                Err(BollardError::DockerContainerWaitError { code, .. }) => exit_code = code,
                Err(e) => return Err(e).context("Failed to wait for container"),
            }
        }
        Ok(exit_code)
    }

    async fn collect_logs(&self, container_id: &str) -> String {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: false,
            ..Default::default()
        };

        let mut output = String::new();
        let mut stream = self.client.logs(container_id, Some(options));
        while let Some(result) = stream.next().await {
            match result {
                Ok(LogOutput::StdOut { message }) | Ok(LogOutput::StdErr { message }) => {
                    output.push_str(&String::from_utf8_lossy(&message));
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("Error reading container log: {}", e);
                    break;
                }
            }
        }
        output
    }
}

fn split_image_tag(image: &str) -> (String, String) {
    match image.rsplit_once(':') {
        // A slash after the colon means a registry port, not a tag
        Some((name, tag)) if !tag.contains('/') => (name.to_string(), tag.to_string()),
        _ => (image.to_string(), "latest".to_string()),
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn name(&self) -> &'static str {
        "Docker"
    }

    async fn is_available(&self) -> bool {
        self.client.ping().await.is_ok()
    }

    async fn run_to_completion(&self, spec: &RunSpec) -> Result<RunOutcome> {
        self.ensure_image(&spec.image).await?;

        let host_config = bollard::service::HostConfig {
            binds: Some(vec![format!("{}:/workspace", spec.workspace)]),
            memory: Some(spec.memory),
            memory_swap: Some(spec.memory_swap),
            cpu_quota: Some(spec.cpu_quota),
            network_mode: Some(spec.network_mode.clone()),
            ..Default::default()
        };

        let container_config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.cmd.clone()),
            working_dir: Some("/workspace".to_string()),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        };

        let response = self
            .client
            .create_container(Some(options), container_config)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create container: {}", e))?;
        let container_id = response.id;

        let outcome = async {
            self.client
                .start_container::<String>(&container_id, None)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to start container: {}", e))?;

            let (exit_code, timed_out) =
                match tokio::time::timeout(spec.timeout, self.wait_exit(&container_id)).await {
                    Ok(code) => (code?, false),
                    Err(_) => {
                        tracing::warn!(container = %spec.name, "Build container timed out, killing it");
                        let _ = self
                            .client
                            .kill_container(&container_id, None::<KillContainerOptions<String>>)
                            .await;
                        (-1, true)
                    }
                };

            let output = self.collect_logs(&container_id).await;
            Ok::<_, anyhow::Error>(RunOutcome {
                exit_code,
                output,
                timed_out,
            })
        }
        .await;

        if let Err(e) = self.remove(&container_id).await {
            tracing::warn!(container = %spec.name, "Failed to remove build container: {}", e);
        }

        outcome
    }

    async fn remove(&self, container_id: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.client
            .remove_container(container_id, Some(options))
            .await
            .context("Failed to remove container")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_image_tag() {
        assert_eq!(
            split_image_tag("unity-builder:2022.3"),
            ("unity-builder".to_string(), "2022.3".to_string())
        );
        assert_eq!(
            split_image_tag("registry:5000/godot-builder"),
            ("registry:5000/godot-builder".to_string(), "latest".to_string())
        );
        assert_eq!(
            split_image_tag("godot-builder"),
            ("godot-builder".to_string(), "latest".to_string())
        );
    }
}
