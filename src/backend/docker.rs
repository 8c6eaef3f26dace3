use super::{BackendError, ContainerBackend};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, info};

/// Backend that talks to a local docker daemon through the docker CLI
pub struct DockerCliBackend {
    docker_binary: PathBuf,
}

impl DockerCliBackend {
    pub fn new(docker_binary: &str) -> Result<Self, BackendError> {
        let docker_binary = which::which(docker_binary).map_err(|e| BackendError::Unavailable {
            backend: "docker".to_string(),
            reason: format!("'{docker_binary}' not found on PATH: {e}"),
        })?;
        Ok(Self { docker_binary })
    }

    async fn image_present_locally(&self, image: &str) -> Result<bool, BackendError> {
        let output = Command::new(&self.docker_binary)
            .args(["image", "inspect", "--format", "{{.Id}}", image])
            .output()
            .await
            .map_err(|e| BackendError::CommandFailed(e.to_string()))?;
        Ok(output.status.success())
    }
}

#[async_trait]
impl ContainerBackend for DockerCliBackend {
    fn name(&self) -> &str {
        "docker"
    }

    async fn fetch_image(&self, image: &str) -> Result<(), BackendError> {
        if self.image_present_locally(image).await? {
            debug!("Image {} already present locally", image);
            return Ok(());
        }

        info!("Pulling image {}", image);
        let output = Command::new(&self.docker_binary)
            .args(["pull", image])
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| BackendError::CommandFailed(e.to_string()))?;

        if !output.status.success() {
            return Err(BackendError::ImageUnavailable {
                image: image.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}
