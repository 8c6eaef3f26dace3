//! Container backend capability consumed by the validator

pub mod docker;
pub mod mock;

use async_trait::async_trait;
use thiserror::Error;

pub use docker::DockerCliBackend;
pub use mock::MockContainerBackend;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Image '{image}' could not be fetched: {reason}")]
    ImageUnavailable { image: String, reason: String },

    #[error("Backend '{backend}' is not available: {reason}")]
    Unavailable { backend: String, reason: String },

    #[error("Backend command failed: {0}")]
    CommandFailed(String),
}

/// Narrow view of the container backend needed by the pipeline.
///
/// Container lifecycle operations reach the backend through the service
/// network instead.
#[async_trait]
pub trait ContainerBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Make sure the image is present locally, pulling it if needed
    async fn fetch_image(&self, image: &str) -> Result<(), BackendError>;
}

pub fn select_backend(
    name: &str,
    docker_binary: &str,
) -> Result<Box<dyn ContainerBackend>, BackendError> {
    match name {
        "docker" => Ok(Box::new(DockerCliBackend::new(docker_binary)?)),
        "mock" => Ok(Box::new(MockContainerBackend::new())),
        other => Err(BackendError::Unavailable {
            backend: other.to_owned(),
            reason: "unknown backend".to_string(),
        }),
    }
}
