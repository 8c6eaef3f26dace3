use super::environment::ValidatorEnvironment;
use super::error::ValidationError;
use crate::backend::ContainerBackend;
use crate::context::Context;
use crate::instructions::KurtosisInstruction;
use crate::types::EngineConfig;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Checks an instruction list before anything is executed
pub struct StartosisValidator {
    backend: Arc<dyn ContainerBackend>,
    max_concurrent_image_checks: Option<usize>,
}

impl StartosisValidator {
    pub fn new(backend: Arc<dyn ContainerBackend>) -> Self {
        Self {
            backend,
            max_concurrent_image_checks: None,
        }
    }

    pub fn from_config(backend: Arc<dyn ContainerBackend>, config: &EngineConfig) -> Self {
        Self::new(backend).with_max_concurrent_image_checks(config.max_concurrent_image_checks)
    }

    /// Caps how many image checks run at once; `None` runs one task per image
    pub fn with_max_concurrent_image_checks(mut self, limit: Option<usize>) -> Self {
        self.max_concurrent_image_checks = limit.filter(|limit| *limit > 0);
        self
    }

    /// Walks the instructions in order on a fresh environment, stopping at
    /// the first failure, then checks every required image concurrently and
    /// reports all image failures sorted by image name
    pub async fn validate(
        &self,
        ctx: &Context,
        instructions: &[Box<dyn KurtosisInstruction>],
    ) -> Result<(), Vec<ValidationError>> {
        let mut env = ValidatorEnvironment::new();
        for (index, instruction) in instructions.iter().enumerate() {
            if let Err(err) = instruction.validate_and_update_environment(&mut env) {
                warn!("Instruction {} failed validation: {}", index + 1, err.message);
                return Err(vec![err.for_instruction(index + 1, instruction.to_string())]);
            }
        }

        let errors = self.validate_images(ctx, &env).await;
        if errors.is_empty() {
            info!(
                "Validated {} instructions and {} images",
                instructions.len(),
                env.required_image_count()
            );
            Ok(())
        } else {
            Err(errors)
        }
    }

    async fn validate_images(&self, ctx: &Context, env: &ValidatorEnvironment) -> Vec<ValidationError> {
        let semaphore = self
            .max_concurrent_image_checks
            .map(|limit| Arc::new(Semaphore::new(limit)));

        let images: Vec<String> = env.required_images().map(str::to_string).collect();
        // Dropping the set aborts every check still in flight
        let mut checks = JoinSet::new();
        for (index, image) in images.iter().enumerate() {
            let backend = Arc::clone(&self.backend);
            let semaphore = semaphore.clone();
            let ctx = ctx.clone();
            let image = image.clone();
            checks.spawn(async move {
                let _permit = match semaphore {
                    Some(semaphore) => match ctx.run(semaphore.acquire_owned()).await {
                        Ok(Ok(permit)) => Some(permit),
                        Ok(Err(closed)) => return (index, Err(closed.to_string())),
                        Err(interrupted) => return (index, Err(interrupted.to_string())),
                    },
                    None => None,
                };
                debug!("Checking image {}", image);
                let result = match ctx.run(backend.fetch_image(&image)).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(err)) => Err(err.to_string()),
                    Err(interrupted) => Err(interrupted.to_string()),
                };
                (index, result)
            });
        }

        let mut causes: Vec<Option<String>> = vec![None; images.len()];
        let mut panicked = Vec::new();
        while let Some(joined) = checks.join_next().await {
            match joined {
                Ok((index, result)) => causes[index] = result.err(),
                Err(join_error) => panicked.push(format!("image check task failed: {join_error}")),
            }
        }

        images
            .into_iter()
            .zip(causes)
            .filter_map(|(image, cause)| {
                cause.map(|cause| {
                    ValidationError::new(format!(
                        "Failed fetching the required image '{image}': {cause}"
                    ))
                })
            })
            .chain(panicked.into_iter().map(ValidationError::new))
            .collect()
    }
}
