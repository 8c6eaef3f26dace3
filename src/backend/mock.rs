use super::{BackendError, ContainerBackend};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

/// In-memory backend; every image is fetchable unless marked missing
#[derive(Default)]
pub struct MockContainerBackend {
    missing_images: HashSet<String>,
    fetch_delay: Option<Duration>,
    fetch_counts: Mutex<HashMap<String, usize>>,
}

impl MockContainerBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_missing_images<I, S>(images: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            missing_images: images.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Make every fetch take at least this long
    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    pub fn fetch_count(&self, image: &str) -> usize {
        self.fetch_counts
            .lock()
            .map(|counts| counts.get(image).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn total_fetches(&self) -> usize {
        self.fetch_counts
            .lock()
            .map(|counts| counts.values().sum())
            .unwrap_or(0)
    }
}

#[async_trait]
impl ContainerBackend for MockContainerBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch_image(&self, image: &str) -> Result<(), BackendError> {
        {
            let mut counts = self
                .fetch_counts
                .lock()
                .map_err(|e| BackendError::CommandFailed(format!("mutex poisoned: {e}")))?;
            *counts.entry(image.to_string()).or_insert(0) += 1;
        }

        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }

        if self.missing_images.contains(image) {
            return Err(BackendError::ImageUnavailable {
                image: image.to_string(),
                reason: "manifest unknown".to_string(),
            });
        }
        Ok(())
    }
}
