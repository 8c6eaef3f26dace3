//! Service network and facts collaborators that instructions execute against

pub mod mock;

use crate::types::{ExecResult, PartitionTopology, ServiceConfig, ServiceId, ServiceInfo};
use async_trait::async_trait;
use thiserror::Error;

pub use mock::{RecordingServiceNetwork, StaticFactsEngine};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Service already exists: {0}")]
    ServiceAlreadyExists(String),

    #[error("Operation {operation} failed for service {service}: {reason}")]
    OperationFailed {
        operation: String,
        service: String,
        reason: String,
    },

    #[error("Repartition failed: {0}")]
    RepartitionFailed(String),

    #[error("Fact {fact} of service {service} is not available: {reason}")]
    FactUnavailable {
        service: String,
        fact: String,
        reason: String,
    },
}

/// Sink for the side effects requested by instructions.
///
/// Topology and partitioning internals live behind this trait.
#[async_trait]
pub trait ServiceNetwork: Send + Sync {
    async fn add_service(
        &self,
        service_id: &ServiceId,
        config: &ServiceConfig,
    ) -> Result<ServiceInfo, NetworkError>;

    async fn start_service(&self, service_id: &ServiceId) -> Result<(), NetworkError>;

    async fn stop_service(&self, service_id: &ServiceId) -> Result<(), NetworkError>;

    async fn remove_service(&self, service_id: &ServiceId) -> Result<(), NetworkError>;

    /// Private address assigned when the service was added
    async fn get_service_ip(&self, service_id: &ServiceId) -> Result<String, NetworkError>;

    async fn exec_command(
        &self,
        service_id: &ServiceId,
        command: &[String],
    ) -> Result<ExecResult, NetworkError>;

    async fn repartition(&self, topology: &PartitionTopology) -> Result<(), NetworkError>;
}

/// Facts subsystem; blocks until a fact has a value
#[async_trait]
pub trait FactsEngine: Send + Sync {
    async fn wait_for_fact(
        &self,
        service_id: &ServiceId,
        fact_name: &str,
    ) -> Result<String, NetworkError>;
}
