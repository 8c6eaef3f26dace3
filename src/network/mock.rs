use super::{FactsEngine, NetworkError, ServiceNetwork};
use crate::types::{ExecResult, PartitionTopology, ServiceConfig, ServiceId, ServiceInfo};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkCall {
    AddService(ServiceId),
    StartService(ServiceId),
    StopService(ServiceId),
    RemoveService(ServiceId),
    Exec(ServiceId, Vec<String>),
    Repartition(Vec<String>),
}

#[derive(Default)]
struct NetworkState {
    services: BTreeMap<ServiceId, ServiceConfig>,
    ip_addresses: BTreeMap<ServiceId, String>,
    calls: Vec<NetworkCall>,
    next_ip_suffix: u8,
}

/// In-memory service network that records every call it receives
#[derive(Default)]
pub struct RecordingServiceNetwork {
    state: Mutex<NetworkState>,
    exec_results: HashMap<ServiceId, ExecResult>,
}

impl RecordingServiceNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canned result returned by `exec_command` for the given service
    pub fn with_exec_result(mut self, service_id: &str, exit_code: i32, output: &str) -> Self {
        self.exec_results.insert(
            ServiceId::new(service_id),
            ExecResult {
                exit_code,
                output: output.to_string(),
            },
        );
        self
    }

    pub fn calls(&self) -> Vec<NetworkCall> {
        self.state
            .lock()
            .map(|state| state.calls.clone())
            .unwrap_or_default()
    }

    pub fn service_ids(&self) -> Vec<ServiceId> {
        self.state
            .lock()
            .map(|state| state.services.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn service_config(&self, service_id: &ServiceId) -> Option<ServiceConfig> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.services.get(service_id).cloned())
    }

    fn with_state<T>(
        &self,
        f: impl FnOnce(&mut NetworkState) -> Result<T, NetworkError>,
    ) -> Result<T, NetworkError> {
        let mut state = self.state.lock().map_err(|e| NetworkError::OperationFailed {
            operation: "lock".to_string(),
            service: String::new(),
            reason: format!("mutex poisoned: {e}"),
        })?;
        f(&mut state)
    }
}

fn require_service(state: &NetworkState, service_id: &ServiceId) -> Result<(), NetworkError> {
    if state.services.contains_key(service_id) {
        Ok(())
    } else {
        Err(NetworkError::ServiceNotFound(service_id.to_string()))
    }
}

#[async_trait]
impl ServiceNetwork for RecordingServiceNetwork {
    async fn add_service(
        &self,
        service_id: &ServiceId,
        config: &ServiceConfig,
    ) -> Result<ServiceInfo, NetworkError> {
        self.with_state(|state| {
            if state.services.contains_key(service_id) {
                return Err(NetworkError::ServiceAlreadyExists(service_id.to_string()));
            }
            state.next_ip_suffix = state.next_ip_suffix.wrapping_add(1);
            let private_ip_address = format!("172.16.0.{}", state.next_ip_suffix);
            state.services.insert(service_id.clone(), config.clone());
            state
                .ip_addresses
                .insert(service_id.clone(), private_ip_address.clone());
            state.calls.push(NetworkCall::AddService(service_id.clone()));
            Ok(ServiceInfo {
                service_id: service_id.clone(),
                private_ip_address,
            })
        })
    }

    async fn start_service(&self, service_id: &ServiceId) -> Result<(), NetworkError> {
        self.with_state(|state| {
            require_service(state, service_id)?;
            state.calls.push(NetworkCall::StartService(service_id.clone()));
            Ok(())
        })
    }

    async fn stop_service(&self, service_id: &ServiceId) -> Result<(), NetworkError> {
        self.with_state(|state| {
            require_service(state, service_id)?;
            state.calls.push(NetworkCall::StopService(service_id.clone()));
            Ok(())
        })
    }

    async fn remove_service(&self, service_id: &ServiceId) -> Result<(), NetworkError> {
        self.with_state(|state| {
            require_service(state, service_id)?;
            state.services.remove(service_id);
            state.ip_addresses.remove(service_id);
            state.calls.push(NetworkCall::RemoveService(service_id.clone()));
            Ok(())
        })
    }

    async fn get_service_ip(&self, service_id: &ServiceId) -> Result<String, NetworkError> {
        self.with_state(|state| {
            state
                .ip_addresses
                .get(service_id)
                .cloned()
                .ok_or_else(|| NetworkError::ServiceNotFound(service_id.to_string()))
        })
    }

    async fn exec_command(
        &self,
        service_id: &ServiceId,
        command: &[String],
    ) -> Result<ExecResult, NetworkError> {
        self.with_state(|state| {
            require_service(state, service_id)?;
            state
                .calls
                .push(NetworkCall::Exec(service_id.clone(), command.to_vec()));
            Ok(())
        })?;

        Ok(self
            .exec_results
            .get(service_id)
            .cloned()
            .unwrap_or(ExecResult {
                exit_code: 0,
                output: String::new(),
            }))
    }

    async fn repartition(&self, topology: &PartitionTopology) -> Result<(), NetworkError> {
        self.with_state(|state| {
            for members in topology.partitions.values() {
                for service_id in members {
                    require_service(state, service_id)?;
                }
            }
            state.calls.push(NetworkCall::Repartition(
                topology.partitions.keys().cloned().collect(),
            ));
            Ok(())
        })
    }
}

/// Facts engine answering from a fixed table
#[derive(Default)]
pub struct StaticFactsEngine {
    facts: HashMap<(ServiceId, String), String>,
}

impl StaticFactsEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fact(mut self, service_id: &str, fact_name: &str, value: &str) -> Self {
        self.facts.insert(
            (ServiceId::new(service_id), fact_name.to_string()),
            value.to_string(),
        );
        self
    }
}

#[async_trait]
impl FactsEngine for StaticFactsEngine {
    async fn wait_for_fact(
        &self,
        service_id: &ServiceId,
        fact_name: &str,
    ) -> Result<String, NetworkError> {
        self.facts
            .get(&(service_id.clone(), fact_name.to_string()))
            .cloned()
            .ok_or_else(|| NetworkError::FactUnavailable {
                service: service_id.to_string(),
                fact: fact_name.to_string(),
                reason: "no value recorded".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_then_exec_records_calls() {
        let network = RecordingServiceNetwork::new().with_exec_result("db", 0, "ok");
        let id = ServiceId::new("db");
        let info = network
            .add_service(&id, &ServiceConfig::default())
            .await
            .unwrap();
        assert_eq!(info.private_ip_address, "172.16.0.1");

        let result = network
            .exec_command(&id, &["echo".to_string(), "hi".to_string()])
            .await
            .unwrap();
        assert_eq!(result.output, "ok");
        assert_eq!(network.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_service_ip_is_forgotten_on_remove() {
        let network = RecordingServiceNetwork::new();
        let id = ServiceId::new("db");
        network.add_service(&id, &ServiceConfig::default()).await.unwrap();
        assert_eq!(network.get_service_ip(&id).await.unwrap(), "172.16.0.1");

        network.remove_service(&id).await.unwrap();
        assert_eq!(
            network.get_service_ip(&id).await,
            Err(NetworkError::ServiceNotFound("db".to_string()))
        );
    }

    #[tokio::test]
    async fn test_operations_on_unknown_service_fail() {
        let network = RecordingServiceNetwork::new();
        let result = network.stop_service(&ServiceId::new("ghost")).await;
        assert_eq!(result, Err(NetworkError::ServiceNotFound("ghost".to_string())));
    }
}
