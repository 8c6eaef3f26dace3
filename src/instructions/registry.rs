//! Registry of the script built-ins that construct instructions

use super::add_service::AddServiceBuiltin;
use super::exec::ExecBuiltin;
use super::repartition::RepartitionBuiltin;
use super::service_lifecycle::{LifecycleOperation, ServiceLifecycleBuiltin};
use super::wait::WaitBuiltin;
use super::InstructionBuiltin;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Instruction built-ins by name
#[derive(Clone, Default)]
pub struct InstructionRegistry {
    builtins: BTreeMap<String, Arc<dyn InstructionBuiltin>>,
}

impl InstructionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with every built-in instruction pre-registered
    pub fn with_core_instructions() -> Self {
        let mut registry = Self::new();

        registry.register(AddServiceBuiltin);
        registry.register(ServiceLifecycleBuiltin(LifecycleOperation::Remove));
        registry.register(ServiceLifecycleBuiltin(LifecycleOperation::Start));
        registry.register(ServiceLifecycleBuiltin(LifecycleOperation::Stop));
        registry.register(ExecBuiltin);
        registry.register(WaitBuiltin);
        registry.register(RepartitionBuiltin);

        registry
    }

    pub fn register(&mut self, builtin: impl InstructionBuiltin + 'static) {
        self.builtins
            .insert(builtin.name().to_string(), Arc::new(builtin));
    }

    pub fn get(&self, name: &str) -> Option<&dyn InstructionBuiltin> {
        self.builtins.get(name).map(|b| b.as_ref())
    }

    pub fn names(&self) -> Vec<String> {
        self.builtins.keys().cloned().collect()
    }
}
