//! `start_service`, `stop_service` and `remove_service`

use super::add_service::parse_service_id;
use super::args::{self, InstructionArgs};
use super::{
    fmt_single_line, BuiltInstruction, Collaborators, InstructionBuiltin, InstructionError,
    KurtosisInstruction,
};
use crate::context::Context;
use crate::engine::{ValidationError, ValidatorEnvironment};
use crate::script::{CallArgs, Value};
use crate::types::{ScriptPosition, ServiceId};
use async_trait::async_trait;
use std::fmt;
use tracing::info;

const SERVICE_ID_ARG: &str = "service_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleOperation {
    Start,
    Stop,
    Remove,
}

impl LifecycleOperation {
    pub fn builtin_name(&self) -> &'static str {
        match self {
            Self::Start => "start_service",
            Self::Stop => "stop_service",
            Self::Remove => "remove_service",
        }
    }
}

#[derive(Debug)]
pub struct ServiceLifecycleInstruction {
    collaborators: Collaborators,
    position: ScriptPosition,
    operation: LifecycleOperation,
    service_id: ServiceId,
}

impl ServiceLifecycleInstruction {
    pub fn new(
        collaborators: Collaborators,
        position: ScriptPosition,
        operation: LifecycleOperation,
        service_id: ServiceId,
    ) -> Self {
        Self {
            collaborators,
            position,
            operation,
            service_id,
        }
    }
}

/// Rejects references to a service an earlier instruction removed
pub(crate) fn require_live_service(
    env: &ValidatorEnvironment,
    service_id: &ServiceId,
) -> Result<(), ValidationError> {
    if env.is_removed(service_id) {
        Err(ValidationError::new(format!(
            "Service '{service_id}' is removed by an earlier instruction"
        )))
    } else {
        Ok(())
    }
}

#[async_trait]
impl KurtosisInstruction for ServiceLifecycleInstruction {
    fn name(&self) -> &'static str {
        self.operation.builtin_name()
    }

    fn position(&self) -> &ScriptPosition {
        &self.position
    }

    fn arguments(&self) -> InstructionArgs {
        InstructionArgs::new().add(SERVICE_ID_ARG, self.service_id.as_str())
    }

    fn validate_and_update_environment(
        &self,
        env: &mut ValidatorEnvironment,
    ) -> Result<(), ValidationError> {
        require_live_service(env, &self.service_id)?;
        if self.operation == LifecycleOperation::Remove {
            env.remove_service(&self.service_id);
        }
        Ok(())
    }

    async fn execute(&self, _ctx: &Context) -> Result<Option<String>, InstructionError> {
        let network = &self.collaborators.network;
        match self.operation {
            LifecycleOperation::Start => network.start_service(&self.service_id).await?,
            LifecycleOperation::Stop => network.stop_service(&self.service_id).await?,
            LifecycleOperation::Remove => network.remove_service(&self.service_id).await?,
        }
        info!("{} {}", self.operation.builtin_name(), self.service_id);
        Ok(None)
    }
}

impl fmt::Display for ServiceLifecycleInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_single_line(self, f)
    }
}

pub struct ServiceLifecycleBuiltin(pub LifecycleOperation);

impl InstructionBuiltin for ServiceLifecycleBuiltin {
    fn name(&self) -> &'static str {
        self.0.builtin_name()
    }

    fn build(
        &self,
        args: CallArgs,
        position: ScriptPosition,
        collaborators: &Collaborators,
    ) -> Result<BuiltInstruction, String> {
        let name = self.0.builtin_name();
        let bound = args.unpack(name, &[SERVICE_ID_ARG])?.into_iter().next().flatten();
        let service_id = parse_service_id(&args::present(bound, name, SERVICE_ID_ARG)?)?;
        Ok(BuiltInstruction {
            instruction: Box::new(ServiceLifecycleInstruction::new(
                collaborators.clone(),
                position,
                self.0,
                service_id,
            )),
            placeholder: Value::None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instructions::registry::tests::collaborators;

    fn instruction(operation: LifecycleOperation) -> ServiceLifecycleInstruction {
        ServiceLifecycleInstruction::new(
            collaborators(),
            ScriptPosition::new("dummyFile", 1, 1),
            operation,
            ServiceId::new("example-service-id"),
        )
    }

    #[test]
    fn test_canonical_instruction() {
        assert_eq!(
            instruction(LifecycleOperation::Stop).canonical_instruction(),
            "# from: dummyFile[1:1]\nstop_service(\n\tservice_id=\"example-service-id\"\n)"
        );
        assert_eq!(
            instruction(LifecycleOperation::Remove).to_string(),
            "remove_service(service_id=\"example-service-id\")"
        );
    }

    #[test]
    fn test_service_from_an_earlier_run_passes_validation() {
        let mut env = ValidatorEnvironment::new();
        instruction(LifecycleOperation::Stop)
            .validate_and_update_environment(&mut env)
            .unwrap();
        instruction(LifecycleOperation::Start)
            .validate_and_update_environment(&mut env)
            .unwrap();
    }

    #[test]
    fn test_remove_forgets_service() {
        let mut env = ValidatorEnvironment::new();
        instruction(LifecycleOperation::Remove)
            .validate_and_update_environment(&mut env)
            .unwrap();
        let err = instruction(LifecycleOperation::Stop)
            .validate_and_update_environment(&mut env)
            .unwrap_err();
        assert_eq!(
            err.message,
            "Service 'example-service-id' is removed by an earlier instruction"
        );
    }
}
