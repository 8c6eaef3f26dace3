use super::add_service::parse_service_id;
use super::args::{self, InstructionArgs};
use super::placeholders;
use super::service_lifecycle::require_live_service;
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

pub const WAIT: &str = "wait";

const SERVICE_ID_ARG: &str = "service_id";
const FACT_NAME_ARG: &str = "fact_name";

#[derive(Debug)]
pub struct WaitInstruction {
    collaborators: Collaborators,
    position: ScriptPosition,
    service_id: ServiceId,
    fact_name: String,
}

impl WaitInstruction {
    pub fn new(
        collaborators: Collaborators,
        position: ScriptPosition,
        service_id: ServiceId,
        fact_name: impl Into<String>,
    ) -> Self {
        Self {
            collaborators,
            position,
            service_id,
            fact_name: fact_name.into(),
        }
    }
}

pub fn fact_placeholder(service_id: &ServiceId, fact_name: &str) -> String {
    format!("{{{{kurtosis:{service_id}:{fact_name}.fact}}}}")
}

#[async_trait]
impl KurtosisInstruction for WaitInstruction {
    fn name(&self) -> &'static str {
        WAIT
    }

    fn position(&self) -> &ScriptPosition {
        &self.position
    }

    fn arguments(&self) -> InstructionArgs {
        InstructionArgs::new()
            .add(SERVICE_ID_ARG, self.service_id.as_str())
            .add(FACT_NAME_ARG, self.fact_name.as_str())
    }

    fn validate_and_update_environment(
        &self,
        env: &mut ValidatorEnvironment,
    ) -> Result<(), ValidationError> {
        require_live_service(env, &self.service_id)
    }

    async fn execute(&self, ctx: &Context) -> Result<Option<String>, InstructionError> {
        let fact_name = placeholders::resolve(ctx, &self.collaborators, &self.fact_name).await?;
        let value = ctx
            .run(
                self.collaborators
                    .facts
                    .wait_for_fact(&self.service_id, &fact_name),
            )
            .await??;
        info!(
            "Fact {} of service {} is available",
            self.fact_name, self.service_id
        );
        Ok(Some(value))
    }
}

impl fmt::Display for WaitInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_single_line(self, f)
    }
}

pub struct WaitBuiltin;

impl InstructionBuiltin for WaitBuiltin {
    fn name(&self) -> &'static str {
        WAIT
    }

    fn build(
        &self,
        args: CallArgs,
        position: ScriptPosition,
        collaborators: &Collaborators,
    ) -> Result<BuiltInstruction, String> {
        let mut bound = args
            .unpack(WAIT, &[SERVICE_ID_ARG, FACT_NAME_ARG])?
            .into_iter();
        let service_id =
            parse_service_id(&args::present(bound.next().flatten(), WAIT, SERVICE_ID_ARG)?)?;
        let fact_name = args::string_arg(
            FACT_NAME_ARG,
            &args::present(bound.next().flatten(), WAIT, FACT_NAME_ARG)?,
        )?;
        let placeholder = Value::string(fact_placeholder(&service_id, &fact_name));

        Ok(BuiltInstruction {
            instruction: Box::new(WaitInstruction::new(
                collaborators.clone(),
                position,
                service_id,
                fact_name,
            )),
            placeholder,
        })
    }
}
