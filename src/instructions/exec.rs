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
use tracing::debug;

pub const EXEC: &str = "exec";

const SERVICE_ID_ARG: &str = "service_id";
const COMMAND_ARG: &str = "command";
const EXPECTED_EXIT_CODE_ARG: &str = "expected_exit_code";
const DEFAULT_EXPECTED_EXIT_CODE: i32 = 0;

#[derive(Debug)]
pub struct ExecInstruction {
    collaborators: Collaborators,
    position: ScriptPosition,
    service_id: ServiceId,
    command: Vec<String>,
    expected_exit_code: i32,
}

impl ExecInstruction {
    pub fn new(
        collaborators: Collaborators,
        position: ScriptPosition,
        service_id: ServiceId,
        command: Vec<String>,
        expected_exit_code: i32,
    ) -> Self {
        Self {
            collaborators,
            position,
            service_id,
            command,
            expected_exit_code,
        }
    }
}

#[async_trait]
impl KurtosisInstruction for ExecInstruction {
    fn name(&self) -> &'static str {
        EXEC
    }

    fn position(&self) -> &ScriptPosition {
        &self.position
    }

    fn arguments(&self) -> InstructionArgs {
        InstructionArgs::new()
            .add(SERVICE_ID_ARG, self.service_id.as_str())
            .add(COMMAND_ARG, self.command.clone())
            .add_unless_default(
                EXPECTED_EXIT_CODE_ARG,
                self.expected_exit_code,
                DEFAULT_EXPECTED_EXIT_CODE,
            )
    }

    fn validate_and_update_environment(
        &self,
        env: &mut ValidatorEnvironment,
    ) -> Result<(), ValidationError> {
        require_live_service(env, &self.service_id)?;
        if self.command.is_empty() {
            return Err(ValidationError::new("exec command must not be empty"));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &Context) -> Result<Option<String>, InstructionError> {
        let command = placeholders::resolve_all(ctx, &self.collaborators, &self.command).await?;
        let result = ctx
            .run(self.collaborators.network.exec_command(&self.service_id, &command))
            .await??;
        debug!(
            "exec on {} exited with {}",
            self.service_id, result.exit_code
        );
        if result.exit_code != self.expected_exit_code {
            return Err(InstructionError::UnexpectedExitCode {
                service_id: self.service_id.to_string(),
                command,
                expected: self.expected_exit_code,
                actual: result.exit_code,
                output: result.output,
            });
        }
        Ok(Some(result.output))
    }
}

impl fmt::Display for ExecInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_single_line(self, f)
    }
}

/// Accepts a list of strings or a shell-style command line
fn parse_command(value: &Value) -> Result<Vec<String>, String> {
    match value {
        Value::Str(line) => shell_words::split(line)
            .map_err(|e| format!("Argument '{COMMAND_ARG}' is not a valid command line: {e}")),
        other => args::string_list_arg(COMMAND_ARG, other),
    }
}

pub struct ExecBuiltin;

impl InstructionBuiltin for ExecBuiltin {
    fn name(&self) -> &'static str {
        EXEC
    }

    fn build(
        &self,
        args: CallArgs,
        position: ScriptPosition,
        collaborators: &Collaborators,
    ) -> Result<BuiltInstruction, String> {
        let mut bound = args
            .unpack(
                EXEC,
                &[SERVICE_ID_ARG, COMMAND_ARG, "expected_exit_code?"],
            )?
            .into_iter();
        let service_id =
            parse_service_id(&args::present(bound.next().flatten(), EXEC, SERVICE_ID_ARG)?)?;
        let command = parse_command(&args::present(bound.next().flatten(), EXEC, COMMAND_ARG)?)?;
        let expected_exit_code = match bound.next().flatten() {
            Some(value) => {
                let code = args::int_arg(EXPECTED_EXIT_CODE_ARG, &value)?;
                i32::try_from(code)
                    .map_err(|_| format!("Expected exit code {code} is out of range"))?
            }
            None => DEFAULT_EXPECTED_EXIT_CODE,
        };

        Ok(BuiltInstruction {
            instruction: Box::new(ExecInstruction::new(
                collaborators.clone(),
                position,
                service_id,
                command,
                expected_exit_code,
            )),
            placeholder: Value::None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instructions::add_service::ip_address_placeholder;
    use crate::instructions::registry::tests::collaborators;
    use crate::network::mock::NetworkCall;
    use crate::network::{RecordingServiceNetwork, ServiceNetwork, StaticFactsEngine};
    use crate::types::ServiceConfig;
    use std::sync::Arc;

    #[test]
    fn test_canonical_instruction_omits_default_exit_code() {
        let instruction = ExecInstruction::new(
            collaborators(),
            ScriptPosition::new("dummyFile", 1, 1),
            ServiceId::new("example-service-id"),
            vec!["mkdir".to_string(), "-p".to_string(), "/tmp/foo".to_string()],
            0,
        );
        assert_eq!(
            instruction.canonical_instruction(),
            "# from: dummyFile[1:1]\nexec(\n\tcommand=[\"mkdir\", \"-p\", \"/tmp/foo\"],\n\tservice_id=\"example-service-id\"\n)"
        );
    }

    #[test]
    fn test_string_command_is_split() {
        assert_eq!(
            parse_command(&Value::string("sh -c 'echo hello world'")).unwrap(),
            vec!["sh", "-c", "echo hello world"]
        );
        assert!(parse_command(&Value::string("echo 'unterminated")).is_err());
    }

    #[tokio::test]
    async fn test_unexpected_exit_code_fails() {
        let network = Arc::new(RecordingServiceNetwork::new().with_exec_result("db", 1, "nope"));
        network
            .add_service(&ServiceId::new("db"), &ServiceConfig::default())
            .await
            .unwrap();
        let instruction = ExecInstruction::new(
            Collaborators::new(network, Arc::new(StaticFactsEngine::new())),
            ScriptPosition::new("main", 3, 5),
            ServiceId::new("db"),
            vec!["false".to_string()],
            0,
        );
        let err = instruction.execute(&Context::background()).await.unwrap_err();
        assert!(matches!(
            err,
            InstructionError::UnexpectedExitCode { actual: 1, .. }
        ));
    }

    #[tokio::test]
    async fn test_command_receives_service_address() {
        let network = Arc::new(RecordingServiceNetwork::new());
        network
            .add_service(&ServiceId::new("db"), &ServiceConfig::default())
            .await
            .unwrap();
        let instruction = ExecInstruction::new(
            Collaborators::new(network.clone(), Arc::new(StaticFactsEngine::new())),
            ScriptPosition::new("main", 3, 5),
            ServiceId::new("db"),
            vec!["ping".to_string(), ip_address_placeholder(&ServiceId::new("db"))],
            0,
        );
        instruction.execute(&Context::background()).await.unwrap();
        assert_eq!(
            network.calls().last(),
            Some(&NetworkCall::Exec(
                ServiceId::new("db"),
                vec!["ping".to_string(), "172.16.0.1".to_string()],
            ))
        );
    }
}
