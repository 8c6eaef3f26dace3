use super::args::{self, InstructionArgs};
use super::placeholders;
use super::{
    fmt_single_line, BuiltInstruction, Collaborators, InstructionBuiltin, InstructionError,
    KurtosisInstruction,
};
use crate::context::Context;
use crate::engine::{ValidationError, ValidatorEnvironment};
use crate::script::{CallArgs, Value};
use crate::types::{Port, PortProtocol, ScriptPosition, ServiceConfig, ServiceId};
use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;
use tracing::info;

pub const ADD_SERVICE: &str = "add_service";

const SERVICE_ID_ARG: &str = "service_id";
const SERVICE_CONFIG_ARG: &str = "service_config";
const CONTAINER_IMAGE_NAME_FIELD: &str = "container_image_name";
const USED_PORTS_FIELD: &str = "used_ports";
const ENTRY_POINT_ARGS_FIELD: &str = "entry_point_args";
const CMD_ARGS_FIELD: &str = "cmd_args";
const ENV_VARS_FIELD: &str = "env_vars";
const PORT_NUMBER_FIELD: &str = "number";
const PORT_PROTOCOL_FIELD: &str = "protocol";

#[derive(Debug)]
pub struct AddServiceInstruction {
    collaborators: Collaborators,
    position: ScriptPosition,
    service_id: ServiceId,
    config: ServiceConfig,
}

impl AddServiceInstruction {
    pub fn new(
        collaborators: Collaborators,
        position: ScriptPosition,
        service_id: ServiceId,
        config: ServiceConfig,
    ) -> Self {
        Self {
            collaborators,
            position,
            service_id,
            config,
        }
    }

    pub fn service_id(&self) -> &ServiceId {
        &self.service_id
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Config with the addresses and facts of other services filled in
    async fn resolved_config(&self, ctx: &Context) -> Result<ServiceConfig, InstructionError> {
        let collaborators = &self.collaborators;
        let mut env_vars = BTreeMap::new();
        for (name, value) in &self.config.env_vars {
            env_vars.insert(
                name.clone(),
                placeholders::resolve(ctx, collaborators, value).await?,
            );
        }
        Ok(ServiceConfig {
            container_image_name: self.config.container_image_name.clone(),
            private_ports: self.config.private_ports.clone(),
            entry_point_args: placeholders::resolve_all(
                ctx,
                collaborators,
                &self.config.entry_point_args,
            )
            .await?,
            cmd_args: placeholders::resolve_all(ctx, collaborators, &self.config.cmd_args).await?,
            env_vars,
        })
    }
}

/// Placeholder the script holds instead of the not-yet-known address
pub fn ip_address_placeholder(service_id: &ServiceId) -> String {
    format!("{{{{kurtosis:{service_id}.ip_address}}}}")
}

fn config_to_json(config: &ServiceConfig) -> serde_json::Value {
    let ports: serde_json::Map<String, serde_json::Value> = config
        .private_ports
        .iter()
        .map(|(name, port)| {
            (
                name.clone(),
                json!({ PORT_NUMBER_FIELD: port.number, PORT_PROTOCOL_FIELD: port.protocol.as_str() }),
            )
        })
        .collect();

    let mut rendered = serde_json::Map::new();
    rendered.insert(CONTAINER_IMAGE_NAME_FIELD.to_string(), json!(config.container_image_name));
    if !ports.is_empty() {
        rendered.insert(USED_PORTS_FIELD.to_string(), serde_json::Value::Object(ports));
    }
    if !config.entry_point_args.is_empty() {
        rendered.insert(ENTRY_POINT_ARGS_FIELD.to_string(), json!(config.entry_point_args));
    }
    if !config.cmd_args.is_empty() {
        rendered.insert(CMD_ARGS_FIELD.to_string(), json!(config.cmd_args));
    }
    if !config.env_vars.is_empty() {
        rendered.insert(ENV_VARS_FIELD.to_string(), json!(config.env_vars));
    }
    serde_json::Value::Object(rendered)
}

#[async_trait]
impl KurtosisInstruction for AddServiceInstruction {
    fn name(&self) -> &'static str {
        ADD_SERVICE
    }

    fn position(&self) -> &ScriptPosition {
        &self.position
    }

    fn arguments(&self) -> InstructionArgs {
        InstructionArgs::new()
            .add(SERVICE_ID_ARG, self.service_id.as_str())
            .add(SERVICE_CONFIG_ARG, config_to_json(&self.config))
    }

    fn validate_and_update_environment(
        &self,
        env: &mut ValidatorEnvironment,
    ) -> Result<(), ValidationError> {
        if !env.add_service(self.service_id.clone()) {
            return Err(ValidationError::new(format!(
                "Service '{}' was already added earlier in the script",
                self.service_id
            )));
        }
        env.require_image(&self.config.container_image_name);
        Ok(())
    }

    async fn execute(&self, ctx: &Context) -> Result<Option<String>, InstructionError> {
        let config = self.resolved_config(ctx).await?;
        let info = ctx
            .run(self.collaborators.network.add_service(&self.service_id, &config))
            .await??;
        info!("Added service {} with IP {}", info.service_id, info.private_ip_address);
        Ok(Some(format!(
            "service '{}' added with IP {}",
            info.service_id, info.private_ip_address
        )))
    }
}

impl fmt::Display for AddServiceInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_single_line(self, f)
    }
}

fn parse_port(name: &str, value: &Value) -> Result<Port, String> {
    let fields = args::struct_arg(name, value)?;
    let number = args::int_arg(
        PORT_NUMBER_FIELD,
        args::required_field(fields, PORT_NUMBER_FIELD, name)?,
    )?;
    let number = u16::try_from(number)
        .ok()
        .filter(|n| *n != 0)
        .ok_or_else(|| format!("Port number {number} of port '{name}' is out of range"))?;
    let protocol = args::string_arg(
        PORT_PROTOCOL_FIELD,
        args::required_field(fields, PORT_PROTOCOL_FIELD, name)?,
    )?;
    let protocol = PortProtocol::parse(&protocol)
        .ok_or_else(|| "Port protocol should be one of TCP, SCTP, UDP".to_string())?;
    Ok(Port { number, protocol })
}

/// Converts the `service_config` struct of an `add_service` call
pub fn parse_service_config(value: &Value) -> Result<ServiceConfig, String> {
    let fields = args::struct_arg(SERVICE_CONFIG_ARG, value)?;
    let container_image_name = args::string_arg(
        CONTAINER_IMAGE_NAME_FIELD,
        args::required_field(fields, CONTAINER_IMAGE_NAME_FIELD, SERVICE_CONFIG_ARG)?,
    )?;

    let mut private_ports = BTreeMap::new();
    if let Some(ports) = fields.get(USED_PORTS_FIELD) {
        for (key, port) in args::dict_arg(USED_PORTS_FIELD, ports)? {
            let port_name = args::string_arg("port name", &key)?;
            let port = parse_port(&port_name, &port)?;
            private_ports.insert(port_name, port);
        }
    }

    let entry_point_args = match fields.get(ENTRY_POINT_ARGS_FIELD) {
        Some(value) => args::string_list_arg(ENTRY_POINT_ARGS_FIELD, value)?,
        None => Vec::new(),
    };
    let cmd_args = match fields.get(CMD_ARGS_FIELD) {
        Some(value) => args::string_list_arg(CMD_ARGS_FIELD, value)?,
        None => Vec::new(),
    };
    let env_vars = match fields.get(ENV_VARS_FIELD) {
        Some(value) => args::string_dict_arg(ENV_VARS_FIELD, value)?,
        None => BTreeMap::new(),
    };

    Ok(ServiceConfig {
        container_image_name,
        private_ports,
        entry_point_args,
        cmd_args,
        env_vars,
    })
}

/// Parses and checks a `service_id` argument
pub fn parse_service_id(value: &Value) -> Result<ServiceId, String> {
    let service_id = ServiceId::new(args::string_arg(SERVICE_ID_ARG, value)?);
    if !service_id.is_valid() {
        return Err(format!(
            "Service ID '{service_id}' is invalid: it must start with a letter or digit and contain only letters, digits, '.', '_' and '-'"
        ));
    }
    Ok(service_id)
}

pub struct AddServiceBuiltin;

impl InstructionBuiltin for AddServiceBuiltin {
    fn name(&self) -> &'static str {
        ADD_SERVICE
    }

    fn build(
        &self,
        args: CallArgs,
        position: ScriptPosition,
        collaborators: &Collaborators,
    ) -> Result<BuiltInstruction, String> {
        let mut bound = args
            .unpack(ADD_SERVICE, &[SERVICE_ID_ARG, SERVICE_CONFIG_ARG])?
            .into_iter();
        let service_id = parse_service_id(&args::present(bound.next().flatten(), ADD_SERVICE, SERVICE_ID_ARG)?)?;
        let config = parse_service_config(&args::present(
            bound.next().flatten(),
            ADD_SERVICE,
            SERVICE_CONFIG_ARG,
        )?)?;

        let placeholder = Value::structure(BTreeMap::from([
            (
                SERVICE_ID_ARG.to_string(),
                Value::string(service_id.as_str()),
            ),
            (
                "ip_address".to_string(),
                Value::string(ip_address_placeholder(&service_id)),
            ),
        ]));

        Ok(BuiltInstruction {
            instruction: Box::new(AddServiceInstruction::new(
                collaborators.clone(),
                position,
                service_id,
                config,
            )),
            placeholder,
        })
    }
}
