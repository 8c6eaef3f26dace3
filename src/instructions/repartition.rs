use super::add_service::parse_service_id;
use super::args::{self, InstructionArgs};
use super::{
    fmt_single_line, BuiltInstruction, Collaborators, InstructionBuiltin, InstructionError,
    KurtosisInstruction,
};
use crate::context::Context;
use crate::engine::{ValidationError, ValidatorEnvironment};
use crate::script::{CallArgs, Value};
use crate::types::{PartitionConnection, PartitionTopology, ScriptPosition, ServiceId};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::info;

pub const REPARTITION: &str = "repartition";

const PARTITIONS_ARG: &str = "partitions";
const CONNECTIONS_ARG: &str = "connections";
const DEFAULT_CONNECTION_ARG: &str = "default_connection";
const DEFAULT_CONNECTION: PartitionConnection = PartitionConnection::Allowed;

#[derive(Debug)]
pub struct RepartitionInstruction {
    collaborators: Collaborators,
    position: ScriptPosition,
    /// Partition membership as written, duplicates included
    members: BTreeMap<String, Vec<ServiceId>>,
    topology: PartitionTopology,
}

impl RepartitionInstruction {
    pub fn new(
        collaborators: Collaborators,
        position: ScriptPosition,
        members: BTreeMap<String, Vec<ServiceId>>,
        connections: BTreeMap<(String, String), PartitionConnection>,
        default_connection: PartitionConnection,
    ) -> Self {
        let partitions = members
            .iter()
            .map(|(partition, ids)| (partition.clone(), ids.iter().cloned().collect()))
            .collect();
        Self {
            collaborators,
            position,
            members,
            topology: PartitionTopology {
                partitions,
                connections,
                default_connection: Some(default_connection),
            },
        }
    }

    pub fn topology(&self) -> &PartitionTopology {
        &self.topology
    }
}

#[async_trait]
impl KurtosisInstruction for RepartitionInstruction {
    fn name(&self) -> &'static str {
        REPARTITION
    }

    fn position(&self) -> &ScriptPosition {
        &self.position
    }

    fn arguments(&self) -> InstructionArgs {
        let partitions: serde_json::Map<String, serde_json::Value> = self
            .members
            .iter()
            .map(|(partition, ids)| {
                let ids: Vec<&str> = ids.iter().map(ServiceId::as_str).collect();
                (partition.clone(), serde_json::json!(ids))
            })
            .collect();
        let connections: serde_json::Map<String, serde_json::Value> = self
            .topology
            .connections
            .iter()
            .map(|((a, b), connection)| (format!("{a}:{b}"), connection.as_str().into()))
            .collect();
        let default_connection = self
            .topology
            .default_connection
            .unwrap_or(DEFAULT_CONNECTION);

        let args = InstructionArgs::new().add(PARTITIONS_ARG, serde_json::Value::Object(partitions));
        let args = if connections.is_empty() {
            args
        } else {
            args.add(CONNECTIONS_ARG, serde_json::Value::Object(connections))
        };
        args.add_unless_default(
            DEFAULT_CONNECTION_ARG,
            default_connection.as_str(),
            DEFAULT_CONNECTION.as_str(),
        )
    }

    fn validate_and_update_environment(
        &self,
        env: &mut ValidatorEnvironment,
    ) -> Result<(), ValidationError> {
        let mut assigned: BTreeMap<&ServiceId, &str> = BTreeMap::new();
        for (partition, ids) in &self.members {
            for service_id in ids {
                if env.is_removed(service_id) {
                    return Err(ValidationError::new(format!(
                        "Service '{service_id}' of partition '{partition}' is removed by an earlier instruction"
                    )));
                }
                if let Some(previous) = assigned.insert(service_id, partition) {
                    return Err(ValidationError::new(format!(
                        "Service '{service_id}' is assigned to both partition '{previous}' and partition '{partition}'"
                    )));
                }
            }
        }

        for (a, b) in self.topology.connections.keys() {
            for partition in [a, b] {
                if !self.members.contains_key(partition) {
                    return Err(ValidationError::new(format!(
                        "Connection '{a}:{b}' references undeclared partition '{partition}'"
                    )));
                }
            }
        }
        Ok(())
    }

    async fn execute(&self, _ctx: &Context) -> Result<Option<String>, InstructionError> {
        self.collaborators
            .network
            .repartition(&self.topology)
            .await?;
        info!(
            "Repartitioned network into {} partitions",
            self.topology.partitions.len()
        );
        Ok(None)
    }
}

impl fmt::Display for RepartitionInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_single_line(self, f)
    }
}

fn parse_connection(name: &str, value: &Value) -> Result<PartitionConnection, String> {
    let text = args::string_arg(name, value)?;
    PartitionConnection::parse(&text)
        .ok_or_else(|| format!("Connection '{text}' should be one of ALLOWED, BLOCKED"))
}

pub struct RepartitionBuiltin;

impl InstructionBuiltin for RepartitionBuiltin {
    fn name(&self) -> &'static str {
        REPARTITION
    }

    fn build(
        &self,
        args: CallArgs,
        position: ScriptPosition,
        collaborators: &Collaborators,
    ) -> Result<BuiltInstruction, String> {
        let mut bound = args
            .unpack(
                REPARTITION,
                &[PARTITIONS_ARG, "connections?", "default_connection?"],
            )?
            .into_iter();

        let partitions = args::present(bound.next().flatten(), REPARTITION, PARTITIONS_ARG)?;
        let mut members = BTreeMap::new();
        for (key, ids) in args::dict_arg(PARTITIONS_ARG, &partitions)? {
            let partition = args::string_arg("partition name", &key)?;
            let ids = args::string_list_arg(&partition, &ids)?
                .iter()
                .map(|id| parse_service_id(&Value::string(id.as_str())))
                .collect::<Result<Vec<_>, _>>()?;
            members.insert(partition, ids);
        }

        let mut connections = BTreeMap::new();
        if let Some(value) = bound.next().flatten() {
            for (key, connection) in args::dict_arg(CONNECTIONS_ARG, &value)? {
                let key = args::string_arg("connection key", &key)?;
                let (a, b) = key
                    .split_once(':')
                    .filter(|(a, b)| !a.is_empty() && !b.is_empty())
                    .ok_or_else(|| {
                        format!("Connection key '{key}' must have the form 'partition_a:partition_b'")
                    })?;
                connections.insert(
                    (a.to_string(), b.to_string()),
                    parse_connection(CONNECTIONS_ARG, &connection)?,
                );
            }
        }

        let default_connection = match bound.next().flatten() {
            Some(value) => parse_connection(DEFAULT_CONNECTION_ARG, &value)?,
            None => DEFAULT_CONNECTION,
        };

        Ok(BuiltInstruction {
            instruction: Box::new(RepartitionInstruction::new(
                collaborators.clone(),
                position,
                members,
                connections,
                default_connection,
            )),
            placeholder: Value::None,
        })
    }
}
