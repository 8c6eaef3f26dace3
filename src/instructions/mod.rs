//! Infrastructure operations produced by scripts
//!
//! Each script built-in that touches the enclave builds one instruction. The
//! pipeline only ever sees [`KurtosisInstruction`] trait objects; new kinds
//! are added by implementing [`InstructionBuiltin`] and registering it.

pub mod add_service;
pub mod args;
pub mod exec;
mod placeholders;
pub mod registry;
pub mod repartition;
pub mod service_lifecycle;
pub mod wait;

use crate::context::{Context, ContextError};
use crate::engine::{ValidationError, ValidatorEnvironment};
use crate::network::{FactsEngine, NetworkError, ServiceNetwork};
use crate::script::{CallArgs, Value};
use crate::types::ScriptPosition;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub use args::{InstructionArg, InstructionArgs};
pub use registry::InstructionRegistry;

#[derive(Debug, Error)]
pub enum InstructionError {
    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error("Command {command:?} on service '{service_id}' exited with code {actual}, expected {expected}. Output:\n{output}")]
    UnexpectedExitCode {
        service_id: String,
        command: Vec<String>,
        expected: i32,
        actual: i32,
        output: String,
    },

    #[error(transparent)]
    Interrupted(#[from] ContextError),

    #[error("{0}")]
    Failed(String),
}

/// One typed, position-tagged infrastructure operation
#[async_trait]
pub trait KurtosisInstruction: fmt::Display + fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    fn position(&self) -> &ScriptPosition;

    fn arguments(&self) -> InstructionArgs;

    /// Multi-line replayable text form, headed by the source position
    fn canonical_instruction(&self) -> String {
        self.arguments().canonical(self.name(), self.position())
    }

    /// Checks the instruction against what earlier instructions declared and
    /// records what it declares itself. Performs no I/O.
    fn validate_and_update_environment(
        &self,
        env: &mut ValidatorEnvironment,
    ) -> Result<(), ValidationError>;

    /// Performs the side effect; the returned string is the instruction's
    /// result as recorded in the serialized log
    async fn execute(&self, ctx: &Context) -> Result<Option<String>, InstructionError>;
}

/// Single-line rendering shared by every instruction's `Display`
pub(crate) fn fmt_single_line(
    instruction: &dyn KurtosisInstruction,
    f: &mut fmt::Formatter<'_>,
) -> fmt::Result {
    f.write_str(&instruction.arguments().single_line(instruction.name()))
}

/// Replayable log record of one instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedInstruction {
    pub canonical_instruction: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result: Option<String>,
}

impl SerializedInstruction {
    pub fn new(canonical_instruction: impl Into<String>) -> Self {
        Self {
            canonical_instruction: canonical_instruction.into(),
            result: None,
        }
    }

    pub fn with_result(mut self, result: Option<String>) -> Self {
        self.result = result;
        self
    }
}

/// Enclave services instructions execute against
#[derive(Clone)]
pub struct Collaborators {
    pub network: Arc<dyn ServiceNetwork>,
    pub facts: Arc<dyn FactsEngine>,
}

impl Collaborators {
    pub fn new(network: Arc<dyn ServiceNetwork>, facts: Arc<dyn FactsEngine>) -> Self {
        Self { network, facts }
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// What a built-in call hands back to the interpreter
pub struct BuiltInstruction {
    pub instruction: Box<dyn KurtosisInstruction>,
    /// Value the script sees as the call's result
    pub placeholder: Value,
}

/// A script built-in that constructs an instruction
pub trait InstructionBuiltin: Send + Sync {
    fn name(&self) -> &'static str;

    /// Converts the call arguments. Errors are argument-level problems and
    /// surface as evaluation errors at the call site.
    fn build(
        &self,
        args: CallArgs,
        position: ScriptPosition,
        collaborators: &Collaborators,
    ) -> Result<BuiltInstruction, String>;
}
