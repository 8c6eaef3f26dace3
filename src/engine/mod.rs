//! Script-to-execution pipeline: interpret, validate, execute

pub mod environment;
pub mod error;
pub mod executor;
pub mod interpreter;
pub mod runner;
pub mod validator;

pub use environment::ValidatorEnvironment;
pub use error::{
    CallFrame, ExecutionError, InstructionRef, InterpretationError, ValidationError,
    MULTIPLE_ERRORS_MSG, SINGLE_ERROR_MSG,
};
pub use executor::{ExecutionFailure, StartosisExecutor};
pub use interpreter::{InterpretedScript, StartosisInterpreter, SCRIPT_FILE};
pub use runner::{RunError, RunResponse, StartosisRunner};
pub use validator::StartosisValidator;
