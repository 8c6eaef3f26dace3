//! Embedded, deterministic, Python-like script language.
//!
//! Parsing and evaluation are done by the `starlark` crate. This module adds
//! what the pipeline needs on top: every undefined name reported at once,
//! a nesting limit checked before parsing, instruction built-ins that call
//! back into a [`ScriptHost`], and errors turned into position-tagged frames.

pub mod convert;
pub mod eval;
pub mod globals;
pub mod value;

use crate::types::ScriptPosition;
use starlark::environment::FrozenModule;
use thiserror::Error;

pub use eval::{exec_module, EntryPoint, MAX_NESTING, TOPLEVEL};
pub use value::{CallArgs, Value};

/// One entry of a static error list or an evaluation backtrace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub description: String,
    pub position: ScriptPosition,
}

impl Frame {
    pub fn new(description: impl Into<String>, position: ScriptPosition) -> Self {
        Self {
            description: description.into(),
            position,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    /// Every static problem in the file, in source order
    #[error("{} static error(s)", .0.len())]
    Static(Vec<Frame>),

    /// Runtime failure; `backtrace` runs from the innermost call outwards
    #[error("{message}")]
    Eval {
        message: String,
        backtrace: Vec<Frame>,
    },
}

impl ScriptError {
    pub fn eval(message: impl Into<String>) -> Self {
        ScriptError::Eval {
            message: message.into(),
            backtrace: Vec::new(),
        }
    }
}

/// Capabilities the embedding application lends to a running script
pub trait ScriptHost {
    fn print(&mut self, text: &str);

    /// Evaluates (or fetches from cache) the module behind `locator`
    fn load(&mut self, locator: &str) -> Result<FrozenModule, String>;

    /// Runs the instruction built-in `name` called at `position`
    fn call_builtin(
        &mut self,
        name: &str,
        args: CallArgs,
        position: &ScriptPosition,
    ) -> Result<Value, String>;
}
