//! Startosis Engine - script-to-execution pipeline for enclave provisioning
//!
//! Scripts written in a small, deterministic, Python-like language are
//! interpreted into typed instructions, validated against the enclave's
//! preconditions and executed in order against a service network.

pub mod backend;
pub mod context;
pub mod engine;
pub mod instructions;
pub mod modules;
pub mod network;
pub mod script;
pub mod types;

pub use context::{CancelHandle, Context, ContextError};
pub use engine::{
    InterpretationError, RunResponse, StartosisExecutor, StartosisInterpreter, StartosisRunner,
    StartosisValidator,
};
pub use types::*;
