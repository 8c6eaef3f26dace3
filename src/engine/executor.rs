use super::error::ExecutionError;
use crate::context::Context;
use crate::instructions::{InstructionError, KurtosisInstruction, SerializedInstruction};
use std::io::Write;
use thiserror::Error;
use tracing::{debug, error, info};

/// Execution stopped at an instruction; `partial_log` holds the
/// instructions that completed before it
#[derive(Debug, Error)]
#[error("{error}")]
pub struct ExecutionFailure {
    pub partial_log: Vec<SerializedInstruction>,
    pub error: ExecutionError,
}

/// Runs instruction lists in order, stopping at the first failure
#[derive(Debug, Clone, Default)]
pub struct StartosisExecutor;

impl StartosisExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Streams each instruction's canonical form to `sink` as it is reached,
    /// then executes it unless `dry_run` is set. No compensation happens for
    /// instructions that completed before a failure.
    pub async fn execute<W>(
        &self,
        ctx: &Context,
        dry_run: bool,
        instructions: &[Box<dyn KurtosisInstruction>],
        sink: &mut W,
    ) -> Result<Vec<SerializedInstruction>, ExecutionFailure>
    where
        W: Write + Send + ?Sized,
    {
        let mut log = Vec::with_capacity(instructions.len());

        for (index, instruction) in instructions.iter().enumerate() {
            let number = index + 1;
            let canonical = instruction.canonical_instruction();
            let fail = |log: Vec<SerializedInstruction>, message: String| ExecutionFailure {
                partial_log: log,
                error: ExecutionError::new(message).for_instruction(
                    number,
                    canonical.clone(),
                    instruction.position().clone(),
                ),
            };

            if let Err(interrupted) = ctx.check() {
                return Err(fail(log, interrupted.to_string()));
            }

            if let Err(e) = writeln!(sink, "{canonical}") {
                return Err(fail(log, format!("Failed writing the instruction to the output stream: {e}")));
            }

            if dry_run {
                log.push(SerializedInstruction::new(canonical));
                continue;
            }

            debug!("Executing instruction {}: {}", number, instruction);
            let result = match ctx.run(instruction.execute(ctx)).await {
                Ok(result) => result,
                Err(interrupted) => Err(InstructionError::Interrupted(interrupted)),
            };
            match result {
                Ok(result) => {
                    log.push(SerializedInstruction::new(canonical).with_result(result));
                }
                Err(err) => {
                    error!("Instruction {} failed: {}", number, err);
                    return Err(fail(log, err.to_string()));
                }
            }
        }

        info!(
            "{} {} instructions",
            if dry_run { "Dry-ran" } else { "Executed" },
            log.len()
        );
        Ok(log)
    }
}
