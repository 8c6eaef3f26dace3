use crate::context::ContextError;
use crate::script::Frame;
use crate::types::ScriptPosition;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use thiserror::Error;

pub const SINGLE_ERROR_MSG: &str = "Error caught interpreting the Startosis script.";
pub const MULTIPLE_ERRORS_MSG: &str =
    "Multiple errors caught interpreting the Startosis script. Listing each of them below.";
pub const EVALUATION_ERROR_PREFIX: &str = "Evaluation error: ";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallFrame {
    pub description: String,
    pub position: ScriptPosition,
}

impl CallFrame {
    pub fn new(description: impl Into<String>, position: ScriptPosition) -> Self {
        Self {
            description: description.into(),
            position,
        }
    }
}

impl From<Frame> for CallFrame {
    fn from(frame: Frame) -> Self {
        Self::new(frame.description, frame.position)
    }
}

fn render_frames(message: &str, frames: &[CallFrame]) -> String {
    let mut rendered = message.to_string();
    for frame in frames {
        let _ = write!(rendered, "\n\tat {}: {}", frame.position, frame.description);
    }
    rendered
}

/// Failure to turn a script into instructions
///
/// Static errors carry one frame per problem in source order; evaluation
/// errors carry the call backtrace, innermost first.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{}", render_frames(.message, .frames))]
pub struct InterpretationError {
    pub message: String,
    pub frames: Vec<CallFrame>,
}

impl InterpretationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            frames: Vec::new(),
        }
    }

    pub fn with_frames(message: impl Into<String>, frames: Vec<CallFrame>) -> Self {
        Self {
            message: message.into(),
            frames,
        }
    }

    /// Aggregates the static errors found in a script
    pub fn from_static_frames(frames: Vec<CallFrame>) -> Self {
        let message = if frames.len() == 1 {
            SINGLE_ERROR_MSG
        } else {
            MULTIPLE_ERRORS_MSG
        };
        Self::with_frames(message, frames)
    }

    pub fn evaluation(message: &str, backtrace: Vec<CallFrame>) -> Self {
        Self::with_frames(format!("{EVALUATION_ERROR_PREFIX}{message}"), backtrace)
    }
}

impl From<ContextError> for InterpretationError {
    fn from(err: ContextError) -> Self {
        Self::new(format!("Interpretation interrupted: {err}"))
    }
}

/// Instruction an error is attributed to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionRef {
    /// 1-based position in the instruction list
    pub number: usize,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{}", render_validation(.message, .instruction))]
pub struct ValidationError {
    pub message: String,
    pub instruction: Option<InstructionRef>,
}

fn render_validation(message: &str, instruction: &Option<InstructionRef>) -> String {
    match instruction {
        Some(instruction) => format!(
            "Error while validating instruction (number {}) {}: {}",
            instruction.number, instruction.text, message
        ),
        None => message.to_string(),
    }
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            instruction: None,
        }
    }

    pub fn for_instruction(mut self, number: usize, text: impl Into<String>) -> Self {
        self.instruction = Some(InstructionRef {
            number,
            text: text.into(),
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{}", render_execution(.message, .instruction, .position))]
pub struct ExecutionError {
    pub message: String,
    pub instruction: Option<InstructionRef>,
    pub position: Option<ScriptPosition>,
}

fn render_execution(
    message: &str,
    instruction: &Option<InstructionRef>,
    position: &Option<ScriptPosition>,
) -> String {
    match (instruction, position) {
        (Some(instruction), Some(position)) => format!(
            "An error occurred executing instruction (number {}): \n{}\n --- at {}: {}",
            instruction.number, instruction.text, position, message
        ),
        (Some(instruction), None) => format!(
            "An error occurred executing instruction (number {}): \n{}\n --- {}",
            instruction.number, instruction.text, message
        ),
        _ => message.to_string(),
    }
}

impl ExecutionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            instruction: None,
            position: None,
        }
    }

    pub fn for_instruction(
        mut self,
        number: usize,
        text: impl Into<String>,
        position: ScriptPosition,
    ) -> Self {
        self.instruction = Some(InstructionRef {
            number,
            text: text.into(),
        });
        self.position = Some(position);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_error_message_depends_on_count() {
        let frame = CallFrame::new("undefined: x", ScriptPosition::new("main", 2, 1));
        assert_eq!(
            InterpretationError::from_static_frames(vec![frame.clone()]).message,
            SINGLE_ERROR_MSG
        );
        assert_eq!(
            InterpretationError::from_static_frames(vec![frame.clone(), frame]).message,
            MULTIPLE_ERRORS_MSG
        );
    }

    #[test]
    fn test_interpretation_error_lists_frames() {
        let err = InterpretationError::evaluation(
            "boom",
            vec![CallFrame::new("<toplevel>", ScriptPosition::new("main", 3, 4))],
        );
        assert_eq!(err.to_string(), "Evaluation error: boom\n\tat main[3:4]: <toplevel>");
    }

    #[test]
    fn test_execution_error_names_instruction() {
        let err = ExecutionError::new("expected error for test").for_instruction(
            2,
            "instruction2()",
            ScriptPosition::new("main", 5, 3),
        );
        let rendered = err.to_string();
        assert!(rendered.contains(
            "An error occurred executing instruction (number 2): \ninstruction2()\n --- at"
        ));
        assert!(rendered.contains("expected error for test"));
    }
}
