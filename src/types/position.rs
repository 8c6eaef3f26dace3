use serde::{Deserialize, Serialize};
use std::fmt;

/// Location of a construct inside a script or module file.
///
/// Lines and columns are 1-based. The position of a call is the position of
/// its opening parenthesis.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScriptPosition {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl ScriptPosition {
    pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for ScriptPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}:{}]", self.file, self.line, self.column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_file_line_and_column() {
        let position = ScriptPosition::new("dummyFile", 13, 12);
        assert_eq!(position.to_string(), "dummyFile[13:12]");
    }

    #[test]
    fn test_positions_order_by_line_then_column() {
        let first = ScriptPosition::new("f", 4, 1);
        let second = ScriptPosition::new("f", 5, 7);
        let third = ScriptPosition::new("f", 5, 9);
        assert!(first < second);
        assert!(second < third);
    }
}
