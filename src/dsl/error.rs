//! Error types surfaced by parsing, evaluation and query compilation.

use super::ast::Operator;

/// Malformed filter source. Parsing aborts on the first one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} (offset {offset})")]
pub struct SyntaxError {
    pub message: String,
    /// Byte offset into the source where the problem starts.
    pub offset: usize,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>, offset: usize) -> Self {
        SyntaxError {
            message: message.into(),
            offset,
        }
    }
}

/// Operands of incompatible kinds met an operator at evaluation time.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot apply '{operator}' to {left_kind} and {right_kind}")]
pub struct ComparisonTypeError {
    pub left_kind: &'static str,
    pub right_kind: &'static str,
    pub operator: Operator,
}

/// A tree shape the query vocabulary cannot express.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot compile query: {reason}")]
pub struct CompileError {
    pub reason: String,
}

impl CompileError {
    pub fn new(reason: impl Into<String>) -> Self {
        CompileError {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterError {
    #[error("syntax error: {0}")]
    Syntax(#[from] SyntaxError),
    #[error("type error: {0}")]
    ComparisonType(#[from] ComparisonTypeError),
    #[error(transparent)]
    Compile(#[from] CompileError),
}
