use std::fmt;

/// Why an expression could not be evaluated.
///
/// Transports collapse every variant into one generic failure reply; the
/// variant only matters for logs and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    /// Unrecognized character or a literal that does not fit in `u64`.
    Lexical(String),
    /// Input does not match the grammar.
    Syntax(String),
    /// Arithmetic failed while folding operands.
    Evaluation(String),
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::Lexical(msg) => write!(f, "lexical error: {msg}"),
            EvalError::Syntax(msg) => write!(f, "syntax error: {msg}"),
            EvalError::Evaluation(msg) => write!(f, "evaluation error: {msg}"),
        }
    }
}

impl std::error::Error for EvalError {}

pub type Result<T> = std::result::Result<T, EvalError>;
