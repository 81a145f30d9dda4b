//! Prefix arithmetic expression engine.
//!
//! Evaluates fully parenthesized prefix expressions such as
//! `(+ 1 (* 2 3) (/ 8 4))` over non-negative integers. Parsing and
//! evaluation happen in one recursive descent over a token cursor.
//!
//! No I/O here: transports live in calc-net.

pub mod error;
pub mod parser;
pub mod token;

pub use error::{EvalError, Result};
pub use parser::{MAX_DEPTH, Operator, Parser};
pub use token::{Token, tokenize};

/// Tokenize and evaluate one query.
pub fn evaluate(input: &str) -> Result<u64> {
    let tokens = tokenize(input)?;
    Parser::new(&tokens).query()
}
