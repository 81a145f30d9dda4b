//! Recursive-descent evaluator for the query grammar:
//!
//! ```text
//! Query   -> '(' Op SP Expr SP Expr OptExpr ')' END
//! Op      -> '+' | '-' | '*' | '/'
//! Expr    -> '(' Op SP Expr SP Expr OptExpr ')' | NUMBER
//! OptExpr -> SP Expr OptExpr | ε
//! ```
//!
//! No tree is built: each parenthesized form is folded as soon as its closing
//! parenthesis is consumed.

use crate::error::{EvalError, Result};
use crate::token::Token;

/// Maximum nesting of parenthesized forms.
///
/// Each level is one recursion frame on the evaluating task's stack (2 MiB
/// per tokio worker by default), so the cap is a fixed stack budget rather
/// than whatever a 64 KiB line could spell, which is about 13k levels.
/// A UDP payload tops out near 50 levels, and 256 leaves TCP clients far more
/// than real queries use.
pub const MAX_DEPTH: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
}

impl Operator {
    fn from_token(token: Token) -> Option<Self> {
        match token {
            Token::Plus => Some(Operator::Add),
            Token::Minus => Some(Operator::Sub),
            Token::Multiply => Some(Operator::Mul),
            Token::Divide => Some(Operator::Div),
            _ => None,
        }
    }

    fn apply(self, lhs: u64, rhs: u64) -> Result<u64> {
        let value = match self {
            Operator::Add => lhs.checked_add(rhs),
            Operator::Sub => lhs.checked_sub(rhs),
            Operator::Mul => lhs.checked_mul(rhs),
            Operator::Div => {
                if rhs == 0 {
                    return Err(EvalError::Evaluation("division by zero".to_string()));
                }
                lhs.checked_div(rhs)
            }
        };
        value.ok_or_else(|| {
            let reason = match self {
                Operator::Sub => "negative result",
                _ => "arithmetic overflow",
            };
            EvalError::Evaluation(format!("{reason} in {lhs} {self} {rhs}"))
        })
    }

    /// Left-to-right fold; the first failing step discards the partial result.
    pub fn fold(self, operands: &[u64]) -> Result<u64> {
        let (first, rest) = operands
            .split_first()
            .ok_or_else(|| EvalError::Syntax("operator without operands".to_string()))?;
        rest.iter().try_fold(*first, |acc, &rhs| self.apply(acc, rhs))
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let symbol = match self {
            Operator::Add => "+",
            Operator::Sub => "-",
            Operator::Mul => "*",
            Operator::Div => "/",
        };
        f.write_str(symbol)
    }
}

/// Forward-only cursor over a token sequence ending in [`Token::End`].
pub struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token]) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    /// Parse and evaluate a whole query, rejecting anything after the
    /// outermost closing parenthesis.
    pub fn query(&mut self) -> Result<u64> {
        self.expect(Token::LeftParen, "query must start with '('")?;
        let value = self.subexpression()?;
        self.expect(Token::End, "unexpected input after closing ')'")?;
        Ok(value)
    }

    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.peek()?;
        self.pos += 1;
        Some(token)
    }

    fn expect(&mut self, expected: Token, context: &str) -> Result<()> {
        match self.advance() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(EvalError::Syntax(format!(
                "{context}: found {token:?} at token {}",
                self.pos - 1
            ))),
            None => Err(EvalError::Syntax(format!("{context}: input exhausted"))),
        }
    }

    fn operator(&mut self) -> Result<Operator> {
        let token = self
            .advance()
            .ok_or_else(|| EvalError::Syntax("missing operator".to_string()))?;
        Operator::from_token(token)
            .ok_or_else(|| EvalError::Syntax(format!("expected operator, found {token:?}")))
    }

    /// Everything after an opening parenthesis, through the matching ')'.
    fn subexpression(&mut self) -> Result<u64> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(EvalError::Syntax(format!(
                "nesting deeper than {MAX_DEPTH} levels"
            )));
        }

        let op = self.operator()?;
        let mut operands = Vec::with_capacity(2);

        self.expect(Token::Space, "expected space after operator")?;
        operands.push(self.operand()?);
        self.expect(Token::Space, "expected space between operands")?;
        operands.push(self.operand()?);

        while self.peek() == Some(Token::Space) {
            self.pos += 1;
            operands.push(self.operand()?);
        }

        self.expect(Token::RightParen, "expected ')'")?;
        self.depth -= 1;
        op.fold(&operands)
    }

    fn operand(&mut self) -> Result<u64> {
        match self.advance() {
            Some(Token::LeftParen) => self.subexpression(),
            Some(Token::Number(value)) => Ok(value),
            Some(token) => Err(EvalError::Syntax(format!(
                "expected number or '(', found {token:?}"
            ))),
            None => Err(EvalError::Syntax("missing operand".to_string())),
        }
    }
}
