use crate::error::{EvalError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Token {
    LeftParen,
    RightParen,
    Plus,
    Minus,
    Multiply,
    Divide,
    Number(u64),
    Space,
    /// Appended once after the last scanned character.
    End,
}

/// Scan `input` into tokens, terminated by [`Token::End`].
/// Consecutive digits form one decimal literal; leading zeros are allowed.
pub fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::with_capacity(input.len() + 1);
    let mut chars = input.char_indices().peekable();

    while let Some((start, c)) = chars.next() {
        let token = match c {
            '0'..='9' => {
                let mut end = start + 1;
                while let Some(&(i, d)) = chars.peek() {
                    if !d.is_ascii_digit() {
                        break;
                    }
                    end = i + 1;
                    chars.next();
                }
                let digits = &input[start..end];
                let value = digits.parse::<u64>().map_err(|_| {
                    EvalError::Lexical(format!("literal {digits} out of range at offset {start}"))
                })?;
                Token::Number(value)
            }
            '(' => Token::LeftParen,
            ')' => Token::RightParen,
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Multiply,
            '/' => Token::Divide,
            ' ' => Token::Space,
            other => {
                return Err(EvalError::Lexical(format!(
                    "unexpected character {other:?} at offset {start}"
                )));
            }
        };
        tokens.push(token);
    }

    tokens.push(Token::End);
    Ok(tokens)
}
