//! Expression grammar of `%if` and `%[...]`.
//!
//! Operands are integers and double-quoted strings. Operators, loosest
//! binding first: `||`, `&&`, comparisons, `+ -`, `* /`, unary `! -`.
//! Parentheses group.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Number(i64),
    Text(String),
}

impl Value {
    pub fn is_true(&self) -> bool {
        match self {
            Value::Number(n) => *n != 0,
            Value::Text(s) => !s.is_empty(),
        }
    }

    fn from_bool(b: bool) -> Self {
        Value::Number(i64::from(b))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{n}"),
            Value::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExpressionError {
    #[error("Unexpected end of expression")]
    UnexpectedEnd,
    #[error("Unexpected `{0}` in expression")]
    Unexpected(String),
    #[error("Operands of `{0}` have different types")]
    TypeMismatch(&'static str),
    #[error("Division by zero")]
    DivisionByZero,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Tok {
    Num(i64),
    Str(String),
    Op(&'static str),
    Open,
    Close,
}

const OPERATORS: [&str; 13] = [
    "||", "&&", "==", "!=", "<=", ">=", "<", ">", "+", "-", "*", "/", "!",
];

fn lex(input: &str) -> Result<Vec<Tok>, ExpressionError> {
    let mut tokens = Vec::new();
    let mut rest = input.trim_start();
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix('(') {
            tokens.push(Tok::Open);
            rest = after;
        } else if let Some(after) = rest.strip_prefix(')') {
            tokens.push(Tok::Close);
            rest = after;
        } else if let Some(after) = rest.strip_prefix('"') {
            let end = after.find('"').ok_or(ExpressionError::UnexpectedEnd)?;
            tokens.push(Tok::Str(after[..end].to_string()));
            rest = &after[end + 1..];
        } else if rest.starts_with(|c: char| c.is_ascii_digit()) {
            let end = rest
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(rest.len());
            let number = rest[..end]
                .parse()
                .map_err(|_| ExpressionError::Unexpected(rest[..end].to_string()))?;
            tokens.push(Tok::Num(number));
            rest = &rest[end..];
        } else if let Some(op) = OPERATORS.iter().find(|op| rest.starts_with(**op)) {
            tokens.push(Tok::Op(op));
            rest = &rest[op.len()..];
        } else {
            let word: String = rest.chars().take_while(|c| !c.is_whitespace()).collect();
            return Err(ExpressionError::Unexpected(word));
        }
        rest = rest.trim_start();
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Tok>,
    pos: usize,
}

impl Parser {
    fn peek_op(&self) -> Option<&'static str> {
        match self.tokens.get(self.pos) {
            Some(Tok::Op(op)) => Some(op),
            _ => None,
        }
    }

    fn next(&mut self) -> Option<Tok> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn or(&mut self) -> Result<Value, ExpressionError> {
        let mut left = self.and()?;
        while self.peek_op() == Some("||") {
            self.pos += 1;
            let right = self.and()?;
            left = Value::from_bool(left.is_true() || right.is_true());
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Value, ExpressionError> {
        let mut left = self.comparison()?;
        while self.peek_op() == Some("&&") {
            self.pos += 1;
            let right = self.comparison()?;
            left = Value::from_bool(left.is_true() && right.is_true());
        }
        Ok(left)
    }

    fn comparison(&mut self) -> Result<Value, ExpressionError> {
        let mut left = self.sum()?;
        while let Some(op @ ("==" | "!=" | "<" | "<=" | ">" | ">=")) = self.peek_op() {
            self.pos += 1;
            let right = self.sum()?;
            let ordering = match (&left, &right) {
                (Value::Number(a), Value::Number(b)) => a.cmp(b),
                (Value::Text(a), Value::Text(b)) => a.cmp(b),
                _ => return Err(ExpressionError::TypeMismatch(op)),
            };
            left = Value::from_bool(match op {
                "==" => ordering.is_eq(),
                "!=" => ordering.is_ne(),
                "<" => ordering.is_lt(),
                "<=" => ordering.is_le(),
                ">" => ordering.is_gt(),
                _ => ordering.is_ge(),
            });
        }
        Ok(left)
    }

    fn sum(&mut self) -> Result<Value, ExpressionError> {
        let mut left = self.product()?;
        while let Some(op @ ("+" | "-")) = self.peek_op() {
            self.pos += 1;
            let right = self.product()?;
            left = match (op, left, right) {
                ("+", Value::Number(a), Value::Number(b)) => Value::Number(a.wrapping_add(b)),
                ("+", Value::Text(a), Value::Text(b)) => Value::Text(a + &b),
                ("-", Value::Number(a), Value::Number(b)) => Value::Number(a.wrapping_sub(b)),
                _ => return Err(ExpressionError::TypeMismatch(op)),
            };
        }
        Ok(left)
    }

    fn product(&mut self) -> Result<Value, ExpressionError> {
        let mut left = self.unary()?;
        while let Some(op @ ("*" | "/")) = self.peek_op() {
            self.pos += 1;
            let right = self.unary()?;
            left = match (left, right) {
                (Value::Number(_), Value::Number(0)) if op == "/" => {
                    return Err(ExpressionError::DivisionByZero);
                }
                (Value::Number(a), Value::Number(b)) if op == "/" => Value::Number(a / b),
                (Value::Number(a), Value::Number(b)) => Value::Number(a.wrapping_mul(b)),
                _ => return Err(ExpressionError::TypeMismatch(op)),
            };
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Value, ExpressionError> {
        match self.peek_op() {
            Some("!") => {
                self.pos += 1;
                Ok(Value::from_bool(!self.unary()?.is_true()))
            }
            Some("-") => {
                self.pos += 1;
                match self.unary()? {
                    Value::Number(n) => Ok(Value::Number(-n)),
                    Value::Text(_) => Err(ExpressionError::TypeMismatch("-")),
                }
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Value, ExpressionError> {
        match self.next() {
            Some(Tok::Num(n)) => Ok(Value::Number(n)),
            Some(Tok::Str(s)) => Ok(Value::Text(s)),
            Some(Tok::Open) => {
                let value = self.or()?;
                match self.next() {
                    Some(Tok::Close) => Ok(value),
                    Some(other) => Err(unexpected(other)),
                    None => Err(ExpressionError::UnexpectedEnd),
                }
            }
            Some(other) => Err(unexpected(other)),
            None => Err(ExpressionError::UnexpectedEnd),
        }
    }
}

fn unexpected(tok: Tok) -> ExpressionError {
    ExpressionError::Unexpected(match tok {
        Tok::Num(n) => n.to_string(),
        Tok::Str(s) => format!("\"{s}\""),
        Tok::Op(op) => op.to_string(),
        Tok::Open => "(".to_string(),
        Tok::Close => ")".to_string(),
    })
}

/// Evaluate an already macro-expanded expression.
pub fn evaluate(expression: &str) -> Result<Value, ExpressionError> {
    let mut parser = Parser {
        tokens: lex(expression)?,
        pos: 0,
    };
    let value = parser.or()?;
    match parser.next() {
        None => Ok(value),
        Some(tok) => Err(unexpected(tok)),
    }
}
