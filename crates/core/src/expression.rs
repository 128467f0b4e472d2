//! Small arithmetic expression evaluator for computed columns.
//!
//! Grammar:
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/' | '%') unary)*
//! unary   := '-' unary | primary
//! primary := number | string | identifier | '(' expr ')'
//! ```
//!
//! Identifiers (letters, digits, `_`, `.`) are resolved through a caller
//! supplied lookup. `+` concatenates when either side is a non-numeric
//! string.

use serde_json::Value;

use crate::error::CoreError;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Op(char),
    LParen,
    RParen,
}

/// Evaluate `source`, resolving identifiers with `lookup`.
pub fn evaluate<F>(source: &str, lookup: F) -> Result<Value, CoreError>
where
    F: Fn(&str) -> Option<Value>,
{
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err(CoreError::Validation("Empty expression".into()));
    }
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        lookup: &lookup,
    };
    let value = parser.expr()?;
    if parser.pos != tokens.len() {
        return Err(CoreError::Validation(format!(
            "Unexpected trailing input in expression '{source}'"
        )));
    }
    Ok(value)
}

/// Convert an f64 into a JSON number, keeping integral values integral.
pub fn number_value(n: f64) -> Value {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>, CoreError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '+' | '-' | '*' | '/' | '%' => {
                tokens.push(Token::Op(c));
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '\'' | '"' => {
                let quote = c;
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && chars[end] != quote {
                    end += 1;
                }
                if end >= chars.len() {
                    return Err(CoreError::Validation(format!(
                        "Unterminated string in expression '{source}'"
                    )));
                }
                tokens.push(Token::Str(chars[start..end].iter().collect()));
                i = end + 1;
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text.parse::<f64>().map_err(|_| {
                    CoreError::Validation(format!("Invalid number '{text}' in expression"))
                })?;
                tokens.push(Token::Number(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => {
                return Err(CoreError::Validation(format!(
                    "Unexpected character '{other}' in expression '{source}'"
                )))
            }
        }
    }
    Ok(tokens)
}

struct Parser<'a, F> {
    tokens: &'a [Token],
    pos: usize,
    lookup: &'a F,
}

impl<F> Parser<'_, F>
where
    F: Fn(&str) -> Option<Value>,
{
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn expr(&mut self) -> Result<Value, CoreError> {
        let mut acc = self.term()?;
        while let Some(Token::Op(op @ ('+' | '-'))) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.term()?;
            acc = binary(op, &acc, &rhs)?;
        }
        Ok(acc)
    }

    fn term(&mut self) -> Result<Value, CoreError> {
        let mut acc = self.unary()?;
        while let Some(Token::Op(op @ ('*' | '/' | '%'))) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.unary()?;
            acc = binary(op, &acc, &rhs)?;
        }
        Ok(acc)
    }

    fn unary(&mut self) -> Result<Value, CoreError> {
        if let Some(Token::Op('-')) = self.peek() {
            self.pos += 1;
            let inner = self.unary()?;
            let n = to_number(&inner).ok_or_else(|| {
                CoreError::Validation("Cannot negate a non-numeric value".into())
            })?;
            return Ok(number_value(-n));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Value, CoreError> {
        let token = self
            .peek()
            .cloned()
            .ok_or_else(|| CoreError::Validation("Unexpected end of expression".into()))?;
        self.pos += 1;
        match token {
            Token::Number(n) => Ok(number_value(n)),
            Token::Str(s) => Ok(Value::String(s)),
            Token::Ident(name) => match name.as_str() {
                "null" => Ok(Value::Null),
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => (self.lookup)(&name)
                    .ok_or_else(|| CoreError::Validation(format!("Unknown identifier '{name}'"))),
            },
            Token::LParen => {
                let inner = self.expr()?;
                match self.peek() {
                    Some(Token::RParen) => {
                        self.pos += 1;
                        Ok(inner)
                    }
                    _ => Err(CoreError::Validation("Missing closing parenthesis".into())),
                }
            }
            other => Err(CoreError::Validation(format!(
                "Unexpected token {other:?} in expression"
            ))),
        }
    }
}

fn binary(op: char, lhs: &Value, rhs: &Value) -> Result<Value, CoreError> {
    if op == '+' {
        if let (Some(a), Some(b)) = (to_number(lhs), to_number(rhs)) {
            return Ok(number_value(a + b));
        }
        return Ok(Value::String(format!("{}{}", to_text(lhs), to_text(rhs))));
    }

    let (a, b) = match (to_number(lhs), to_number(rhs)) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            return Err(CoreError::Validation(format!(
                "Operator '{op}' requires numeric operands"
            )))
        }
    };
    let result = match op {
        '-' => a - b,
        '*' => a * b,
        '/' | '%' if b == 0.0 => {
            return Err(CoreError::Validation("Division by zero".into()));
        }
        '/' => a / b,
        '%' => a % b,
        _ => unreachable!("tokenizer only emits known operators"),
    };
    Ok(number_value(result))
}

/// Numeric view of a value; numeric strings parse, booleans are 0 or 1.
pub fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Render a value as plain text (strings unquoted, `Null` empty).
pub fn to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
