//! `calc`: evaluates arithmetic expressions.
//!
//! Grammar (recursive descent, standard precedence):
//!
//! ```text
//! expr   = term (('+' | '-') term)*
//! term   = factor (('*' | '/' | '%') factor)*
//! factor = ('-' | '+') factor | atom
//! atom   = NUMBER | '(' expr ')'
//! ```
//!
//! Digit-group commas (`1,000`) are ignored. Nothing else is accepted, so
//! the tool can never evaluate anything but arithmetic. Nesting of
//! parentheses and unary signs is capped at [`MAX_DEPTH`].

use async_trait::async_trait;
use coact_core::error::ToolError;
use coact_core::tool::{Tool, ToolResult};

/// Deepest nesting of parentheses and unary signs accepted.
pub const MAX_DEPTH: usize = 256;

pub struct CalcTool;

#[async_trait]
impl Tool for CalcTool {
    fn name(&self) -> &str {
        "calc"
    }

    fn description(&self) -> &str {
        "Evaluate an arithmetic expression. Supports +, -, *, /, %, parentheses and decimals. \
         Example: calc(expression='2 + 3 * 4')"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "The expression to evaluate, e.g. '(120000 - 95000) / 95000'"
                }
            },
            "required": ["expression"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let expression = arguments["expression"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'expression' argument".into()))?;

        match evaluate(expression) {
            Ok(value) => Ok(ToolResult {
                call_id: String::new(),
                success: true,
                output: format_number(value),
                data: Some(serde_json::json!({ "result": value })),
            }),
            Err(e) => Ok(ToolResult {
                call_id: String::new(),
                success: false,
                output: format!("Error: {e}"),
                data: None,
            }),
        }
    }
}

/// Why an expression could not be evaluated.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("invalid character '{ch}' at offset {offset}")]
    InvalidCharacter { ch: char, offset: usize },

    #[error("invalid number '{0}'")]
    InvalidNumber(String),

    #[error("unexpected '{ch}' at offset {offset}")]
    Unexpected { ch: char, offset: usize },

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("missing closing parenthesis")]
    UnclosedParen,

    #[error("division by zero")]
    DivisionByZero,

    #[error("expression nested deeper than {} levels", MAX_DEPTH)]
    TooDeep,
}

/// Evaluate an arithmetic expression.
pub fn evaluate(expression: &str) -> Result<f64, EvalError> {
    let mut eval = Evaluator::new(expression);
    let value = eval.expr()?;
    eval.skip_blank();
    match eval.peek() {
        None => Ok(value),
        Some((offset, ch)) => Err(EvalError::Unexpected { ch, offset }),
    }
}

/// Whole numbers print without a fractional part.
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

struct Evaluator<'a> {
    src: &'a str,
    pos: usize,
    depth: usize,
}

impl<'a> Evaluator<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0, depth: 0 }
    }

    /// Run `f` one nesting level deeper.
    fn nested<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, EvalError>,
    ) -> Result<T, EvalError> {
        if self.depth >= MAX_DEPTH {
            return Err(EvalError::TooDeep);
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn peek(&self) -> Option<(usize, char)> {
        self.src[self.pos..].chars().next().map(|c| (self.pos, c))
    }

    fn bump(&mut self) {
        if let Some((_, c)) = self.peek() {
            self.pos += c.len_utf8();
        }
    }

    fn skip_blank(&mut self) {
        while let Some((_, c)) = self.peek() {
            if c.is_whitespace() {
                self.bump();
            } else {
                break;
            }
        }
    }

    /// Next significant character, rejecting anything outside the alphabet.
    fn next_significant(&mut self) -> Result<Option<(usize, char)>, EvalError> {
        self.skip_blank();
        match self.peek() {
            Some((offset, ch)) if !is_allowed(ch) => Err(EvalError::InvalidCharacter { ch, offset }),
            other => Ok(other),
        }
    }

    fn expr(&mut self) -> Result<f64, EvalError> {
        let mut acc = self.term()?;
        loop {
            match self.next_significant()? {
                Some((_, '+')) => {
                    self.bump();
                    acc += self.term()?;
                }
                Some((_, '-')) => {
                    self.bump();
                    acc -= self.term()?;
                }
                _ => return Ok(acc),
            }
        }
    }

    fn term(&mut self) -> Result<f64, EvalError> {
        let mut acc = self.factor()?;
        loop {
            let op = match self.next_significant()? {
                Some((_, op @ ('*' | '/' | '%'))) => op,
                _ => return Ok(acc),
            };
            self.bump();
            let rhs = self.factor()?;
            acc = match op {
                '*' => acc * rhs,
                _ if rhs == 0.0 => return Err(EvalError::DivisionByZero),
                '/' => acc / rhs,
                _ => acc % rhs,
            };
        }
    }

    fn factor(&mut self) -> Result<f64, EvalError> {
        match self.next_significant()? {
            Some((_, '-')) => {
                self.bump();
                Ok(-self.nested(Self::factor)?)
            }
            Some((_, '+')) => {
                self.bump();
                self.nested(Self::factor)
            }
            _ => self.atom(),
        }
    }

    fn atom(&mut self) -> Result<f64, EvalError> {
        match self.next_significant()? {
            None => Err(EvalError::UnexpectedEnd),
            Some((_, '(')) => {
                self.bump();
                let value = self.nested(Self::expr)?;
                match self.next_significant()? {
                    Some((_, ')')) => {
                        self.bump();
                        Ok(value)
                    }
                    _ => Err(EvalError::UnclosedParen),
                }
            }
            Some((_, c)) if c.is_ascii_digit() || c == '.' => self.number(),
            Some((offset, ch)) => Err(EvalError::Unexpected { ch, offset }),
        }
    }

    fn number(&mut self) -> Result<f64, EvalError> {
        let start = self.pos;
        while let Some((_, c)) = self.peek() {
            if c.is_ascii_digit() || c == '.' || c == ',' {
                self.bump();
            } else {
                break;
            }
        }
        let literal: String = self.src[start..self.pos].chars().filter(|c| *c != ',').collect();
        literal
            .parse()
            .map_err(|_| EvalError::InvalidNumber(self.src[start..self.pos].to_string()))
    }
}

fn is_allowed(c: char) -> bool {
    c.is_ascii_digit() || "+-*/%.(),".contains(c)
}
