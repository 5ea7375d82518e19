// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! A small arithmetic tool: `+ - * / ( )` over floating-point numbers. Gives
//! the model a reliable way to do exact arithmetic instead of guessing.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::policy::ApprovalPolicy;
use crate::tool::{Tool, ToolCall, ToolOutput};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum EvalError {
    #[error("unexpected character '{0}'")]
    UnexpectedChar(char),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("expected ')'")]
    MissingCloseParen,
    #[error("division by zero")]
    DivisionByZero,
    #[error("trailing input: {0}")]
    TrailingInput(String),
}

/// Recursive-descent parser/evaluator for `expr := term (('+' | '-') term)*`,
/// `term := factor (('*' | '/') factor)*`, `factor := number | '(' expr ')' | '-' factor`.
struct Parser<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().peekable(),
        }
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.chars.peek(), Some(c) if c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn parse_expr(&mut self) -> Result<f64, EvalError> {
        let mut value = self.parse_term()?;
        loop {
            self.skip_whitespace();
            match self.chars.peek() {
                Some('+') => {
                    self.chars.next();
                    value += self.parse_term()?;
                }
                Some('-') => {
                    self.chars.next();
                    value -= self.parse_term()?;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn parse_term(&mut self) -> Result<f64, EvalError> {
        let mut value = self.parse_factor()?;
        loop {
            self.skip_whitespace();
            match self.chars.peek() {
                Some('*') => {
                    self.chars.next();
                    value *= self.parse_factor()?;
                }
                Some('/') => {
                    self.chars.next();
                    let rhs = self.parse_factor()?;
                    if rhs == 0.0 {
                        return Err(EvalError::DivisionByZero);
                    }
                    value /= rhs;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn parse_factor(&mut self) -> Result<f64, EvalError> {
        self.skip_whitespace();
        match self.chars.peek() {
            Some('-') => {
                self.chars.next();
                Ok(-self.parse_factor()?)
            }
            Some('+') => {
                self.chars.next();
                self.parse_factor()
            }
            Some('(') => {
                self.chars.next();
                let value = self.parse_expr()?;
                self.skip_whitespace();
                match self.chars.next() {
                    Some(')') => Ok(value),
                    _ => Err(EvalError::MissingCloseParen),
                }
            }
            Some(c) if c.is_ascii_digit() || *c == '.' => self.parse_number(),
            Some(c) => Err(EvalError::UnexpectedChar(*c)),
            None => Err(EvalError::UnexpectedEnd),
        }
    }

    fn parse_number(&mut self) -> Result<f64, EvalError> {
        let mut raw = String::new();
        while matches!(self.chars.peek(), Some(c) if c.is_ascii_digit() || *c == '.') {
            raw.push(self.chars.next().unwrap());
        }
        raw.parse::<f64>()
            .map_err(|_| EvalError::UnexpectedChar(raw.chars().next().unwrap_or('?')))
    }
}

/// Evaluate an arithmetic expression string, returning the numeric result.
pub fn evaluate(expression: &str) -> Result<f64, EvalError> {
    let mut parser = Parser::new(expression);
    let value = parser.parse_expr()?;
    parser.skip_whitespace();
    if let Some(rest) = parser.chars.peek() {
        let mut tail = String::new();
        tail.push(*rest);
        tail.extend(parser.chars);
        return Err(EvalError::TrailingInput(tail));
    }
    Ok(value)
}

/// Render a result without a trailing `.0` for whole numbers, otherwise with
/// up to 10 significant decimal digits.
fn format_result(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        let mut s = format!("{value:.10}");
        while s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.pop();
        }
        s
    }
}

pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Evaluate an arithmetic expression (+, -, *, /, parentheses) and return the numeric result."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "Arithmetic expression, e.g. '37 * 42'"
                }
            },
            "required": ["expression"],
            "additionalProperties": false
        })
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Auto
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let expression = match call.args.get("expression").and_then(|v| v.as_str()) {
            Some(e) => e,
            None => return ToolOutput::err(&call.id, "missing 'expression'"),
        };
        match evaluate(expression) {
            Ok(value) => ToolOutput::ok(&call.id, format_result(value)),
            Err(err) => ToolOutput::err(&call.id, format!("could not evaluate expression: {err}")),
        }
    }
}
