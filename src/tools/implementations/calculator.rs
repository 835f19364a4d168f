// ABOUTME: Calculator tool evaluating arithmetic expressions
// ABOUTME: Recursive-descent parser over + - * / % ^ with parentheses and unary minus
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::errors::{AppError, AppResult};
use crate::tools::context::ToolExecutionContext;
use crate::tools::traits::ChatTool;

/// Evaluates arithmetic so the model does not have to
pub struct CalculatorTool;

#[async_trait]
impl ChatTool for CalculatorTool {
    fn name(&self) -> &'static str {
        "calculator"
    }

    fn description(&self) -> &'static str {
        "Evaluate an arithmetic expression. Supports + - * / % ^, parentheses, and decimals."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "Arithmetic expression, e.g. (2 + 3) * 4"
                }
            },
            "required": ["expression"]
        })
    }

    async fn execute(&self, input: Value, _context: &ToolExecutionContext) -> AppResult<Value> {
        let expression = input
            .get("expression")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::missing_field("expression"))?;

        let result = evaluate_expression(expression)?;
        Ok(json!({
            "expression": expression,
            "result": number_value(result),
        }))
    }
}

/// Render whole numbers as integers so `2+2` answers `4`, not `4.0`
fn number_value(result: f64) -> Value {
    const MAX_EXACT: f64 = 9_007_199_254_740_992.0;
    if result.fract() == 0.0 && result.abs() < MAX_EXACT {
        #[allow(clippy::cast_possible_truncation)]
        let whole = result as i64;
        json!(whole)
    } else {
        json!(result)
    }
}

/// Longest expression accepted, in characters
pub const MAX_EXPRESSION_CHARS: usize = 1_000;

/// Deepest nesting of parentheses, unary signs, and exponents
pub const MAX_NESTING_DEPTH: usize = 64;

/// Evaluate an arithmetic expression
///
/// # Errors
///
/// Returns `InvalidInput` for syntax errors, division by zero, non-finite
/// results, and expressions that are too long or nested too deeply
pub fn evaluate_expression(expression: &str) -> AppResult<f64> {
    if expression.chars().count() > MAX_EXPRESSION_CHARS {
        return Err(AppError::invalid_input(format!(
            "Expression is longer than {MAX_EXPRESSION_CHARS} characters"
        )));
    }
    let mut parser = Parser {
        chars: expression.chars().filter(|c| !c.is_whitespace()).collect(),
        pos: 0,
        depth: 0,
    };
    if parser.chars.is_empty() {
        return Err(AppError::invalid_input("Expression is empty"));
    }
    let value = parser.expression()?;
    if let Some(c) = parser.peek() {
        return Err(AppError::invalid_input(format!(
            "Unexpected '{c}' at position {}",
            parser.pos
        )));
    }
    if value.is_finite() {
        Ok(value)
    } else {
        Err(AppError::invalid_input("Result is not a finite number"))
    }
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    depth: usize,
}

impl Parser {
    /// Run `parse` one nesting level deeper, bounding recursion
    fn nested(&mut self, parse: fn(&mut Self) -> AppResult<f64>) -> AppResult<f64> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(AppError::invalid_input("Expression nested too deeply"));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    // expression := term (('+' | '-') term)*
    fn expression(&mut self) -> AppResult<f64> {
        let mut value = self.term()?;
        loop {
            if self.eat('+') {
                value += self.term()?;
            } else if self.eat('-') {
                value -= self.term()?;
            } else {
                return Ok(value);
            }
        }
    }

    // term := power (('*' | '/' | '%') power)*
    fn term(&mut self) -> AppResult<f64> {
        let mut value = self.power()?;
        loop {
            if self.eat('*') {
                value *= self.power()?;
            } else if self.eat('/') {
                let divisor = self.power()?;
                if divisor == 0.0 {
                    return Err(AppError::invalid_input("Division by zero"));
                }
                value /= divisor;
            } else if self.eat('%') {
                let divisor = self.power()?;
                if divisor == 0.0 {
                    return Err(AppError::invalid_input("Division by zero"));
                }
                value %= divisor;
            } else {
                return Ok(value);
            }
        }
    }

    // power := unary ('^' power)?   (right associative)
    fn power(&mut self) -> AppResult<f64> {
        let base = self.unary()?;
        if self.eat('^') {
            let exponent = self.nested(Self::power)?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn unary(&mut self) -> AppResult<f64> {
        if self.eat('-') {
            return Ok(-self.nested(Self::unary)?);
        }
        if self.eat('+') {
            return self.nested(Self::unary);
        }
        self.primary()
    }

    fn primary(&mut self) -> AppResult<f64> {
        if self.eat('(') {
            let value = self.nested(Self::expression)?;
            if !self.eat(')') {
                return Err(AppError::invalid_input("Missing closing parenthesis"));
            }
            return Ok(value);
        }

        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || c == '.' || c == '_' || c == ',')
        {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(match self.peek() {
                Some(c) => AppError::invalid_input(format!(
                    "Unexpected '{c}' at position {}",
                    self.pos
                )),
                None => AppError::invalid_input("Unexpected end of expression"),
            });
        }
        let literal: String = self.chars[start..self.pos]
            .iter()
            .filter(|c| **c != '_' && **c != ',')
            .collect();
        literal
            .parse::<f64>()
            .map_err(|_| AppError::invalid_input(format!("Invalid number '{literal}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence_and_associativity() {
        assert!((evaluate_expression("2 + 3 * 4").unwrap() - 14.0).abs() < f64::EPSILON);
        assert!((evaluate_expression("(2 + 3) * 4").unwrap() - 20.0).abs() < f64::EPSILON);
        assert!((evaluate_expression("2 ^ 3 ^ 2").unwrap() - 512.0).abs() < f64::EPSILON);
        assert!((evaluate_expression("-3 + 5").unwrap() - 2.0).abs() < f64::EPSILON);
        assert!((evaluate_expression("1,234 * 2").unwrap() - 2468.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(evaluate_expression("").is_err());
        assert!(evaluate_expression("1 / 0").is_err());
        assert!(evaluate_expression("(1 + 2").is_err());
        assert!(evaluate_expression("2 + abc").is_err());
    }

    #[test]
    fn test_nesting_is_bounded() {
        let shallow = format!("{}1{}", "(".repeat(10), ")".repeat(10));
        assert!((evaluate_expression(&shallow).unwrap() - 1.0).abs() < f64::EPSILON);

        let deep = format!("{}1{}", "(".repeat(100), ")".repeat(100));
        let err = evaluate_expression(&deep).unwrap_err();
        assert_eq!(err.message, "Expression nested too deeply");

        assert!(evaluate_expression(&format!("{}1", "-".repeat(200))).is_err());
        assert!(evaluate_expression(&["2"; 200].join("^")).is_err());
    }

    #[test]
    fn test_whole_numbers_render_as_integers() {
        assert_eq!(number_value(4.0), json!(4));
        assert_eq!(number_value(2.5), json!(2.5));
    }
}
