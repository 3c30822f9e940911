use std::fmt::{self, Display};
use std::future::ready;

use deep_agent_core::tool::{Error as ToolError, Tool, ToolResult};
use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

const ALLOWED_CHARS: &str = "0123456789+-*/()., ";
const MAX_EXPRESSION_LEN: usize = 1000;
const MAX_DEPTH: usize = 64;
const MAX_EXPONENT: f64 = 1024.0;

/// Input of [`CalculateTool`].
#[derive(Deserialize, JsonSchema)]
pub struct CalculateToolParameters {
    #[schemars(
        description = "Mathematical expression to evaluate, \
                       e.g. `2 + 2` or `10 * (5 - 3) / 4`."
    )]
    expression: String,
}

/// A tool for evaluating arithmetic expressions.
///
/// Only numbers, `+ - * / // **` and parentheses are understood. Nothing
/// else is ever evaluated.
pub struct CalculateTool {
    parameter_schema: Value,
}

impl CalculateTool {
    /// Creates a new calculator tool.
    #[inline]
    pub fn new() -> Self {
        CalculateTool {
            parameter_schema: schema_for!(CalculateToolParameters).to_value(),
        }
    }
}

impl Default for CalculateTool {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Tool for CalculateTool {
    type Input = CalculateToolParameters;

    fn name(&self) -> &str {
        "calculate"
    }

    fn description(&self) -> &str {
        r#"
Evaluates a mathematical expression and returns the result.
Supports +, -, *, / (true division), // (floor division), ** (power)
and parentheses."#
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    fn execute(
        &self,
        input: CalculateToolParameters,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        ready(calculate(&input.expression))
    }
}

fn calculate(expression: &str) -> ToolResult {
    if !expression.chars().all(|c| ALLOWED_CHARS.contains(c)) {
        return Err(ToolError::invalid_input()
            .with_reason("Only basic mathematical operations are allowed"));
    }
    let number = evaluate(expression).map_err(|err| {
        ToolError::execution_error()
            .with_reason(format!("could not calculate expression: {err}"))
    })?;
    Ok(format!("Result: {number}"))
}

/// A number produced by the calculator. Integers stay exact until an
/// operation needs a float.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    #[inline]
    fn as_f64(self) -> f64 {
        match self {
            Number::Int(n) => n as f64,
            Number::Float(n) => n,
        }
    }
}

impl Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Number::Int(n) => write!(f, "{n}"),
            // Whole floats keep a trailing `.0`, so `4 / 2` reads `2.0`.
            Number::Float(n) if n.fract() == 0.0 && n.abs() < 1e16 => {
                write!(f, "{n:.1}")
            }
            Number::Float(n) => write!(f, "{n}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub(crate) enum CalcError {
    #[error("empty expression")]
    Empty,
    #[error("expression is longer than 1000 characters")]
    TooLong,
    #[error("expression is nested deeper than 64 levels")]
    TooDeep,
    #[error("invalid number `{0}`")]
    InvalidNumber(String),
    #[error("unexpected `{0}`")]
    Unexpected(String),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("tuples are not supported")]
    Tuple,
    #[error("division by zero")]
    DivisionByZero,
    #[error("exponent is too large")]
    ExponentTooLarge,
    #[error("result is too large")]
    Overflow,
    #[error("result is not a real number")]
    NotANumber,
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Number(Number),
    Plus,
    Minus,
    Star,
    Slash,
    DoubleSlash,
    DoubleStar,
    LParen,
    RParen,
    Comma,
}

impl Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Token::Number(n) => return write!(f, "{n}"),
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::DoubleSlash => "//",
            Token::DoubleStar => "**",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::Comma => ",",
        };
        f.write_str(s)
    }
}

fn tokenize(expression: &str) -> Result<Vec<Token>, CalcError> {
    let bytes = expression.as_bytes();
    let mut tokens = vec![];
    let mut pos = 0;
    while pos < bytes.len() {
        let token = match bytes[pos] {
            b' ' => {
                pos += 1;
                continue;
            }
            b'0'..=b'9' | b'.' => {
                let start = pos;
                while pos < bytes.len()
                    && matches!(bytes[pos], b'0'..=b'9' | b'.')
                {
                    pos += 1;
                }
                let number = parse_number(&expression[start..pos])?;
                tokens.push(Token::Number(number));
                continue;
            }
            b'+' => Token::Plus,
            b'-' => Token::Minus,
            b'*' if bytes.get(pos + 1) == Some(&b'*') => {
                pos += 1;
                Token::DoubleStar
            }
            b'*' => Token::Star,
            b'/' if bytes.get(pos + 1) == Some(&b'/') => {
                pos += 1;
                Token::DoubleSlash
            }
            b'/' => Token::Slash,
            b'(' => Token::LParen,
            b')' => Token::RParen,
            b',' => Token::Comma,
            other => {
                let other = (other as char).to_string();
                return Err(CalcError::Unexpected(other));
            }
        };
        tokens.push(token);
        pos += 1;
    }
    Ok(tokens)
}

fn parse_number(literal: &str) -> Result<Number, CalcError> {
    let invalid = || CalcError::InvalidNumber(literal.to_owned());
    if literal == "." || literal.matches('.').count() > 1 {
        return Err(invalid());
    }
    if literal.contains('.') {
        return literal.parse().map(Number::Float).map_err(|_| invalid());
    }
    match literal.parse::<i64>() {
        Ok(n) => Ok(Number::Int(n)),
        // Too long for an integer, but still a valid literal.
        Err(_) => literal.parse().map(Number::Float).map_err(|_| invalid()),
    }
}

/// Evaluates an arithmetic expression with a recursive-descent parser.
///
/// ```text
/// expr  := term (("+" | "-") term)*
/// term  := unary (("*" | "/" | "//") unary)*
/// unary := ("+" | "-") unary | power
/// power := atom ("**" unary)?
/// atom  := number | "(" expr ")"
/// ```
pub(crate) fn evaluate(expression: &str) -> Result<Number, CalcError> {
    if expression.len() > MAX_EXPRESSION_LEN {
        return Err(CalcError::TooLong);
    }
    let tokens = tokenize(expression)?;
    if tokens.is_empty() {
        return Err(CalcError::Empty);
    }

    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        depth: 0,
    };
    let number = parser.expr()?;
    match parser.peek() {
        None => Ok(number),
        Some(Token::Comma) => Err(CalcError::Tuple),
        Some(token) => Err(CalcError::Unexpected(token.to_string())),
    }
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    depth: usize,
}

impl Parser<'_> {
    #[inline]
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    #[inline]
    fn bump(&mut self) -> Option<&Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn enter(&mut self) -> Result<(), CalcError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(CalcError::TooDeep);
        }
        Ok(())
    }

    fn expr(&mut self) -> Result<Number, CalcError> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => add,
                Some(Token::Minus) => sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = op(lhs, rhs)?;
        }
    }

    fn term(&mut self) -> Result<Number, CalcError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => mul,
                Some(Token::Slash) => div,
                Some(Token::DoubleSlash) => floor_div,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = op(lhs, rhs)?;
        }
    }

    fn unary(&mut self) -> Result<Number, CalcError> {
        let negate = match self.peek() {
            Some(Token::Plus) => false,
            Some(Token::Minus) => true,
            _ => return self.power(),
        };
        self.pos += 1;
        self.enter()?;
        let operand = self.unary()?;
        self.depth -= 1;
        if !negate {
            return Ok(operand);
        }
        match operand {
            Number::Int(n) => {
                n.checked_neg().map(Number::Int).ok_or(CalcError::Overflow)
            }
            Number::Float(n) => Ok(Number::Float(-n)),
        }
    }

    fn power(&mut self) -> Result<Number, CalcError> {
        let base = self.atom()?;
        if self.peek() != Some(&Token::DoubleStar) {
            return Ok(base);
        }
        self.pos += 1;
        // Right associative, and binds tighter than a unary minus on its
        // left: `-2 ** 2` is `-4`, `2 ** -1` is `0.5`.
        self.enter()?;
        let exponent = self.unary()?;
        self.depth -= 1;
        pow(base, exponent)
    }

    fn atom(&mut self) -> Result<Number, CalcError> {
        match self.bump() {
            Some(Token::Number(n)) => Ok(*n),
            Some(Token::LParen) => {
                self.enter()?;
                let value = self.expr()?;
                self.depth -= 1;
                match self.bump() {
                    Some(Token::RParen) => Ok(value),
                    Some(Token::Comma) => Err(CalcError::Tuple),
                    Some(token) => {
                        Err(CalcError::Unexpected(token.to_string()))
                    }
                    None => Err(CalcError::UnexpectedEnd),
                }
            }
            Some(Token::Comma) => Err(CalcError::Tuple),
            Some(token) => Err(CalcError::Unexpected(token.to_string())),
            None => Err(CalcError::UnexpectedEnd),
        }
    }
}

fn finite(n: f64) -> Result<Number, CalcError> {
    if n.is_nan() {
        Err(CalcError::NotANumber)
    } else if n.is_infinite() {
        Err(CalcError::Overflow)
    } else {
        Ok(Number::Float(n))
    }
}

fn add(lhs: Number, rhs: Number) -> Result<Number, CalcError> {
    match (lhs, rhs) {
        (Number::Int(a), Number::Int(b)) => {
            a.checked_add(b).map(Number::Int).ok_or(CalcError::Overflow)
        }
        (a, b) => finite(a.as_f64() + b.as_f64()),
    }
}

fn sub(lhs: Number, rhs: Number) -> Result<Number, CalcError> {
    match (lhs, rhs) {
        (Number::Int(a), Number::Int(b)) => {
            a.checked_sub(b).map(Number::Int).ok_or(CalcError::Overflow)
        }
        (a, b) => finite(a.as_f64() - b.as_f64()),
    }
}

fn mul(lhs: Number, rhs: Number) -> Result<Number, CalcError> {
    match (lhs, rhs) {
        (Number::Int(a), Number::Int(b)) => {
            a.checked_mul(b).map(Number::Int).ok_or(CalcError::Overflow)
        }
        (a, b) => finite(a.as_f64() * b.as_f64()),
    }
}

fn div(lhs: Number, rhs: Number) -> Result<Number, CalcError> {
    let divisor = rhs.as_f64();
    if divisor == 0.0 {
        return Err(CalcError::DivisionByZero);
    }
    finite(lhs.as_f64() / divisor)
}

fn floor_div(lhs: Number, rhs: Number) -> Result<Number, CalcError> {
    match (lhs, rhs) {
        (Number::Int(_), Number::Int(0)) => Err(CalcError::DivisionByZero),
        (Number::Int(a), Number::Int(b)) => {
            let quotient = a.checked_div(b).ok_or(CalcError::Overflow)?;
            // Round towards negative infinity.
            if a % b != 0 && (a < 0) != (b < 0) {
                Ok(Number::Int(quotient - 1))
            } else {
                Ok(Number::Int(quotient))
            }
        }
        (a, b) => {
            let divisor = b.as_f64();
            if divisor == 0.0 {
                return Err(CalcError::DivisionByZero);
            }
            finite((a.as_f64() / divisor).floor())
        }
    }
}

fn pow(base: Number, exponent: Number) -> Result<Number, CalcError> {
    if exponent.as_f64().abs() > MAX_EXPONENT {
        return Err(CalcError::ExponentTooLarge);
    }
    match (base, exponent) {
        (Number::Int(a), Number::Int(b)) if b >= 0 => a
            .checked_pow(b as u32)
            .map(Number::Int)
            .ok_or(CalcError::Overflow),
        (a, b) => {
            if a.as_f64() == 0.0 && b.as_f64() < 0.0 {
                return Err(CalcError::DivisionByZero);
            }
            finite(a.as_f64().powf(b.as_f64()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(expression: &str) -> String {
        evaluate(expression).unwrap().to_string()
    }

    #[test]
    fn test_precedence() {
        assert_eq!(eval("2 + 2 * 3"), "8");
        assert_eq!(eval("(2 + 2) * 3"), "12");
        assert_eq!(eval("10 - 4 - 3"), "3");
        assert_eq!(eval("2 ** 3 ** 2"), "512");
        assert_eq!(eval("-2 ** 2"), "-4");
        assert_eq!(eval("2 ** -1"), "0.5");
        assert_eq!(eval("--3"), "3");
    }

    #[test]
    fn test_division() {
        assert_eq!(eval("7 / 2"), "3.5");
        assert_eq!(eval("4 / 2"), "2.0");
        assert_eq!(eval("7 // 2"), "3");
        assert_eq!(eval("-7 // 2"), "-4");
        assert_eq!(eval("7.5 // 2"), "3.0");
        assert_eq!(evaluate("1 / 0"), Err(CalcError::DivisionByZero));
        assert_eq!(evaluate("1 // 0"), Err(CalcError::DivisionByZero));
    }

    #[test]
    fn test_floats() {
        assert_eq!(eval("0.1 + 0.2"), "0.30000000000000004");
        assert_eq!(eval(".5 * 4"), "2.0");
        assert_eq!(eval("1. + 1"), "2.0");
        assert!(matches!(
            evaluate("1.2.3"),
            Err(CalcError::InvalidNumber(_))
        ));
    }

    #[test]
    fn test_malformed() {
        assert_eq!(evaluate(""), Err(CalcError::Empty));
        assert_eq!(evaluate("   "), Err(CalcError::Empty));
        assert_eq!(evaluate("(1 + 2"), Err(CalcError::UnexpectedEnd));
        assert_eq!(evaluate("1 +"), Err(CalcError::UnexpectedEnd));
        assert_eq!(evaluate("1 2"), Err(CalcError::Unexpected("2".to_owned())));
        assert_eq!(evaluate("1, 2"), Err(CalcError::Tuple));
        assert_eq!(evaluate("(1, 2)"), Err(CalcError::Tuple));
    }

    #[test]
    fn test_limits() {
        assert_eq!(evaluate(&"1+".repeat(600)), Err(CalcError::TooLong));

        let nested = format!("{}1{}", "(".repeat(100), ")".repeat(100));
        assert_eq!(evaluate(&nested), Err(CalcError::TooDeep));
        let nested = format!("{}1{}", "(".repeat(10), ")".repeat(10));
        assert_eq!(eval(&nested), "1");
        assert_eq!(evaluate(&"-".repeat(200)), Err(CalcError::TooDeep));

        assert_eq!(evaluate("9 ** 99999"), Err(CalcError::ExponentTooLarge));
        assert_eq!(
            evaluate("2 ** 2 ** 2 ** 2 ** 2"),
            Err(CalcError::ExponentTooLarge)
        );
        assert_eq!(evaluate("10 ** 100"), Err(CalcError::Overflow));
        assert_eq!(
            evaluate("9223372036854775807 + 1"),
            Err(CalcError::Overflow)
        );
        assert_eq!(evaluate("10.0 ** 400"), Err(CalcError::Overflow));
    }

    #[test]
    fn test_negative_base_with_fraction() {
        assert_eq!(evaluate("(0-8) ** 0.5"), Err(CalcError::NotANumber));
        assert_eq!(evaluate("(-2) ** -0.5"), Err(CalcError::NotANumber));
        // The sign applies after the power.
        assert_eq!(eval("-4 ** 0.5"), "-2.0");

        let err = calculate("(0-8) ** 0.5").unwrap_err();
        assert_eq!(
            format!("Error: {err}"),
            "Error: could not calculate expression: \
             result is not a real number"
        );
    }

    #[test]
    fn test_tool_output() {
        assert_eq!(calculate("2 + 2 * 3").unwrap(), "Result: 8");

        let err = calculate("import os").unwrap_err();
        assert_eq!(
            format!("Error: {err}"),
            "Error: Only basic mathematical operations are allowed"
        );
        let err = calculate("__import__('os')").unwrap_err();
        assert_eq!(
            err.reason(),
            "Only basic mathematical operations are allowed"
        );

        let err = calculate("1 / 0").unwrap_err();
        assert_eq!(
            format!("Error: {err}"),
            "Error: could not calculate expression: division by zero"
        );
    }

    #[tokio::test]
    async fn test_execute() {
        let tool = CalculateTool::new();
        let input: CalculateToolParameters =
            serde_json::from_value(serde_json::json!({ "expression": "6 * 7" }))
                .unwrap();
        assert_eq!(tool.execute(input).await.unwrap(), "Result: 42");
    }
}
