//! Compiled filter conditions
//!
//! Operands are parsed once when the processor is built: numeric operands
//! become `f64`, patterns become a compiled `Regex`. Evaluation never
//! re-parses configuration.

use regex::Regex;
use serde_json::Value;
use sluice_protocol::{Event, KeyPath};

#[cfg(test)]
#[path = "condition_test.rs"]
mod tests;

/// Numeric comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    Above,
    Below,
    AtLeast,
    AtMost,
}

impl Bound {
    #[inline]
    fn holds(self, actual: f64, operand: f64) -> bool {
        match self {
            Self::Above => actual > operand,
            Self::Below => actual < operand,
            Self::AtLeast => actual >= operand,
            Self::AtMost => actual <= operand,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Above => "gt",
            Self::Below => "lt",
            Self::AtLeast => "gte",
            Self::AtMost => "lte",
        }
    }
}

/// What a condition checks at its key path
#[derive(Debug, Clone)]
pub enum Test {
    /// The path resolves to a value
    Exists,
    /// Scalar equality; numbers compare by value (`1` equals `1.0`)
    Equals(String),
    /// Negated equality; a missing field is not equal to anything
    NotEquals(String),
    Contains(String),
    StartsWith(String),
    EndsWith(String),
    Matches(Regex),
    /// Numeric comparison against a pre-parsed operand
    Compare(Bound, f64),
}

impl Test {
    /// Build a test from an operator name and its operand
    pub fn parse(operator: &str, operand: Option<String>) -> Result<Self, String> {
        if operator == "exists" {
            return Ok(Self::Exists);
        }

        let operand = operand.ok_or_else(|| format!("operator '{operator}' requires a value"))?;
        let bound = match operator {
            "eq" => return Ok(Self::Equals(operand)),
            "ne" => return Ok(Self::NotEquals(operand)),
            "contains" => return Ok(Self::Contains(operand)),
            "starts_with" => return Ok(Self::StartsWith(operand)),
            "ends_with" => return Ok(Self::EndsWith(operand)),
            "regex" => {
                return Regex::new(&operand)
                    .map(Self::Matches)
                    .map_err(|e| format!("invalid regex '{operand}': {e}"));
            }
            "gt" => Bound::Above,
            "lt" => Bound::Below,
            "gte" => Bound::AtLeast,
            "lte" => Bound::AtMost,
            other => return Err(format!("unknown operator: {other}")),
        };

        let number = operand
            .parse::<f64>()
            .map_err(|_| format!("operator '{operator}' needs a number, got '{operand}'"))?;
        Ok(Self::Compare(bound, number))
    }
}

/// One check against one key path
#[derive(Debug, Clone)]
pub struct Condition {
    pub path: KeyPath,
    pub test: Test,
}

impl Condition {
    pub fn new(path: KeyPath, test: Test) -> Self {
        Self { path, test }
    }

    /// Parse `path` and build the test for `operator`
    pub fn parse(path: &str, operator: &str, operand: Option<String>) -> Result<Self, String> {
        let path = KeyPath::parse(path).map_err(|e| e.to_string())?;
        Ok(Self::new(path, Test::parse(operator, operand)?))
    }

    pub fn exists(path: &str) -> Result<Self, String> {
        Self::parse(path, "exists", None)
    }

    pub fn eq(path: &str, value: impl Into<String>) -> Result<Self, String> {
        Self::parse(path, "eq", Some(value.into()))
    }

    pub fn ne(path: &str, value: impl Into<String>) -> Result<Self, String> {
        Self::parse(path, "ne", Some(value.into()))
    }

    pub fn contains(path: &str, value: impl Into<String>) -> Result<Self, String> {
        Self::parse(path, "contains", Some(value.into()))
    }

    pub fn regex(path: &str, pattern: &str) -> Result<Self, String> {
        Self::parse(path, "regex", Some(pattern.to_string()))
    }

    pub fn gt(path: &str, value: f64) -> Result<Self, String> {
        Self::compare(path, Bound::Above, value)
    }

    pub fn lt(path: &str, value: f64) -> Result<Self, String> {
        Self::compare(path, Bound::Below, value)
    }

    fn compare(path: &str, bound: Bound, value: f64) -> Result<Self, String> {
        let path = KeyPath::parse(path).map_err(|e| e.to_string())?;
        Ok(Self::new(path, Test::Compare(bound, value)))
    }

    /// Evaluate against one event
    ///
    /// `Err` carries the reason the outcome cannot be decided: a numeric
    /// comparison on a field that holds something other than a number.
    pub fn evaluate(&self, event: &Event) -> Result<bool, String> {
        let field = event.get_path(&self.path).ok();

        let matched = match &self.test {
            Test::Exists => field.is_some(),
            Test::Equals(expected) => field.is_some_and(|v| scalar_equals(v, expected)),
            Test::NotEquals(expected) => !field.is_some_and(|v| scalar_equals(v, expected)),
            Test::Contains(needle) => with_text(field, |s| s.contains(needle.as_str())),
            Test::StartsWith(prefix) => with_text(field, |s| s.starts_with(prefix.as_str())),
            Test::EndsWith(suffix) => with_text(field, |s| s.ends_with(suffix.as_str())),
            Test::Matches(re) => with_text(field, |s| re.is_match(s)),
            Test::Compare(bound, operand) => {
                let Some(value) = field else {
                    return Ok(false);
                };
                let actual = as_number(value).ok_or_else(|| {
                    format!(
                        "field '{}' is not numeric, cannot apply {}",
                        self.path,
                        bound.as_str()
                    )
                })?;
                bound.holds(actual, *operand)
            }
        };

        Ok(matched)
    }
}

fn with_text(field: Option<&Value>, check: impl Fn(&str) -> bool) -> bool {
    match field {
        Some(Value::String(s)) => check(s),
        Some(Value::Number(n)) => check(&n.to_string()),
        Some(Value::Bool(b)) => check(if *b { "true" } else { "false" }),
        _ => false,
    }
}

fn scalar_equals(value: &Value, expected: &str) -> bool {
    match value {
        Value::String(s) => s == expected,
        Value::Number(n) => {
            n.to_string() == expected
                || matches!((n.as_f64(), expected.parse::<f64>()), (Some(a), Ok(b)) if a == b)
        }
        Value::Bool(b) => expected == if *b { "true" } else { "false" },
        Value::Null => expected == "null",
        _ => false,
    }
}

/// Numbers and numeric strings
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
