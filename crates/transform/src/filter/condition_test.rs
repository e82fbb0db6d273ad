//! Tests for compiled conditions

use super::*;
use serde_json::json;

fn event(value: Value) -> Event {
    Event::from_value("log", value).unwrap()
}

// =============================================================================
// Parsing
// =============================================================================

#[test]
fn test_numeric_operand_parsed_once() {
    let condition = Condition::parse("http/status", "gte", Some("500".into())).unwrap();
    assert!(matches!(condition.test, Test::Compare(Bound::AtLeast, v) if v == 500.0));
    assert_eq!(condition.path.depth(), 2);
}

#[test]
fn test_numeric_operand_must_be_number() {
    let err = Condition::parse("status", "gt", Some("high".into())).unwrap_err();
    assert!(err.contains("needs a number"));
}

#[test]
fn test_operand_required() {
    let err = Test::parse("eq", None).unwrap_err();
    assert!(err.contains("requires a value"));
    assert!(matches!(Test::parse("exists", None), Ok(Test::Exists)));
}

#[test]
fn test_invalid_inputs() {
    assert!(Condition::eq("a//b", "x").is_err());
    assert!(Condition::eq("", "x").is_err());
    assert!(Condition::regex("message", "[unclosed").unwrap_err().contains("invalid regex"));
    assert!(Test::parse("like", Some("x".into())).unwrap_err().contains("unknown operator"));
}

// =============================================================================
// Evaluation
// =============================================================================

#[test]
fn test_equality_across_representations() {
    let condition = Condition::eq("ratio", "1").unwrap();
    assert!(condition.evaluate(&event(json!({"ratio": 1.0}))).unwrap());
    assert!(condition.evaluate(&event(json!({"ratio": "1"}))).unwrap());
    assert!(!condition.evaluate(&event(json!({"ratio": 2}))).unwrap());

    let flag = Condition::eq("sampled", "true").unwrap();
    assert!(flag.evaluate(&event(json!({"sampled": true}))).unwrap());
}

#[test]
fn test_not_equals_on_missing_field() {
    let condition = Condition::ne("trace_id", "0").unwrap();
    assert!(condition.evaluate(&event(json!({"span": "x"}))).unwrap());
    assert!(!condition.evaluate(&event(json!({"trace_id": "0"}))).unwrap());
}

#[test]
fn test_string_tests_on_nested_paths() {
    let contains = Condition::contains("user/email", "@example.").unwrap();
    assert!(contains.evaluate(&event(json!({"user": {"email": "a@example.com"}}))).unwrap());
    assert!(!contains.evaluate(&event(json!({"user": "flat"}))).unwrap());

    let pattern = Condition::regex("path", "^/metrics").unwrap();
    assert!(pattern.evaluate(&event(json!({"path": "/metrics/cpu"}))).unwrap());
    assert!(!pattern.evaluate(&event(json!({"path": "/api"}))).unwrap());
}

#[test]
fn test_numeric_compare() {
    let condition = Condition::gt("status", 499.0).unwrap();
    assert!(condition.evaluate(&event(json!({"status": 503}))).unwrap());
    assert!(condition.evaluate(&event(json!({"status": " 500 "}))).unwrap());
    assert!(!condition.evaluate(&event(json!({"status": 200}))).unwrap());
    assert!(!condition.evaluate(&event(json!({"other": 1}))).unwrap());
}

#[test]
fn test_numeric_compare_undecided() {
    let condition = Condition::lt("status", 400.0).unwrap();
    let err = condition.evaluate(&event(json!({"status": "oops"}))).unwrap_err();
    assert!(err.contains("not numeric"));
    assert!(err.contains("lt"));
}
