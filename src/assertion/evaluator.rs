use crate::assertion::extractor::extract_value;
use crate::assertion::parser::{parse_operation, parse_value_path};
use crate::assertion::types::{AssertOp, AssertValue, AssertionOutcome};
use crate::collection::AssertionEntry;
use crate::http::Response;
use crate::variable::{VariableResolver, VariableSet};

/// 评估全部启用的断言
///
/// 单条断言的失败或求值错误相互隔离，不影响其余断言。
pub fn evaluate_assertions(
    entries: &[AssertionEntry],
    response: &Response,
    vars: &VariableSet,
) -> Vec<AssertionOutcome> {
    entries
        .iter()
        .filter(|e| e.enabled)
        .map(|e| evaluate_assertion(e, response, vars))
        .collect()
}

/// 评估单条断言
///
/// 右值先做 {{var}} 插值再做类型推断。
pub fn evaluate_assertion(
    entry: &AssertionEntry,
    response: &Response,
    vars: &VariableSet,
) -> AssertionOutcome {
    let lhs_expr = entry.name.clone();
    let rhs_expr = entry.value.clone();

    let path = match parse_value_path(&entry.name) {
        Ok(path) => path,
        Err(e) => return AssertionOutcome::fail(lhs_expr, rhs_expr, None, e.to_string()),
    };

    let (op, raw_rhs) = match parse_operation(&entry.value) {
        Ok(parsed) => parsed,
        Err(e) => return AssertionOutcome::fail(lhs_expr, rhs_expr, None, e.to_string()),
    };

    // 一元运算符：先处理存在性，路径缺失不算求值错误
    if op == AssertOp::Exists {
        return match extract_value(response, &path) {
            Ok(actual) => AssertionOutcome::pass(lhs_expr, rhs_expr, actual.to_string()),
            Err(_) => AssertionOutcome::fail(
                lhs_expr.clone(),
                rhs_expr,
                None,
                format!("Expected {} to exist, but it was not found", lhs_expr),
            ),
        };
    }

    let actual = match extract_value(response, &path) {
        Ok(actual) => actual,
        Err(e) => return AssertionOutcome::fail(lhs_expr, rhs_expr, None, e.to_string()),
    };

    match op {
        AssertOp::IsNull => {
            let passed = actual == AssertValue::Null;
            finish(lhs_expr, rhs_expr, actual, passed, "to be null")
        }
        AssertOp::IsEmpty => {
            let passed = matches!(&actual, AssertValue::String(s) if s.is_empty());
            finish(lhs_expr, rhs_expr, actual, passed, "to be empty")
        }
        _ => {
            let interpolated = VariableResolver::interpolate(&raw_rhs, vars);
            let expected = AssertValue::coerce(&interpolated);
            match actual.compare(op, &expected) {
                Ok(true) => AssertionOutcome::pass(lhs_expr, rhs_expr, actual.to_string()),
                Ok(false) => {
                    let message = format!(
                        "Expected {} {} {}, but got {}",
                        lhs_expr, op, expected, actual
                    );
                    AssertionOutcome::fail(lhs_expr, rhs_expr, Some(actual.to_string()), message)
                }
                Err(e) => {
                    AssertionOutcome::fail(lhs_expr, rhs_expr, Some(actual.to_string()), e.to_string())
                }
            }
        }
    }
}

fn finish(
    lhs: String,
    rhs: String,
    actual: AssertValue,
    passed: bool,
    expectation: &str,
) -> AssertionOutcome {
    if passed {
        AssertionOutcome::pass(lhs, rhs, actual.to_string())
    } else {
        let message = format!("Expected {} {}, but got {}", lhs, expectation, actual);
        AssertionOutcome::fail(lhs, rhs, Some(actual.to_string()), message)
    }
}
