use crate::assertion::types::{AssertError, AssertOp, ValuePath};

/// 解析断言左值表达式
///
/// 支持的形式：
/// - `res.status`
/// - `res.responseTime`
/// - `res.headers.<name>`
/// - `res.body.<a.b.c>`（`res.body` 前缀可省略为裸路径）
pub fn parse_value_path(expr: &str) -> Result<ValuePath, AssertError> {
    let expr = expr.trim();
    if expr.is_empty() {
        return Err(AssertError::InvalidExpression(
            "empty assertion expression".to_string(),
        ));
    }

    match expr {
        "res.status" => return Ok(ValuePath::Status),
        "res.responseTime" => return Ok(ValuePath::ResponseTime),
        _ => {}
    }

    if let Some(name) = expr.strip_prefix("res.headers.") {
        if name.is_empty() {
            return Err(AssertError::InvalidExpression(expr.to_string()));
        }
        return Ok(ValuePath::Header(name.to_string()));
    }

    let body_path = expr.strip_prefix("res.body.").unwrap_or(expr);
    if body_path.starts_with("res.") {
        return Err(AssertError::InvalidExpression(format!(
            "Unknown response path: {}",
            expr
        )));
    }

    let segments: Vec<String> = body_path.split('.').map(|s| s.to_string()).collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(AssertError::InvalidExpression(expr.to_string()));
    }
    Ok(ValuePath::Body(segments))
}

/// 解析断言右侧文本：`运算符 [期望值]`
///
/// 一元运算符（exists / isNull / isEmpty）不带期望值；
/// 返回 (运算符, 期望值原始文本)。
pub fn parse_operation(value: &str) -> Result<(AssertOp, String), AssertError> {
    let value = value.trim();
    let (op_text, rest) = match value.split_once(char::is_whitespace) {
        Some((op, rest)) => (op, rest.trim()),
        None => (value, ""),
    };

    let op = AssertOp::parse(op_text)
        .ok_or_else(|| AssertError::InvalidOperator(op_text.to_string()))?;

    if op.is_unary() {
        if !rest.is_empty() {
            return Err(AssertError::InvalidExpression(format!(
                "Operator {} takes no operand, got '{}'",
                op, rest
            )));
        }
        return Ok((op, String::new()));
    }

    if rest.is_empty() {
        return Err(AssertError::InvalidExpression(format!(
            "Operator {} requires an operand",
            op
        )));
    }

    Ok((op, rest.to_string()))
}
