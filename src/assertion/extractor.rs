use crate::assertion::types::{AssertError, AssertValue, ValuePath};
use crate::http::Response;

/// 从响应中提取断言左值
pub fn extract_value(response: &Response, path: &ValuePath) -> Result<AssertValue, AssertError> {
    match path {
        ValuePath::Status => Ok(AssertValue::Number(response.status.code() as f64)),

        ValuePath::Header(name) => {
            let value = response
                .headers
                .get(name.as_str())
                .ok_or_else(|| AssertError::PathNotFound(format!("Header '{}' not found", name)))?;
            Ok(AssertValue::String(
                value
                    .to_str()
                    .map_err(|e| {
                        AssertError::ExtractionError(format!(
                            "Failed to convert header value to string: {}",
                            e
                        ))
                    })?
                    .to_string(),
            ))
        }

        ValuePath::Body(segments) => extract_from_json_body(&response.body, segments),

        ValuePath::ResponseTime => Ok(AssertValue::Number(response.duration.as_millis() as f64)),
    }
}

/// 从 JSON body 中提取值，路径段支持数组下标
fn extract_from_json_body(body: &str, segments: &[String]) -> Result<AssertValue, AssertError> {
    let json_value: serde_json::Value = serde_json::from_str(body)?;

    let mut current = &json_value;
    for segment in segments {
        current = match segment.parse::<usize>() {
            Ok(index) if current.is_array() => current.get(index),
            _ => current.get(segment.as_str()),
        }
        .ok_or_else(|| {
            AssertError::PathNotFound(format!("Path 'res.body.{}' not found", segments.join(".")))
        })?;
    }

    json_value_to_assert_value(current)
}

fn json_value_to_assert_value(value: &serde_json::Value) -> Result<AssertValue, AssertError> {
    match value {
        serde_json::Value::Number(n) => n
            .as_f64()
            .map(AssertValue::Number)
            .ok_or_else(|| {
                AssertError::ExtractionError("Number cannot be represented as f64".to_string())
            }),
        serde_json::Value::String(s) => Ok(AssertValue::String(s.clone())),
        serde_json::Value::Bool(b) => Ok(AssertValue::Bool(*b)),
        serde_json::Value::Null => Ok(AssertValue::Null),
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => Err(
            AssertError::ExtractionError("Cannot compare arrays or objects directly".to_string()),
        ),
    }
}
