use std::fmt;

/// 断言错误类型
#[derive(Debug, thiserror::Error)]
pub enum AssertError {
    #[error("Invalid assertion expression: {0}")]
    InvalidExpression(String),

    #[error("Invalid operator: {0}")]
    InvalidOperator(String),

    #[error("Path not found: {0}")]
    PathNotFound(String),

    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid regex: {0}")]
    RegexError(#[from] regex::Error),

    #[error("Value extraction failed: {0}")]
    ExtractionError(String),
}

/// 取值路径 - 从响应中提取断言左值
#[derive(Debug, Clone, PartialEq)]
pub enum ValuePath {
    /// HTTP 状态码 (res.status)
    Status,
    /// 响应 Header (res.headers.<name>)
    Header(String),
    /// JSON Body 路径 (res.body.<a.b.c>)
    Body(Vec<String>),
    /// 响应时间毫秒数 (res.responseTime)
    ResponseTime,
}

impl fmt::Display for ValuePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValuePath::Status => write!(f, "res.status"),
            ValuePath::Header(name) => write!(f, "res.headers.{}", name),
            ValuePath::Body(segments) => write!(f, "res.body.{}", segments.join(".")),
            ValuePath::ResponseTime => write!(f, "res.responseTime"),
        }
    }
}

/// 断言运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssertOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    NotContains,
    Matches,
    StartsWith,
    EndsWith,
    /// 一元：路径存在即通过
    Exists,
    /// 一元：值为 null
    IsNull,
    /// 一元：空字符串
    IsEmpty,
}

impl AssertOp {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "eq" => Some(Self::Eq),
            "neq" => Some(Self::Neq),
            "gt" => Some(Self::Gt),
            "gte" => Some(Self::Gte),
            "lt" => Some(Self::Lt),
            "lte" => Some(Self::Lte),
            "contains" => Some(Self::Contains),
            "notContains" => Some(Self::NotContains),
            "matches" => Some(Self::Matches),
            "startsWith" => Some(Self::StartsWith),
            "endsWith" => Some(Self::EndsWith),
            "exists" => Some(Self::Exists),
            "isNull" => Some(Self::IsNull),
            "isEmpty" => Some(Self::IsEmpty),
            _ => None,
        }
    }

    /// 一元运算符没有右值
    pub fn is_unary(&self) -> bool {
        matches!(self, Self::Exists | Self::IsNull | Self::IsEmpty)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Neq => "neq",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Contains => "contains",
            Self::NotContains => "notContains",
            Self::Matches => "matches",
            Self::StartsWith => "startsWith",
            Self::EndsWith => "endsWith",
            Self::Exists => "exists",
            Self::IsNull => "isNull",
            Self::IsEmpty => "isEmpty",
        }
    }
}

impl fmt::Display for AssertOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 断言值
#[derive(Debug, Clone, PartialEq)]
pub enum AssertValue {
    Number(f64),
    String(String),
    Bool(bool),
    Null,
}

impl fmt::Display for AssertValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssertValue::Number(n) => write!(f, "{}", n),
            AssertValue::String(s) => write!(f, "{}", s),
            AssertValue::Bool(b) => write!(f, "{}", b),
            AssertValue::Null => write!(f, "null"),
        }
    }
}

impl AssertValue {
    /// 从插值后的右值文本推断类型
    pub fn coerce(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed == "null" {
            return AssertValue::Null;
        }
        if trimmed == "true" {
            return AssertValue::Bool(true);
        }
        if trimmed == "false" {
            return AssertValue::Bool(false);
        }
        if let Ok(n) = trimmed.parse::<f64>() {
            return AssertValue::Number(n);
        }
        // 去掉可选的成对引号
        let unquoted = trimmed
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .unwrap_or(trimmed);
        AssertValue::String(unquoted.to_string())
    }

    fn as_text(&self) -> String {
        self.to_string()
    }

    /// 二元比较
    pub fn compare(&self, op: AssertOp, other: &AssertValue) -> Result<bool, AssertError> {
        match op {
            AssertOp::Eq => Ok(self.loose_eq(other)),
            AssertOp::Neq => Ok(!self.loose_eq(other)),

            AssertOp::Gt | AssertOp::Gte | AssertOp::Lt | AssertOp::Lte => {
                let (a, b) = match (self, other) {
                    (AssertValue::Number(a), AssertValue::Number(b)) => (*a, *b),
                    _ => {
                        return Err(AssertError::TypeMismatch {
                            expected: "number".to_string(),
                            actual: format!("{:?}", self),
                        });
                    }
                };
                Ok(match op {
                    AssertOp::Gt => a > b,
                    AssertOp::Gte => a >= b,
                    AssertOp::Lt => a < b,
                    AssertOp::Lte => a <= b,
                    _ => unreachable!(),
                })
            }

            AssertOp::Contains => Ok(self.as_text().contains(&other.as_text())),
            AssertOp::NotContains => Ok(!self.as_text().contains(&other.as_text())),
            AssertOp::StartsWith => Ok(self.as_text().starts_with(&other.as_text())),
            AssertOp::EndsWith => Ok(self.as_text().ends_with(&other.as_text())),

            AssertOp::Matches => {
                let re = regex::Regex::new(&other.as_text())?;
                Ok(re.is_match(&self.as_text()))
            }

            AssertOp::Exists | AssertOp::IsNull | AssertOp::IsEmpty => {
                Err(AssertError::InvalidOperator(format!(
                    "Operator {} takes no right-hand value",
                    op
                )))
            }
        }
    }

    /// 宽松相等：数字按数值比，其余按同型比，跨类型比文本
    fn loose_eq(&self, other: &AssertValue) -> bool {
        match (self, other) {
            (AssertValue::Number(a), AssertValue::Number(b)) => (a - b).abs() < f64::EPSILON,
            (AssertValue::String(a), AssertValue::String(b)) => a == b,
            (AssertValue::Bool(a), AssertValue::Bool(b)) => a == b,
            (AssertValue::Null, AssertValue::Null) => true,
            (AssertValue::Null, _) | (_, AssertValue::Null) => false,
            (a, b) => a.as_text() == b.as_text(),
        }
    }
}

/// 单条断言的评估结果
#[derive(Debug, Clone)]
pub struct AssertionOutcome {
    /// 结果 id
    pub id: String,

    /// 左值表达式
    pub lhs_expr: String,

    /// 右侧原始文本（运算符 + 期望值）
    pub rhs_expr: String,

    /// 是否通过
    pub passed: bool,

    /// 实际值（字符串表示）
    pub actual: Option<String>,

    /// 失败消息
    pub message: Option<String>,
}

impl AssertionOutcome {
    pub fn pass(lhs: String, rhs: String, actual: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            lhs_expr: lhs,
            rhs_expr: rhs,
            passed: true,
            actual: Some(actual),
            message: None,
        }
    }

    pub fn fail(lhs: String, rhs: String, actual: Option<String>, message: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            lhs_expr: lhs,
            rhs_expr: rhs,
            passed: false,
            actual,
            message: Some(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_parse() {
        assert_eq!(AssertOp::parse("eq"), Some(AssertOp::Eq));
        assert_eq!(AssertOp::parse("notContains"), Some(AssertOp::NotContains));
        assert_eq!(AssertOp::parse("isNull"), Some(AssertOp::IsNull));
        assert_eq!(AssertOp::parse("=="), None);
    }

    #[test]
    fn test_coerce_types() {
        assert_eq!(AssertValue::coerce("200"), AssertValue::Number(200.0));
        assert_eq!(AssertValue::coerce("true"), AssertValue::Bool(true));
        assert_eq!(AssertValue::coerce("null"), AssertValue::Null);
        assert_eq!(
            AssertValue::coerce("\"42\""),
            AssertValue::String("42".to_string())
        );
        assert_eq!(
            AssertValue::coerce("hello"),
            AssertValue::String("hello".to_string())
        );
    }

    #[test]
    fn test_numeric_compare() {
        let a = AssertValue::Number(10.0);
        let b = AssertValue::Number(5.0);
        assert!(a.compare(AssertOp::Gt, &b).unwrap());
        assert!(b.compare(AssertOp::Lte, &a).unwrap());
        assert!(!a.compare(AssertOp::Eq, &b).unwrap());
    }

    #[test]
    fn test_string_ops() {
        let s = AssertValue::String("hello world".to_string());
        assert!(
            s.compare(AssertOp::Contains, &AssertValue::String("world".into()))
                .unwrap()
        );
        assert!(
            s.compare(AssertOp::StartsWith, &AssertValue::String("hello".into()))
                .unwrap()
        );
        assert!(
            s.compare(AssertOp::Matches, &AssertValue::String("^hello".into()))
                .unwrap()
        );
    }

    #[test]
    fn test_cross_type_eq_compares_text() {
        let n = AssertValue::Number(200.0);
        let s = AssertValue::String("200".to_string());
        assert!(n.compare(AssertOp::Eq, &s).unwrap());
    }

    #[test]
    fn test_ordering_requires_numbers() {
        let s = AssertValue::String("a".to_string());
        assert!(
            s.compare(AssertOp::Gt, &AssertValue::String("b".into()))
                .is_err()
        );
    }

    #[test]
    fn test_value_path_display() {
        assert_eq!(ValuePath::Status.to_string(), "res.status");
        assert_eq!(
            ValuePath::Body(vec!["user".into(), "id".into()]).to_string(),
            "res.body.user.id"
        );
    }
}
