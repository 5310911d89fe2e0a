use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuquestError {
    #[error("校验错误: {0}")]
    ValidationError(String),

    #[error("脚本错误: {0}")]
    ScriptError(String),

    #[error("脚本执行超时 ({0:?})")]
    ScriptTimeout(std::time::Duration),

    #[error("沙箱资源错误: {0}")]
    SandboxError(String),

    #[error("网络错误: {0}")]
    TransportError(String),

    #[error("请求已取消")]
    Cancelled,

    #[error("HTTP 请求失败: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON 解析错误: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("URL 解析错误: {0}")]
    UrlParseError(#[from] url::ParseError),

    #[error("{0}")]
    Other(String),
}

// Add conversion from anyhow::Error
impl From<anyhow::Error> for RuquestError {
    fn from(err: anyhow::Error) -> Self {
        RuquestError::Other(err.to_string())
    }
}

// Add conversion from assertion::AssertError
impl From<crate::assertion::AssertError> for RuquestError {
    fn from(err: crate::assertion::AssertError) -> Self {
        RuquestError::Other(err.to_string())
    }
}

impl RuquestError {
    /// 是否为不可恢复的传输层失败（无响应对象）
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            RuquestError::TransportError(_) | RuquestError::HttpError(_)
        )
    }

    /// 是否为取消信号
    pub fn is_cancel(&self) -> bool {
        matches!(self, RuquestError::Cancelled)
    }
}

/// Result type for ruquest crate
pub type Result<T> = std::result::Result<T, RuquestError>;
