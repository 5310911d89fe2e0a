use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use reqwest::header::{HeaderMap as Headers, HeaderName, HeaderValue};

use crate::Result;
use crate::RuquestError;
use crate::http::types::Method;

/// 插值完成后的请求体载荷
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyPayload {
    Text(String),
    /// application/x-www-form-urlencoded 字段
    Form(Vec<(String, String)>),
    /// multipart/form-data 字段
    Multipart(Vec<(String, String)>),
}

/// 插值完成、可直接发出的请求
///
/// 由 INTERPOLATE 阶段产出，HTTP_CALL 阶段消费。
#[derive(Debug, Clone)]
pub struct InterpolatedRequest {
    pub method: Method,
    pub url: String,
    pub headers: Headers,
    pub body: Option<BodyPayload>,
}

impl InterpolatedRequest {
    pub fn new(method: &str, url: &str) -> Result<Self> {
        Ok(Self {
            method: method.parse()?,
            url: url.to_string(),
            headers: Headers::new(),
            body: None,
        })
    }

    fn insert_header(&mut self, key: &str, value: &str) -> Result<()> {
        let name: HeaderName = key
            .parse()
            .map_err(|_| RuquestError::ValidationError(format!("Invalid header name: {}", key)))?;
        let value: HeaderValue = value.parse().map_err(|_| {
            RuquestError::ValidationError(format!("Invalid header value for {}", key))
        })?;
        self.headers.insert(name, value);
        Ok(())
    }

    pub fn with_header(mut self, key: &str, value: &str) -> Result<Self> {
        self.insert_header(key, value)?;
        Ok(self)
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.body = Some(BodyPayload::Text(text.to_owned()));
        self
    }

    pub fn with_form(mut self, fields: Vec<(String, String)>) -> Self {
        self.body = Some(BodyPayload::Form(fields));
        self
    }

    pub fn with_multipart(mut self, fields: Vec<(String, String)>) -> Self {
        self.body = Some(BodyPayload::Multipart(fields));
        self
    }

    /// 检查 header 是否已存在（忽略大小写）
    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains_key(name.to_ascii_lowercase().as_str())
    }

    pub fn with_auth_basic(self, username: &str, password: &str) -> Result<Self> {
        let encoded = BASE64_STANDARD.encode(format!("{}:{}", username, password));
        self.with_header("Authorization", &format!("Basic {}", encoded))
    }

    pub fn with_auth_bearer(self, token: &str) -> Result<Self> {
        self.with_header("Authorization", &format!("Bearer {}", token))
    }
}
