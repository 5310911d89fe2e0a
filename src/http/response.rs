use crate::Result;
use crate::http::types::Status;
use reqwest::header::HeaderMap as Headers;
use serde_json::{Value, json};
use std::time::Duration;

/// 预请求脚本触发跳过时使用的合成 statusText
pub const SKIPPED_STATUS_TEXT: &str = "Request skipped via pre-request script";

#[derive(Debug, Clone)]
pub struct Response {
    pub status: Status,
    pub status_text: String,
    pub headers: Headers,
    pub body: String,
    pub duration: Duration,
}

impl Response {
    pub fn new(
        status: u16,
        status_text: Option<String>,
        headers: Headers,
        body: String,
        duration: Duration,
    ) -> Result<Self> {
        let status = Status::new(status)?;
        let status_text = status_text.unwrap_or_else(|| status.reason_phrase().to_string());
        Ok(Self {
            status,
            status_text,
            headers,
            body,
            duration,
        })
    }

    /// 预请求脚本设置 skipRequest 后的合成响应
    pub fn skipped() -> Self {
        Self {
            status: Status::new(200).expect("200 is a valid status"),
            status_text: SKIPPED_STATUS_TEXT.to_string(),
            headers: Headers::new(),
            body: String::new(),
            duration: Duration::from_millis(0),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// 尝试将 body 解析为 JSON
    pub fn json(&self) -> Result<Value> {
        Ok(serde_json::from_str(&self.body)?)
    }

    /// 注入脚本沙箱的 JSON 表示
    ///
    /// body 优先以解析后的 JSON 形式注入，解析失败则回落为字符串。
    pub fn to_script_value(&self) -> Value {
        let body: Value = serde_json::from_str(&self.body)
            .unwrap_or_else(|_| Value::String(self.body.clone()));

        let headers: serde_json::Map<String, Value> = self
            .headers
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|v| (k.as_str().to_string(), Value::String(v.to_string())))
            })
            .collect();

        json!({
            "status": self.status.code(),
            "statusText": self.status_text,
            "headers": headers,
            "body": body,
            "responseTime": self.duration.as_millis() as u64,
        })
    }
}
