//! onFail 处理器
//!
//! 仅在 HTTP 调用发生硬失败（无响应对象）时触发。
//! 传给脚本的是消毒后的可序列化错误对象，显式排除循环引用
//! 与敏感字段。处理器自身抛出时，原错误消息被追加编号列表，
//! 而不是被替换。

use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::RuquestError;
use crate::collection::RequestContext;
use crate::script::{RunScriptParams, RuntimeProvider, tracing_console_sink};
use crate::variable::VariableSet;

/// 传入 onFail 脚本的消毒错误对象
///
/// 只保留白名单字段，绝不携带原始错误里的循环 / 敏感结构。
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SanitizedError {
    pub message: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errno: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub syscall: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl SanitizedError {
    pub fn from_error(error: &RuquestError, request_url: &str) -> Self {
        let name = match error {
            RuquestError::TransportError(_) | RuquestError::HttpError(_) => "TransportError",
            RuquestError::Cancelled => "CancelError",
            RuquestError::ValidationError(_) => "ValidationError",
            RuquestError::ScriptError(_) | RuquestError::ScriptTimeout(_) => "ScriptError",
            _ => "Error",
        };

        let (hostname, port) = url::Url::parse(request_url)
            .map(|u| {
                (
                    u.host_str().map(|h| h.to_string()),
                    u.port_or_known_default(),
                )
            })
            .unwrap_or((None, None));

        Self {
            message: error.to_string(),
            name: name.to_string(),
            hostname,
            port,
            ..Self::default()
        }
    }

    fn to_script_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// 执行 onFail 处理器，返回最终应记录的错误消息
///
/// 处理器执行失败时，组合为编号列表：
/// `1. Request failed: …` / `2. Error executing onFail handler: …`
pub async fn run_on_fail(
    provider: &dyn RuntimeProvider,
    context: &RequestContext,
    error: &RuquestError,
    vars: &VariableSet,
) -> String {
    let original_message = error.to_string();
    let Some(handler) = context.request.on_fail.as_deref() else {
        return original_message;
    };
    if handler.trim().is_empty() {
        return original_message;
    }

    let sanitized = SanitizedError::from_error(error, &context.request.url);

    // 错误对象以脚本前置声明的方式进入 guest
    let script = format!(
        "const error = {};\n{}",
        sanitized.to_script_value(),
        handler
    );
    let mut params = RunScriptParams::new(&script, vars);
    params.collection_name = &context.collection_name;
    params.collection_path = Some(context.collection_path.clone());
    params.on_console = Some(tracing_console_sink());

    match provider.run_script(params).await {
        Ok(result) => match result.error {
            None => original_message,
            Some(handler_error) => combine(&original_message, &handler_error),
        },
        Err(e) => {
            warn!("onFail handler could not run: {}", e);
            combine(&original_message, &e.to_string())
        }
    }
}

fn combine(original: &str, handler_error: &str) -> String {
    format!(
        "1. Request failed: {}\n2. Error executing onFail handler: {}",
        original, handler_error
    )
}
