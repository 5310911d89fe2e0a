use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;

use crate::RuquestError;
use crate::assertion::AssertionOutcome;
use crate::collection::RequestDefinition;
use crate::http::Response;
use crate::script::{SandboxOptions, TestOutcome};
use crate::variable::VariableSet;

/// 流水线阶段，严格顺序执行
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Prepare,
    PreRequestScript,
    Interpolate,
    HttpCall,
    PostResponseVars,
    PostResponseScript,
    Assertions,
    TestScript,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Prepare => "prepare",
            Phase::PreRequestScript => "pre-request-script",
            Phase::Interpolate => "interpolate",
            Phase::HttpCall => "http-call",
            Phase::PostResponseVars => "post-response-vars",
            Phase::PostResponseScript => "post-response-script",
            Phase::Assertions => "assertions",
            Phase::TestScript => "test-script",
        }
    }
}

/// 单阶段的时间线条目
#[derive(Debug, Clone)]
pub struct TimelineEntry {
    pub phase: Phase,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
}

/// 运行终止错误的分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunErrorKind {
    /// 方法 / URL 不合法，预检失败
    Validation,
    /// guest 脚本抛出（仅 pre-request 阶段致命）
    Script,
    /// 传输层失败，无响应对象
    Transport,
    /// 取消信号
    Cancel,
    /// 沙箱构造 / 释放失败
    Sandbox,
}

#[derive(Debug, Clone)]
pub struct RunError {
    pub kind: RunErrorKind,
    pub message: String,
}

impl RunError {
    pub fn new(kind: RunErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn from_error(error: &RuquestError) -> Self {
        let kind = match error {
            RuquestError::ValidationError(_) | RuquestError::UrlParseError(_) => {
                RunErrorKind::Validation
            }
            RuquestError::ScriptError(_) | RuquestError::ScriptTimeout(_) => RunErrorKind::Script,
            RuquestError::Cancelled => RunErrorKind::Cancel,
            RuquestError::SandboxError(_) => RunErrorKind::Sandbox,
            _ => RunErrorKind::Transport,
        };
        Self::new(kind, error.to_string())
    }
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// 一次流水线执行的终态产物，组装后不再修改
#[derive(Debug)]
pub struct RunResult {
    pub request: RequestDefinition,
    pub response: Option<Response>,
    pub error: Option<RunError>,
    /// 执行后的变量快照（持久化由调用方负责）
    pub variables: VariableSet,
    pub test_results: Vec<TestOutcome>,
    pub assertion_results: Vec<AssertionOutcome>,
    pub duration: Duration,
    pub skip_request: bool,
    pub stop_execution: bool,
    pub next_request_name: Option<String>,
    /// 取消是被区分的结果种类，不是一般错误
    pub cancelled: bool,
    pub timeline: Vec<TimelineEntry>,
}

/// 流水线配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunnerOptions {
    /// HTTP 调用超时
    pub http_timeout: Duration,
    /// 缺失时补默认 user-agent
    pub apply_default_user_agent: bool,
    /// bru.runRequest 递归深度上限
    pub max_run_request_depth: u32,
    pub sandbox: SandboxOptions,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            http_timeout: Duration::from_secs(30),
            apply_default_user_agent: true,
            max_run_request_depth: 5,
            sandbox: SandboxOptions::default(),
        }
    }
}

pub(crate) const DEFAULT_USER_AGENT: &str = concat!("ruquest/", env!("CARGO_PKG_VERSION"));
