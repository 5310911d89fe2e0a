//! 请求执行流水线
//!
//! 状态机阶段严格顺序推进：
//! PREPARE → PRE_REQUEST_SCRIPT → (SKIP → DONE) → INTERPOLATE →
//! HTTP_CALL → POST_RESPONSE_VARS → POST_RESPONSE_SCRIPT →
//! ASSERTIONS → TEST_SCRIPT → DONE。
//!
//! 致命错误（校验失败、pre-request 脚本抛出、传输失败）短路余下
//! 阶段；post-response / 测试脚本的错误只记录不中断，断言逐条隔离。

use chrono::Utc;
use serde_json::Value;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::assertion::{self, AssertValue};
use crate::collection::{
    Collection, ContextMerger, HeaderEntry, RequestBody, RequestContext, RequestDefinition,
    VarAssignment,
};
use crate::http::{HttpClient, Method, Response};
use crate::runner::interpolate::interpolate_request;
use crate::runner::onfail::run_on_fail;
use crate::runner::types::{
    DEFAULT_USER_AGENT, Phase, RunError, RunErrorKind, RunResult, RunnerOptions, TimelineEntry,
};
use crate::script::{
    ItemPathResolver, QuickJsProvider, RunScriptParams, RuntimeProvider, ScriptExecutionResult,
    tracing_console_sink,
};
use crate::variable::{VariableResolver, VariableSet};
use crate::{Result, RuquestError};

pub struct RequestPipeline {
    client: Arc<dyn HttpClient>,
    provider: Rc<dyn RuntimeProvider>,
    item_resolver: Option<Rc<dyn ItemPathResolver>>,
    options: RunnerOptions,
}

#[allow(clippy::future_not_send)]
impl RequestPipeline {
    pub fn new(
        client: Arc<dyn HttpClient>,
        provider: Rc<dyn RuntimeProvider>,
        options: RunnerOptions,
    ) -> Self {
        Self {
            client,
            provider,
            item_resolver: None,
            options,
        }
    }

    /// reqwest 客户端 + QuickJS 运行时的默认组装
    pub fn with_defaults(options: RunnerOptions) -> Result<Self> {
        let client = Arc::new(crate::http::ReqwestClient::new(options.http_timeout)?);
        let provider = Rc::new(QuickJsProvider::new(
            options.sandbox.clone(),
            options.max_run_request_depth,
        ));
        Ok(Self::new(client, provider, options))
    }

    /// 注入 bru.runRequest 背后的外部协作者
    pub fn with_item_resolver(mut self, resolver: Rc<dyn ItemPathResolver>) -> Self {
        self.item_resolver = Some(resolver);
        self
    }

    /// 执行单个请求
    pub async fn run(
        &self,
        collection: &Collection,
        tree_path: &[&str],
        request: &RequestDefinition,
        variables: VariableSet,
        signal: Option<CancellationToken>,
    ) -> RunResult {
        self.run_at_depth(collection, tree_path, request, variables, signal, 0)
            .await
    }

    /// 带递归深度的执行入口（bru.runRequest 的协作者使用）
    pub async fn run_at_depth(
        &self,
        collection: &Collection,
        tree_path: &[&str],
        request: &RequestDefinition,
        variables: VariableSet,
        signal: Option<CancellationToken>,
        depth: u32,
    ) -> RunResult {
        let run_started = Instant::now();
        let mut timeline: Vec<TimelineEntry> = Vec::new();
        let mut vars = variables;

        // ---- PREPARE -------------------------------------------------
        let mark = PhaseMark::begin(Phase::Prepare);
        let ctx = ContextMerger::merge(collection, tree_path, request, collection.script_flow);
        let mut merged = ctx.request.clone();

        if self.options.apply_default_user_agent
            && !merged
                .headers
                .iter()
                .any(|h| h.enabled && h.name.eq_ignore_ascii_case("user-agent"))
        {
            merged
                .headers
                .push(HeaderEntry::new("user-agent", DEFAULT_USER_AGENT));
        }

        if let Err(e) = Method::parse(&merged.method) {
            mark.finish(&mut timeline);
            return self.error_result(merged, vars, timeline, run_started, &e);
        }
        if merged.url.trim().is_empty() {
            mark.finish(&mut timeline);
            let e = RuquestError::ValidationError("Request URL is empty".to_string());
            return self.error_result(merged, vars, timeline, run_started, &e);
        }

        apply_pre_assignments(&mut vars, &ctx.vars_pre);
        mark.finish(&mut timeline);

        // ---- PRE_REQUEST_SCRIPT --------------------------------------
        let mut skip_request = false;
        let mut stop_execution = false;
        let mut next_request_name = None;

        if !ctx.script_pre.is_empty() {
            let mark = PhaseMark::begin(Phase::PreRequestScript);
            let outcome = self
                .run_phase_script(&ctx, &merged, &ctx.script_pre, None, &vars, depth, false)
                .await;
            mark.finish(&mut timeline);

            match outcome {
                Err(e) => return self.error_result(merged, vars, timeline, run_started, &e),
                Ok(result) => {
                    apply_script_result(&mut vars, &result);
                    if let Some(updated) = &result.updated_request {
                        apply_updated_request(&mut merged, updated);
                    }
                    skip_request = result.skip_request;
                    stop_execution = result.stop_execution;
                    next_request_name = result.next_request_name.clone();

                    // pre-request 脚本抛出是致命的：不发起 HTTP 调用
                    if let Some(message) = result.error {
                        let e = RuquestError::ScriptError(message);
                        return self.error_result(merged, vars, timeline, run_started, &e);
                    }
                }
            }
        }

        if skip_request {
            debug!("request skipped via pre-request script");
            vars.strip_locals();
            return RunResult {
                request: merged,
                response: Some(Response::skipped()),
                error: None,
                variables: vars,
                test_results: Vec::new(),
                assertion_results: Vec::new(),
                duration: run_started.elapsed(),
                skip_request: true,
                stop_execution,
                next_request_name,
                cancelled: false,
                timeline,
            };
        }

        // ---- INTERPOLATE ---------------------------------------------
        let mark = PhaseMark::begin(Phase::Interpolate);
        let interpolated = interpolate_request(&merged, &ctx.collection_path, &vars);
        mark.finish(&mut timeline);

        let interpolated = match interpolated {
            Ok(req) => req,
            Err(e) => return self.error_result(merged, vars, timeline, run_started, &e),
        };

        // ---- HTTP_CALL ------------------------------------------------
        let mark = PhaseMark::begin(Phase::HttpCall);
        let call = self.client.execute(interpolated, signal).await;
        mark.finish(&mut timeline);

        let response = match call {
            Ok(response) => response,
            Err(RuquestError::Cancelled) => {
                vars.strip_locals();
                return RunResult {
                    request: merged,
                    response: None,
                    error: Some(RunError::new(RunErrorKind::Cancel, "Request cancelled")),
                    variables: vars,
                    test_results: Vec::new(),
                    assertion_results: Vec::new(),
                    duration: run_started.elapsed(),
                    skip_request: false,
                    stop_execution,
                    next_request_name,
                    cancelled: true,
                    timeline,
                };
            }
            Err(e) => {
                // 硬失败：有 onFail 处理器则执行，取组合后的消息
                let exec_ctx = context_with(&ctx, &merged);
                let message = run_on_fail(self.provider.as_ref(), &exec_ctx, &e, &vars).await;
                vars.strip_locals();
                return RunResult {
                    request: merged,
                    response: None,
                    error: Some(RunError::new(RunErrorKind::Transport, message)),
                    variables: vars,
                    test_results: Vec::new(),
                    assertion_results: Vec::new(),
                    duration: run_started.elapsed(),
                    skip_request: false,
                    stop_execution,
                    next_request_name,
                    cancelled: false,
                    timeline,
                };
            }
        };

        // ---- POST_RESPONSE_VARS --------------------------------------
        if !ctx.vars_post.is_empty() {
            let mark = PhaseMark::begin(Phase::PostResponseVars);
            apply_post_assignments(&mut vars, &ctx.vars_post, &response);
            mark.finish(&mut timeline);
        }

        // ---- POST_RESPONSE_SCRIPT（错误不致命） -----------------------
        if !ctx.script_post.is_empty() {
            let mark = PhaseMark::begin(Phase::PostResponseScript);
            let outcome = self
                .run_phase_script(
                    &ctx,
                    &merged,
                    &ctx.script_post,
                    Some(&response),
                    &vars,
                    depth,
                    false,
                )
                .await;
            mark.finish(&mut timeline);

            match outcome {
                Ok(result) => {
                    apply_script_result(&mut vars, &result);
                    stop_execution |= result.stop_execution;
                    if result.next_request_name.is_some() {
                        next_request_name = result.next_request_name.clone();
                    }
                    if let Some(message) = &result.error {
                        warn!("post-response script failed: {}", message);
                    }
                }
                Err(e) => warn!("post-response script could not run: {}", e),
            }
        }

        // ---- ASSERTIONS（逐条隔离） -----------------------------------
        let mark = PhaseMark::begin(Phase::Assertions);
        let assertion_results =
            self.provider
                .run_assertions(&merged.assertions, &response, &vars);
        mark.finish(&mut timeline);

        // ---- TEST_SCRIPT（错误不致命） --------------------------------
        let mut test_results = Vec::new();
        if !ctx.tests.is_empty() {
            let mark = PhaseMark::begin(Phase::TestScript);
            let outcome = self
                .run_phase_script(&ctx, &merged, &ctx.tests, Some(&response), &vars, depth, true)
                .await;
            mark.finish(&mut timeline);

            match outcome {
                Ok(result) => {
                    apply_script_result(&mut vars, &result);
                    stop_execution |= result.stop_execution;
                    if result.next_request_name.is_some() {
                        next_request_name = result.next_request_name.clone();
                    }
                    test_results = result.results;
                    if let Some(message) = &result.error {
                        warn!("test script failed: {}", message);
                    }
                }
                Err(e) => warn!("test script could not run: {}", e),
            }
        }

        // ---- DONE ----------------------------------------------------
        vars.strip_locals();
        RunResult {
            request: merged,
            response: Some(response),
            error: None,
            variables: vars,
            test_results,
            assertion_results,
            duration: run_started.elapsed(),
            skip_request: false,
            stop_execution,
            next_request_name,
            cancelled: false,
            timeline,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_phase_script(
        &self,
        ctx: &RequestContext,
        def: &RequestDefinition,
        script: &str,
        response: Option<&Response>,
        vars: &VariableSet,
        depth: u32,
        tests: bool,
    ) -> Result<ScriptExecutionResult> {
        let mut params = RunScriptParams::new(script, vars);
        params.request = Some(request_to_script_value(def));
        params.response = response.map(|r| r.to_script_value());
        params.collection_name = &ctx.collection_name;
        params.collection_path = Some(ctx.collection_path.clone());
        params.environment_name = ctx.environment_name.clone();
        params.on_console = Some(tracing_console_sink());
        params.item_resolver = self.item_resolver.clone();
        params.depth = depth;

        if tests {
            self.provider.run_tests(params).await
        } else {
            self.provider.run_script(params).await
        }
    }

    fn error_result(
        &self,
        request: RequestDefinition,
        mut vars: VariableSet,
        timeline: Vec<TimelineEntry>,
        run_started: Instant,
        error: &RuquestError,
    ) -> RunResult {
        vars.strip_locals();
        RunResult {
            request,
            response: None,
            error: Some(RunError::from_error(error)),
            variables: vars,
            test_results: Vec::new(),
            assertion_results: Vec::new(),
            duration: run_started.elapsed(),
            skip_request: false,
            stop_execution: false,
            next_request_name: None,
            cancelled: error.is_cancel(),
            timeline,
        }
    }
}

/// 阶段计时
struct PhaseMark {
    phase: Phase,
    started_at: chrono::DateTime<Utc>,
    instant: Instant,
}

impl PhaseMark {
    fn begin(phase: Phase) -> Self {
        Self {
            phase,
            started_at: Utc::now(),
            instant: Instant::now(),
        }
    }

    fn finish(self, timeline: &mut Vec<TimelineEntry>) {
        timeline.push(TimelineEntry {
            phase: self.phase,
            started_at: self.started_at,
            duration: self.instant.elapsed(),
        });
    }
}

/// vars.req：插值后写入 runtime 作用域，值尝试 JSON 推断
fn apply_pre_assignments(vars: &mut VariableSet, assignments: &[VarAssignment]) {
    for assignment in assignments {
        let rendered = VariableResolver::interpolate(&assignment.value, vars);
        let value = serde_json::from_str::<Value>(&rendered).unwrap_or(Value::String(rendered));
        vars.runtime.insert(assignment.name.clone(), value);
    }
}

/// vars.res：按 res.* 表达式从响应提取；单条失败只记录
fn apply_post_assignments(
    vars: &mut VariableSet,
    assignments: &[VarAssignment],
    response: &Response,
) {
    for assignment in assignments {
        let extracted = assertion::parse_value_path(&assignment.value)
            .and_then(|path| assertion::extract_value(response, &path));
        match extracted {
            Ok(value) => {
                vars.runtime
                    .insert(assignment.name.clone(), assert_value_to_json(value));
            }
            Err(e) => warn!(
                "post-response var '{}' could not be assigned: {}",
                assignment.name, e
            ),
        }
    }
}

fn assert_value_to_json(value: AssertValue) -> Value {
    match value {
        AssertValue::Number(n) => serde_json::json!(n),
        AssertValue::String(s) => Value::String(s),
        AssertValue::Bool(b) => Value::Bool(b),
        AssertValue::Null => Value::Null,
    }
}

fn apply_script_result(vars: &mut VariableSet, result: &ScriptExecutionResult) {
    vars.runtime = result.runtime_variables.clone();
    vars.environment = result.env_variables.clone();
    vars.global_environment = result.global_environment_variables.clone();
}

/// 注入脚本沙箱的请求表示
fn request_to_script_value(def: &RequestDefinition) -> Value {
    let headers: serde_json::Map<String, Value> = def
        .headers
        .iter()
        .filter(|h| h.enabled)
        .map(|h| (h.name.clone(), Value::String(h.value.clone())))
        .collect();

    let body = match &def.body {
        RequestBody::None => Value::Null,
        RequestBody::Json { content } => serde_json::from_str(content)
            .unwrap_or_else(|_| Value::String(content.clone())),
        RequestBody::Text { content }
        | RequestBody::Xml { content }
        | RequestBody::Sparql { content } => Value::String(content.clone()),
        RequestBody::Graphql { query, variables } => serde_json::json!({
            "query": query,
            "variables": variables,
        }),
        RequestBody::FormUrlEncoded { fields } | RequestBody::MultipartForm { fields } => {
            let map: serde_json::Map<String, Value> = fields
                .iter()
                .filter(|f| f.enabled)
                .map(|f| (f.name.clone(), Value::String(f.value.clone())))
                .collect();
            Value::Object(map)
        }
        RequestBody::File { path } => Value::String(path.display().to_string()),
    };

    serde_json::json!({
        "url": def.url,
        "method": def.method,
        "headers": headers,
        "body": body,
    })
}

/// 脚本对请求 shim 的修改回写到请求定义
fn apply_updated_request(def: &mut RequestDefinition, updated: &Value) {
    if let Some(url) = updated["url"].as_str() {
        def.url = url.to_string();
    }
    if let Some(method) = updated["method"].as_str() {
        def.method = method.to_string();
    }
    if let Some(headers) = updated["headers"].as_object() {
        def.headers = headers
            .iter()
            .map(|(name, value)| {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                HeaderEntry::new(name.clone(), value)
            })
            .collect();
    }
    match &updated["body"] {
        Value::Null => {}
        Value::String(s) => {
            def.body = match &def.body {
                RequestBody::Json { .. } => RequestBody::Json { content: s.clone() },
                RequestBody::Xml { .. } => RequestBody::Xml { content: s.clone() },
                RequestBody::Sparql { .. } => RequestBody::Sparql { content: s.clone() },
                _ => RequestBody::Text { content: s.clone() },
            };
        }
        other => {
            def.body = RequestBody::Json {
                content: other.to_string(),
            };
        }
    }
}

fn context_with(ctx: &RequestContext, merged: &RequestDefinition) -> RequestContext {
    let mut exec_ctx = ctx.clone();
    exec_ctx.request = merged.clone();
    exec_ctx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::AssertionEntry;
    use async_trait::async_trait;
    use std::cell::RefCell;

    /// 不发真实请求的测试客户端
    struct StubClient {
        response: fn() -> Result<Response>,
        calls: std::sync::Mutex<u32>,
    }

    #[async_trait]
    impl HttpClient for StubClient {
        async fn execute(
            &self,
            _request: crate::http::InterpolatedRequest,
            _signal: Option<CancellationToken>,
        ) -> Result<Response> {
            *self.calls.lock().unwrap() += 1;
            (self.response)()
        }
    }

    fn ok_response() -> Result<Response> {
        Response::new(
            200,
            None,
            reqwest::header::HeaderMap::new(),
            r#"{"ok": true}"#.to_string(),
            std::time::Duration::from_millis(5),
        )
    }

    fn pipeline_with(client: Arc<StubClient>) -> RequestPipeline {
        RequestPipeline::new(
            client,
            Rc::new(QuickJsProvider::default()),
            RunnerOptions::default(),
        )
    }

    fn collection() -> Collection {
        Collection::new("test", std::env::temp_dir())
    }

    fn get_request(url: &str) -> RequestDefinition {
        RequestDefinition {
            name: "r".to_string(),
            method: "GET".to_string(),
            url: url.to_string(),
            ..RequestDefinition::default()
        }
    }

    #[tokio::test]
    async fn test_validation_error_is_fatal_preflight() {
        let client = Arc::new(StubClient {
            response: ok_response,
            calls: std::sync::Mutex::new(0),
        });
        let pipeline = pipeline_with(client.clone());

        let mut request = get_request("http://x/");
        request.method = "NOPE".to_string();

        let result = pipeline
            .run(&collection(), &[], &request, VariableSet::new(), None)
            .await;

        assert_eq!(result.error.as_ref().unwrap().kind, RunErrorKind::Validation);
        assert!(result.response.is_none());
        assert_eq!(*client.calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_skip_via_pre_request_script() {
        let client = Arc::new(StubClient {
            response: ok_response,
            calls: std::sync::Mutex::new(0),
        });
        let pipeline = pipeline_with(client.clone());

        let mut request = get_request("http://x/");
        request.script_pre = Some("bru.runner.skipRequest();".to_string());

        let result = pipeline
            .run(&collection(), &[], &request, VariableSet::new(), None)
            .await;

        assert!(result.skip_request);
        assert!(result.error.is_none());
        let response = result.response.unwrap();
        assert_eq!(response.status.code(), 200);
        assert_eq!(
            response.status_text,
            "Request skipped via pre-request script"
        );
        // 未执行 HTTP 调用，也未进入插值阶段
        assert_eq!(*client.calls.lock().unwrap(), 0);
        assert!(!result.timeline.iter().any(|t| t.phase == Phase::Interpolate));
    }

    #[tokio::test]
    async fn test_pre_request_script_error_is_fatal() {
        let client = Arc::new(StubClient {
            response: ok_response,
            calls: std::sync::Mutex::new(0),
        });
        let pipeline = pipeline_with(client.clone());

        let mut request = get_request("http://x/");
        request.script_pre = Some("bru.setVar('partial', 1); throw new Error('pre boom');".to_string());

        let result = pipeline
            .run(&collection(), &[], &request, VariableSet::new(), None)
            .await;

        let error = result.error.as_ref().unwrap();
        assert_eq!(error.kind, RunErrorKind::Script);
        assert!(error.message.contains("pre boom"));
        assert_eq!(*client.calls.lock().unwrap(), 0);
        // 部分变量写入保留
        assert_eq!(
            result.variables.runtime.get("partial"),
            Some(&serde_json::json!(1))
        );
    }

    #[tokio::test]
    async fn test_post_response_script_error_not_fatal() {
        let client = Arc::new(StubClient {
            response: ok_response,
            calls: std::sync::Mutex::new(0),
        });
        let pipeline = pipeline_with(client);

        let mut request = get_request("http://x/");
        request.script_post = Some("throw new Error('post boom');".to_string());
        request.tests = Some("test('still runs', () => expect(res.getStatus()).toBe(200));".to_string());
        request.assertions = vec![AssertionEntry::new("res.status", "eq 200")];

        let result = pipeline
            .run(&collection(), &[], &request, VariableSet::new(), None)
            .await;

        // post 脚本失败不阻断断言与测试
        assert!(result.error.is_none());
        assert_eq!(result.assertion_results.len(), 1);
        assert!(result.assertion_results[0].passed);
        assert_eq!(result.test_results.len(), 1);
        assert_eq!(result.test_results[0].status, crate::script::TestStatus::Pass);
    }

    #[tokio::test]
    async fn test_transport_error_yields_error_result() {
        let client = Arc::new(StubClient {
            response: || Err(RuquestError::TransportError("connection refused".into())),
            calls: std::sync::Mutex::new(0),
        });
        let pipeline = pipeline_with(client);

        let request = get_request("http://unreachable.invalid/");
        let result = pipeline
            .run(&collection(), &[], &request, VariableSet::new(), None)
            .await;

        let error = result.error.as_ref().unwrap();
        assert_eq!(error.kind, RunErrorKind::Transport);
        assert!(result.response.is_none());
        assert!(!result.cancelled);
    }

    #[tokio::test]
    async fn test_http_status_error_is_normal_response() {
        let client = Arc::new(StubClient {
            response: || {
                Response::new(
                    500,
                    None,
                    reqwest::header::HeaderMap::new(),
                    "oops".to_string(),
                    std::time::Duration::from_millis(2),
                )
            },
            calls: std::sync::Mutex::new(0),
        });
        let pipeline = pipeline_with(client);

        let mut request = get_request("http://x/");
        request.assertions = vec![AssertionEntry::new("res.status", "eq 500")];

        let result = pipeline
            .run(&collection(), &[], &request, VariableSet::new(), None)
            .await;

        // 5xx 是正常响应，流水线继续
        assert!(result.error.is_none());
        assert_eq!(result.response.as_ref().unwrap().status.code(), 500);
        assert!(result.assertion_results[0].passed);
    }

    #[tokio::test]
    async fn test_on_fail_handler_combines_messages() {
        let client = Arc::new(StubClient {
            response: || Err(RuquestError::TransportError("ECONNREFUSED".into())),
            calls: std::sync::Mutex::new(0),
        });
        let pipeline = pipeline_with(client);

        let mut request = get_request("http://x/");
        request.on_fail = Some("throw new Error('handler blew up');".to_string());

        let result = pipeline
            .run(&collection(), &[], &request, VariableSet::new(), None)
            .await;

        let message = &result.error.as_ref().unwrap().message;
        assert!(message.contains("1. Request failed:"));
        assert!(message.contains("2. Error executing onFail handler:"));
        assert!(message.contains("ECONNREFUSED"));
        assert!(message.contains("handler blew up"));
    }

    #[tokio::test]
    async fn test_pre_vars_and_post_vars() {
        let client = Arc::new(StubClient {
            response: || {
                Response::new(
                    200,
                    None,
                    reqwest::header::HeaderMap::new(),
                    r#"{"token": "t-123"}"#.to_string(),
                    std::time::Duration::from_millis(2),
                )
            },
            calls: std::sync::Mutex::new(0),
        });
        let pipeline = pipeline_with(client);

        let mut request = get_request("http://x/");
        request.vars_pre = vec![VarAssignment::new("attempt", "1")];
        request.vars_post = vec![VarAssignment::new("token", "res.body.token")];

        let result = pipeline
            .run(&collection(), &[], &request, VariableSet::new(), None)
            .await;

        assert_eq!(
            result.variables.runtime.get("attempt"),
            Some(&serde_json::json!(1))
        );
        assert_eq!(
            result.variables.runtime.get("token"),
            Some(&serde_json::json!("t-123"))
        );
    }

    #[tokio::test]
    async fn test_timeline_phases_in_order() {
        let client = Arc::new(StubClient {
            response: ok_response,
            calls: std::sync::Mutex::new(0),
        });
        let pipeline = pipeline_with(client);

        let mut request = get_request("http://x/");
        request.script_pre = Some("bru.setVar('a', 1);".to_string());
        request.tests = Some("test('t', () => {});".to_string());

        let result = pipeline
            .run(&collection(), &[], &request, VariableSet::new(), None)
            .await;

        let phases: Vec<Phase> = result.timeline.iter().map(|t| t.phase).collect();
        assert_eq!(
            phases,
            vec![
                Phase::Prepare,
                Phase::PreRequestScript,
                Phase::Interpolate,
                Phase::HttpCall,
                Phase::Assertions,
                Phase::TestScript,
            ]
        );
    }

    #[tokio::test]
    async fn test_request_shim_mutation_affects_outgoing_request() {
        let client = Arc::new(StubClient {
            response: ok_response,
            calls: std::sync::Mutex::new(0),
        });
        let pipeline = pipeline_with(client);

        let mut request = get_request("http://x/");
        request.script_pre = Some("req.setHeader('x-injected', 'yes');".to_string());

        let result = pipeline
            .run(&collection(), &[], &request, VariableSet::new(), None)
            .await;

        assert!(result.error.is_none());
        assert!(
            result
                .request
                .headers
                .iter()
                .any(|h| h.name == "x-injected" && h.value == "yes")
        );
    }

    #[tokio::test]
    async fn test_default_user_agent_only_if_absent() {
        let client = Arc::new(StubClient {
            response: ok_response,
            calls: std::sync::Mutex::new(0),
        });
        let pipeline = pipeline_with(client);

        let mut request = get_request("http://x/");
        request.headers = vec![HeaderEntry::new("User-Agent", "custom/1.0")];

        let result = pipeline
            .run(&collection(), &[], &request, VariableSet::new(), None)
            .await;

        let agents: Vec<&HeaderEntry> = result
            .request
            .headers
            .iter()
            .filter(|h| h.name.eq_ignore_ascii_case("user-agent"))
            .collect();
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].value, "custom/1.0");
    }

    /// 记录深度的递归协作者
    struct DepthProbe {
        seen: RefCell<Vec<u32>>,
    }

    #[async_trait(?Send)]
    impl ItemPathResolver for DepthProbe {
        async fn run(&self, _path: &str, depth: u32) -> Result<Value> {
            self.seen.borrow_mut().push(depth);
            Ok(serde_json::json!({"done": true}))
        }
    }

    #[tokio::test]
    async fn test_item_resolver_receives_incremented_depth() {
        let client = Arc::new(StubClient {
            response: ok_response,
            calls: std::sync::Mutex::new(0),
        });
        let probe = Rc::new(DepthProbe {
            seen: RefCell::new(Vec::new()),
        });
        let pipeline = pipeline_with(client).with_item_resolver(probe.clone());

        let mut request = get_request("http://x/");
        request.script_pre = Some("await bru.runRequest('other');".to_string());

        let result = pipeline
            .run(&collection(), &[], &request, VariableSet::new(), None)
            .await;

        assert!(result.error.is_none());
        assert_eq!(*probe.seen.borrow(), vec![1]);
    }
}
