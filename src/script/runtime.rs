//! 脚本运行时门面
//!
//! 给定脚本文本、请求/响应快照与变量作用域，构造一次性沙箱、
//! 注入 bru API，执行脚本并提取更新后的变量、控制标志与测试结果。

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;
use tracing::warn;

use crate::assertion::{self, AssertionOutcome};
use crate::collection::AssertionEntry;
use crate::http::Response;
use crate::script::sandbox::{Sandbox, SandboxOptions};
use crate::script::shims::{CapabilitySet, RunRequestFn};
use crate::variable::{VariableSet, types::is_local_name};
use crate::{Result, RuquestError};

/// guest console 事件的宿主回调
pub type ConsoleSink = Rc<dyn Fn(&str, &[Value])>;

/// bru.runRequest 背后的外部协作者
///
/// depth 为递归深度，由调用方递增并在实现里继续传递；
/// 取消信号的传播由实现方捕获自己的 token 完成。
#[async_trait(?Send)]
pub trait ItemPathResolver {
    async fn run(&self, relative_path: &str, depth: u32) -> Result<Value>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestStatus {
    Pass,
    Fail,
}

/// 单条 test()/断言脚本的结果
#[derive(Debug, Clone)]
pub struct TestOutcome {
    pub id: String,
    pub description: String,
    pub status: TestStatus,
    pub error: Option<String>,
}

/// 一次脚本调用的产出
///
/// 变量写入以显式返回值形式出现在这里，宿主据此更新 VariableSet。
#[derive(Debug, Clone, Default)]
pub struct ScriptExecutionResult {
    pub updated_request: Option<Value>,
    pub runtime_variables: HashMap<String, Value>,
    pub env_variables: HashMap<String, Value>,
    pub global_environment_variables: HashMap<String, Value>,
    pub results: Vec<TestOutcome>,
    pub next_request_name: Option<String>,
    pub skip_request: bool,
    pub stop_execution: bool,
    /// guest 抛出（含超时）的错误消息；部分变量修改仍被保留
    pub error: Option<String>,
}

/// 一次脚本调用的输入
pub struct RunScriptParams<'a> {
    pub script: &'a str,
    pub request: Option<Value>,
    pub response: Option<Value>,
    pub variables: &'a VariableSet,
    pub collection_name: &'a str,
    pub collection_path: Option<PathBuf>,
    pub environment_name: Option<String>,
    pub on_console: Option<ConsoleSink>,
    pub item_resolver: Option<Rc<dyn ItemPathResolver>>,
    /// 当前 bru.runRequest 递归深度
    pub depth: u32,
}

impl<'a> RunScriptParams<'a> {
    pub fn new(script: &'a str, variables: &'a VariableSet) -> Self {
        Self {
            script,
            request: None,
            response: None,
            variables,
            collection_name: "",
            collection_path: None,
            environment_name: None,
            on_console: None,
            item_resolver: None,
            depth: 0,
        }
    }
}

pub struct ScriptRuntime {
    sandbox_options: SandboxOptions,
    max_run_request_depth: u32,
}

#[allow(clippy::future_not_send)]
impl ScriptRuntime {
    pub fn new(sandbox_options: SandboxOptions, max_run_request_depth: u32) -> Self {
        Self {
            sandbox_options,
            max_run_request_depth,
        }
    }

    /// 执行一段脚本
    ///
    /// 空白脚本走快速路径：原样返回输入变量、空 results。
    /// guest 抛出不作为 Err 返回——部分状态仍被提取，错误消息
    /// 记录在 `ScriptExecutionResult::error`；只有沙箱自身的
    /// 构造/读取失败才是 Err。
    pub async fn run_script(&self, params: RunScriptParams<'_>) -> Result<ScriptExecutionResult> {
        if params.script.trim().is_empty() {
            return Ok(Self::passthrough(params.variables));
        }

        let sandbox = Sandbox::new(self.sandbox_options.clone()).await?;
        let caps = self.capability_set(&params);
        sandbox.install(&caps).await?;
        sandbox.eval_prelude(BRU_PRELUDE).await?;

        let script_error = match sandbox.run(params.script).await {
            Ok(_) => None,
            Err(RuquestError::ScriptError(message)) => Some(message),
            Err(RuquestError::ScriptTimeout(timeout)) => {
                Some(format!("Script timed out after {:?}", timeout))
            }
            Err(other) => return Err(other),
        };

        // 无论是否抛出都提取状态：run-until-exception 语义
        let state = sandbox.global_json("__ruquest_state").await?;
        let updated_request = if params.request.is_some() {
            match sandbox.global_json("__ruquest_req").await {
                Ok(Value::Null) => None,
                Ok(value) => Some(value),
                Err(_) => None,
            }
        } else {
            None
        };

        let events = sandbox.drain_console();
        if let Some(sink) = &params.on_console {
            for event in &events {
                sink(&event.level, &event.args);
            }
        }

        sandbox.dispose().await;

        let mut result = Self::extract(state);
        result.updated_request = updated_request;
        result.error = script_error;
        Ok(result)
    }

    fn passthrough(variables: &VariableSet) -> ScriptExecutionResult {
        ScriptExecutionResult {
            runtime_variables: variables.runtime.clone(),
            env_variables: variables.environment.clone(),
            global_environment_variables: variables.global_environment.clone(),
            ..ScriptExecutionResult::default()
        }
    }

    fn capability_set(&self, params: &RunScriptParams<'_>) -> CapabilitySet {
        let mut caps = CapabilitySet::standard();
        caps.require_root = params.collection_path.clone();
        caps.interpolate_base = Some(params.variables.clone());
        caps.run_request = params
            .item_resolver
            .clone()
            .map(|resolver| self.run_request_hook(resolver, params.depth));

        caps.globals.push((
            "__ruquest_state".to_string(),
            build_state(params),
        ));
        if let Some(request) = &params.request {
            caps.globals
                .push(("__ruquest_req".to_string(), request.clone()));
        }
        if let Some(response) = &params.response {
            caps.globals
                .push(("__ruquest_res".to_string(), response.clone()));
        }
        caps
    }

    /// bru.runRequest 桥：带显式递归深度护栏
    fn run_request_hook(&self, resolver: Rc<dyn ItemPathResolver>, depth: u32) -> RunRequestFn {
        let max_depth = self.max_run_request_depth;
        Rc::new(move |path: String| {
            let resolver = resolver.clone();
            Box::pin(async move {
                if depth >= max_depth {
                    return json!({
                        "error": format!(
                            "runRequest recursion depth limit ({}) exceeded at '{}'",
                            max_depth, path
                        )
                    })
                    .to_string();
                }
                match resolver.run(&path, depth + 1).await {
                    Ok(value) => json!({ "result": value }).to_string(),
                    Err(e) => json!({ "error": e.to_string() }).to_string(),
                }
            })
        })
    }

    /// 从回读的 __ruquest_state 提取执行结果
    fn extract(state: Value) -> ScriptExecutionResult {
        let mut result = ScriptExecutionResult::default();

        let scope_map = |value: &Value| -> HashMap<String, Value> {
            value
                .as_object()
                .map(|map| map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default()
        };

        let mut runtime = scope_map(&state["runtime"]);
        // `@` 局部变量不落盘
        runtime.retain(|name, _| !is_local_name(name));
        result.runtime_variables = runtime;
        result.env_variables = scope_map(&state["environment"]);
        result.global_environment_variables = scope_map(&state["globalEnvironment"]);

        let control = &state["control"];
        result.skip_request = control["skip"].as_bool().unwrap_or(false);
        result.stop_execution = control["stop"].as_bool().unwrap_or(false);
        result.next_request_name = control["nextRequest"].as_str().map(|s| s.to_string());

        if let Some(entries) = state["results"].as_array() {
            for entry in entries {
                let status = match entry["status"].as_str() {
                    Some("pass") => TestStatus::Pass,
                    _ => TestStatus::Fail,
                };
                result.results.push(TestOutcome {
                    id: uuid::Uuid::new_v4().to_string(),
                    description: entry["description"].as_str().unwrap_or("").to_string(),
                    status,
                    error: entry["error"].as_str().map(|s| s.to_string()),
                });
            }
        }

        result
    }
}

fn build_state(params: &RunScriptParams<'_>) -> Value {
    let vars = params.variables;
    json!({
        "collectionName": params.collection_name,
        "collectionPath": params
            .collection_path
            .as_ref()
            .map(|p| p.display().to_string()),
        "environmentName": params.environment_name,
        "processEnv": vars.process_env,
        "globalEnvironment": vars.global_environment,
        "collection": vars.collection,
        "environment": vars.environment,
        "folder": vars.folder,
        "request": vars.request,
        "oauth2Credential": vars.oauth2_credential,
        "runtime": vars.runtime,
        "control": { "skip": false, "stop": false, "nextRequest": null },
        "results": [],
    })
}

/// bru API 定义，作用于已注入的 __ruquest_state / __ruquest_req / __ruquest_res
const BRU_PRELUDE: &str = r#"
(() => {
  const state = globalThis.__ruquest_state;
  const pick = (scope, key) => {
    const v = scope[key];
    return v === undefined ? null : v;
  };

  const bru = {
    cwd: () => state.collectionPath ?? null,
    getEnvName: () => state.environmentName ?? null,
    getProcessEnv: (key) => pick(state.processEnv ?? {}, key),
    getGlobalEnvVar: (key) => pick(state.globalEnvironment, key),
    setGlobalEnvVar: (key, value) => { state.globalEnvironment[key] = value; },
    getCollectionVar: (key) => pick(state.collection, key),
    getFolderVar: (key) => pick(state.folder, key),
    getRequestVar: (key) => pick(state.request, key),
    getOauth2CredentialVar: (key) => pick(state.oauth2Credential, key),
    getEnvVar: (key) => pick(state.environment, key),
    setEnvVar: (key, value) => { state.environment[key] = value; },
    getVar: (key) => pick(state.runtime, key),
    setVar: (key, value) => { state.runtime[key] = value; },
    deleteVar: (key) => { delete state.runtime[key]; },
    hasVar: (key) => Object.prototype.hasOwnProperty.call(state.runtime, key),
    interpolate: (text) =>
      globalThis.__ruquest_interpolate(String(text), JSON.stringify(state.runtime)),
    setNextRequest: (name) => { state.control.nextRequest = String(name); },
    runner: {
      skipRequest: () => { state.control.skip = true; },
      stopExecution: () => { state.control.stop = true; },
    },
    sleep: (ms) => globalThis.sleep(ms),
  };

  if (globalThis.__ruquest_run_request) {
    bru.runRequest = async (path) => {
      const raw = await globalThis.__ruquest_run_request(String(path));
      const out = JSON.parse(raw);
      if (out.error) throw new Error(out.error);
      return out.result;
    };
  }
  globalThis.bru = bru;

  const reqData = globalThis.__ruquest_req;
  if (reqData) {
    const findHeader = (name) => {
      const lower = String(name).toLowerCase();
      return Object.keys(reqData.headers ?? {}).find((k) => k.toLowerCase() === lower);
    };
    globalThis.req = {
      getUrl: () => reqData.url,
      setUrl: (url) => { reqData.url = String(url); },
      getMethod: () => reqData.method,
      setMethod: (method) => { reqData.method = String(method); },
      getHeaders: () => reqData.headers ?? {},
      getHeader: (name) => {
        const key = findHeader(name);
        return key === undefined ? null : reqData.headers[key];
      },
      setHeader: (name, value) => {
        reqData.headers = reqData.headers ?? {};
        const key = findHeader(name) ?? String(name);
        reqData.headers[key] = String(value);
      },
      getBody: () => reqData.body ?? null,
      setBody: (body) => { reqData.body = body; },
    };
  }

  const resData = globalThis.__ruquest_res;
  if (resData) {
    globalThis.res = {
      status: resData.status,
      statusText: resData.statusText,
      headers: resData.headers ?? {},
      body: resData.body,
      responseTime: resData.responseTime,
      getStatus: () => resData.status,
      getStatusText: () => resData.statusText,
      getHeaders: () => resData.headers ?? {},
      getHeader: (name) => {
        const lower = String(name).toLowerCase();
        const key = Object.keys(resData.headers ?? {}).find((k) => k.toLowerCase() === lower);
        return key === undefined ? null : resData.headers[key];
      },
      getBody: () => resData.body,
      getResponseTime: () => resData.responseTime,
    };
  }

  // test() 注册的 promise 由外层包装统一 await
  globalThis.__ruquest_pending_tests = [];
  globalThis.test = (description, fn) => {
    const run = (async () => {
      try {
        await fn();
        state.results.push({ description: String(description), status: "pass" });
      } catch (err) {
        state.results.push({
          description: String(description),
          status: "fail",
          error: String((err && err.message) || err),
        });
      }
    })();
    globalThis.__ruquest_pending_tests.push(run);
    return run;
  };

  class Expectation {
    constructor(actual) { this.actual = actual; }
    toBe(expected) {
      if (this.actual !== expected)
        throw new Error(`expected ${JSON.stringify(this.actual)} to be ${JSON.stringify(expected)}`);
    }
    toEqual(expected) {
      if (JSON.stringify(this.actual) !== JSON.stringify(expected))
        throw new Error(`expected ${JSON.stringify(this.actual)} to equal ${JSON.stringify(expected)}`);
    }
    toBeDefined() {
      if (this.actual === undefined || this.actual === null)
        throw new Error("expected value to be defined");
    }
    toContain(item) {
      const ok = typeof this.actual === "string"
        ? this.actual.includes(item)
        : Array.isArray(this.actual) && this.actual.includes(item);
      if (!ok)
        throw new Error(`expected ${JSON.stringify(this.actual)} to contain ${JSON.stringify(item)}`);
    }
    toBeGreaterThan(n) {
      if (!(this.actual > n))
        throw new Error(`expected ${JSON.stringify(this.actual)} to be greater than ${n}`);
    }
  }
  globalThis.expect = (actual) => new Expectation(actual);
})();
"#;

/// 运行时工厂：脚本引擎可整体替换
#[async_trait(?Send)]
pub trait RuntimeProvider {
    async fn run_script(&self, params: RunScriptParams<'_>) -> Result<ScriptExecutionResult>;

    /// 测试脚本与普通脚本共用引擎，结果经由 test() 收集
    async fn run_tests(&self, params: RunScriptParams<'_>) -> Result<ScriptExecutionResult>;

    fn run_assertions(
        &self,
        entries: &[AssertionEntry],
        response: &Response,
        vars: &VariableSet,
    ) -> Vec<AssertionOutcome>;
}

/// 默认实现：QuickJS 沙箱 + 内置断言求值器
pub struct QuickJsProvider {
    sandbox_options: SandboxOptions,
    max_run_request_depth: u32,
}

impl QuickJsProvider {
    pub fn new(sandbox_options: SandboxOptions, max_run_request_depth: u32) -> Self {
        Self {
            sandbox_options,
            max_run_request_depth,
        }
    }
}

impl Default for QuickJsProvider {
    fn default() -> Self {
        Self::new(SandboxOptions::default(), 5)
    }
}

#[async_trait(?Send)]
impl RuntimeProvider for QuickJsProvider {
    async fn run_script(&self, params: RunScriptParams<'_>) -> Result<ScriptExecutionResult> {
        ScriptRuntime::new(self.sandbox_options.clone(), self.max_run_request_depth)
            .run_script(params)
            .await
    }

    async fn run_tests(&self, params: RunScriptParams<'_>) -> Result<ScriptExecutionResult> {
        self.run_script(params).await
    }

    fn run_assertions(
        &self,
        entries: &[AssertionEntry],
        response: &Response,
        vars: &VariableSet,
    ) -> Vec<AssertionOutcome> {
        assertion::evaluate_assertions(entries, response, vars)
    }
}

/// 把 console 事件转给 tracing 的默认 sink
pub fn tracing_console_sink() -> ConsoleSink {
    Rc::new(|level: &str, args: &[Value]| {
        let rendered = args
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(" ");
        match level {
            "error" => warn!(target: "ruquest::script", "console.error: {}", rendered),
            "warn" => warn!(target: "ruquest::script", "console.warn: {}", rendered),
            _ => tracing::debug!(target: "ruquest::script", "console.{}: {}", level, rendered),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variable::VariableScope;
    use serde_json::json;
    use std::cell::RefCell;

    fn runtime() -> ScriptRuntime {
        ScriptRuntime::new(SandboxOptions::default(), 5)
    }

    #[tokio::test]
    async fn test_blank_script_fast_path() {
        let mut vars = VariableSet::new();
        vars.set(VariableScope::Runtime, "x", json!(1));

        let result = runtime()
            .run_script(RunScriptParams::new("   \n  ", &vars))
            .await
            .unwrap();

        assert_eq!(result.runtime_variables.get("x"), Some(&json!(1)));
        assert!(result.results.is_empty());
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_set_and_get_runtime_var() {
        let vars = VariableSet::new();
        let result = runtime()
            .run_script(RunScriptParams::new(
                "bru.setVar('token', 'abc'); bru.setVar('n', bru.getVar('n') ?? 0);",
                &vars,
            ))
            .await
            .unwrap();

        assert_eq!(result.runtime_variables.get("token"), Some(&json!("abc")));
        assert_eq!(result.runtime_variables.get("n"), Some(&json!(0)));
    }

    #[tokio::test]
    async fn test_scope_reads_follow_precedence_inputs() {
        let mut vars = VariableSet::new();
        vars.set(VariableScope::Environment, "host", json!("env-host"));
        vars.set(VariableScope::Collection, "host", json!("col-host"));

        let result = runtime()
            .run_script(RunScriptParams::new(
                "bru.setVar('env', bru.getEnvVar('host')); bru.setVar('col', bru.getCollectionVar('host'));",
                &vars,
            ))
            .await
            .unwrap();

        assert_eq!(result.runtime_variables.get("env"), Some(&json!("env-host")));
        assert_eq!(result.runtime_variables.get("col"), Some(&json!("col-host")));
    }

    #[tokio::test]
    async fn test_env_writes_are_explicit_return_values() {
        let vars = VariableSet::new();
        let result = runtime()
            .run_script(RunScriptParams::new(
                "bru.setEnvVar('k', 'v'); bru.setGlobalEnvVar('g', 1);",
                &vars,
            ))
            .await
            .unwrap();

        assert_eq!(result.env_variables.get("k"), Some(&json!("v")));
        assert_eq!(result.global_environment_variables.get("g"), Some(&json!(1)));
        // runtime 作用域未被污染
        assert!(result.runtime_variables.is_empty());
    }

    #[tokio::test]
    async fn test_local_variables_not_persisted() {
        let vars = VariableSet::new();
        let result = runtime()
            .run_script(RunScriptParams::new(
                "bru.setVar('@tmp', 'local'); bru.setVar('kept', bru.getVar('@tmp'));",
                &vars,
            ))
            .await
            .unwrap();

        assert!(!result.runtime_variables.contains_key("@tmp"));
        assert_eq!(result.runtime_variables.get("kept"), Some(&json!("local")));
    }

    #[tokio::test]
    async fn test_control_flags() {
        let vars = VariableSet::new();
        let result = runtime()
            .run_script(RunScriptParams::new(
                "bru.runner.skipRequest(); bru.runner.stopExecution(); bru.setNextRequest('next-one');",
                &vars,
            ))
            .await
            .unwrap();

        assert!(result.skip_request);
        assert!(result.stop_execution);
        assert_eq!(result.next_request_name.as_deref(), Some("next-one"));
    }

    #[tokio::test]
    async fn test_guest_error_preserves_partial_writes() {
        let vars = VariableSet::new();
        let result = runtime()
            .run_script(RunScriptParams::new(
                "bru.setVar('before', 1); throw new Error('mid-script'); ",
                &vars,
            ))
            .await
            .unwrap();

        assert!(result.error.as_deref().unwrap_or("").contains("mid-script"));
        assert_eq!(result.runtime_variables.get("before"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn test_request_shim_mutation_returned() {
        let vars = VariableSet::new();
        let mut params = RunScriptParams::new(
            "req.setHeader('x-trace', 'on'); req.setMethod('POST');",
            &vars,
        );
        params.request = Some(json!({
            "url": "http://x/",
            "method": "GET",
            "headers": {},
            "body": null,
        }));

        let result = runtime().run_script(params).await.unwrap();
        let updated = result.updated_request.unwrap();
        assert_eq!(updated["method"], "POST");
        assert_eq!(updated["headers"]["x-trace"], "on");
    }

    #[tokio::test]
    async fn test_response_shim_readable() {
        let vars = VariableSet::new();
        let mut params = RunScriptParams::new(
            "bru.setVar('code', res.getStatus()); bru.setVar('ct', res.getHeader('Content-Type'));",
            &vars,
        );
        params.response = Some(json!({
            "status": 201,
            "statusText": "Created",
            "headers": {"content-type": "application/json"},
            "body": {"ok": true},
            "responseTime": 12,
        }));

        let result = runtime().run_script(params).await.unwrap();
        assert_eq!(result.runtime_variables.get("code"), Some(&json!(201)));
        assert_eq!(
            result.runtime_variables.get("ct"),
            Some(&json!("application/json"))
        );
    }

    #[tokio::test]
    async fn test_test_collection() {
        let vars = VariableSet::new();
        let script = r#"
            test('passes', () => { expect(1).toBe(1); });
            test('fails', () => { expect(1).toBe(2); });
        "#;

        let result = runtime()
            .run_script(RunScriptParams::new(script, &vars))
            .await
            .unwrap();

        assert_eq!(result.results.len(), 2);
        assert_eq!(result.results[0].status, TestStatus::Pass);
        assert_eq!(result.results[1].status, TestStatus::Fail);
        assert!(result.results[1].error.is_some());
        assert_ne!(result.results[0].id, result.results[1].id);
    }

    #[tokio::test]
    async fn test_interpolate_sees_live_runtime_vars() {
        let mut vars = VariableSet::new();
        vars.set(VariableScope::Environment, "host", json!("example.com"));

        let result = runtime()
            .run_script(RunScriptParams::new(
                "bru.setVar('port', 8080); bru.setVar('u', bru.interpolate('{{host}}:{{port}}'));",
                &vars,
            ))
            .await
            .unwrap();

        assert_eq!(
            result.runtime_variables.get("u"),
            Some(&json!("example.com:8080"))
        );
    }

    #[tokio::test]
    async fn test_console_forwarded_to_sink() {
        let collected: Rc<RefCell<Vec<(String, Vec<Value>)>>> = Rc::new(RefCell::new(Vec::new()));
        let sink_store = collected.clone();
        let sink: ConsoleSink = Rc::new(move |level, args| {
            sink_store
                .borrow_mut()
                .push((level.to_string(), args.to_vec()));
        });

        let vars = VariableSet::new();
        let mut params = RunScriptParams::new("console.log('x', 1);", &vars);
        params.on_console = Some(sink);

        runtime().run_script(params).await.unwrap();

        let events = collected.borrow();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, "log");
        assert_eq!(events[0].1, vec![json!("x"), json!(1)]);
    }

    struct CountingResolver {
        calls: RefCell<Vec<(String, u32)>>,
    }

    #[async_trait(?Send)]
    impl ItemPathResolver for CountingResolver {
        async fn run(&self, relative_path: &str, depth: u32) -> Result<Value> {
            self.calls
                .borrow_mut()
                .push((relative_path.to_string(), depth));
            Ok(json!({"status": 200}))
        }
    }

    #[tokio::test]
    async fn test_run_request_bridge() {
        let resolver = Rc::new(CountingResolver {
            calls: RefCell::new(Vec::new()),
        });
        let vars = VariableSet::new();
        let mut params = RunScriptParams::new(
            "const out = await bru.runRequest('folder/other.bru'); bru.setVar('st', out.status);",
            &vars,
        );
        params.item_resolver = Some(resolver.clone());

        let result = runtime().run_script(params).await.unwrap();
        assert_eq!(result.runtime_variables.get("st"), Some(&json!(200)));
        assert_eq!(resolver.calls.borrow().len(), 1);
        assert_eq!(resolver.calls.borrow()[0].1, 1);
    }

    #[tokio::test]
    async fn test_run_request_depth_guard() {
        let resolver = Rc::new(CountingResolver {
            calls: RefCell::new(Vec::new()),
        });
        let vars = VariableSet::new();
        let mut params = RunScriptParams::new(
            "try { await bru.runRequest('a'); bru.setVar('ok', true); } catch (e) { bru.setVar('err', e.message); }",
            &vars,
        );
        params.item_resolver = Some(resolver.clone());
        params.depth = 5; // 已达上限

        let result = runtime().run_script(params).await.unwrap();
        assert!(resolver.calls.borrow().is_empty());
        let err = result.runtime_variables.get("err").unwrap();
        assert!(err.as_str().unwrap().contains("recursion depth"));
    }
}
